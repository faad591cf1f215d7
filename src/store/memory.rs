use crate::entities::{SubscriptionState, subscription_entity};
use crate::error::{AppError, AppResult};
use crate::models::Plan;
use crate::store::{NewSubscription, PlanStore, SubscriptionStore, UsageStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    plans: HashMap<String, Plan>,
    subscriptions: Vec<subscription_entity::Model>,
    next_id: i64,
    counters: HashMap<(i64, String, String), i64>,
    events: HashMap<(String, String), i64>,
}

/// In-process implementation of the storage ports. One mutex serializes every
/// mutation, which gives the same linearizability per counter key and per
/// subscription row that the SQL layer provides with upserts and the
/// lock-version guard. Used by the unit tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_plan(&self, plan: Plan) {
        let mut inner = self.inner.lock().unwrap();
        inner.plans.insert(plan.plan_id.clone(), plan);
    }

    /// Test/dev helper: rewrite a row's expiry without touching its version.
    pub fn set_expires_at(&self, id: i64, expires_at: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(row) = inner.subscriptions.iter_mut().find(|s| s.id == id) {
            row.expires_at = expires_at;
        }
    }

    pub fn subscription_rows(&self) -> Vec<subscription_entity::Model> {
        self.inner.lock().unwrap().subscriptions.clone()
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn find_plan(&self, plan_id: &str) -> AppResult<Option<Plan>> {
        Ok(self.inner.lock().unwrap().plans.get(plan_id).cloned())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find(&self, id: i64) -> AppResult<Option<subscription_entity::Model>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn current_for_user(
        &self,
        user_id: i64,
    ) -> AppResult<Option<subscription_entity::Model>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_current)
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn latest_for_user(
        &self,
        user_id: i64,
    ) -> AppResult<Option<subscription_entity::Model>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> AppResult<Option<subscription_entity::Model>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.gateway_reference.as_deref() == Some(reference))
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn insert_current(
        &self,
        new: NewSubscription,
    ) -> AppResult<subscription_entity::Model> {
        let mut inner = self.inner.lock().unwrap();
        for row in inner
            .subscriptions
            .iter_mut()
            .filter(|s| s.user_id == new.user_id && s.is_current)
        {
            row.is_current = false;
            row.updated_at = Some(Utc::now());
        }
        inner.next_id += 1;
        let model = subscription_entity::Model {
            id: inner.next_id,
            user_id: new.user_id,
            plan_id: new.plan_id,
            state: new.state,
            started_at: new.started_at,
            expires_at: new.expires_at,
            auto_renew: new.auto_renew,
            failed_attempts: 0,
            gateway_reference: None,
            last_observation: new.last_observation,
            is_current: true,
            lock_version: 0,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        };
        inner.subscriptions.push(model.clone());
        Ok(model)
    }

    async fn save_guarded(
        &self,
        updated: subscription_entity::Model,
    ) -> AppResult<subscription_entity::Model> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == updated.id)
            .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", updated.id)))?;
        if row.lock_version != updated.lock_version {
            return Err(AppError::ConcurrentModification);
        }
        *row = subscription_entity::Model {
            lock_version: updated.lock_version + 1,
            updated_at: Some(Utc::now()),
            ..updated
        };
        Ok(row.clone())
    }

    async fn due_for_renewal(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<subscription_entity::Model>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| {
                s.is_current
                    && s.state == SubscriptionState::Active
                    && s.auto_renew
                    && s.expires_at.is_some_and(|e| e <= cutoff)
            })
            .cloned()
            .collect())
    }

    async fn pending_renewal(&self) -> AppResult<Vec<subscription_entity::Model>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.is_current && s.state == SubscriptionState::PendingRenewal)
            .cloned()
            .collect())
    }

    async fn expired_unresolved(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<subscription_entity::Model>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| {
                s.is_current
                    && matches!(
                        s.state,
                        SubscriptionState::Active
                            | SubscriptionState::PendingRenewal
                            | SubscriptionState::Cancelled
                    )
                    && s.expires_at.is_some_and(|e| e < now)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn get_count(&self, user_id: i64, feature: &str, period_key: &str) -> AppResult<u64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .counters
            .get(&(user_id, feature.to_string(), period_key.to_string()))
            .map(|c| *c as u64)
            .unwrap_or(0))
    }

    async fn increment(
        &self,
        user_id: i64,
        feature: &str,
        period_key: &str,
        delta: u64,
        idempotency_key: Option<&str>,
    ) -> AppResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(key) = idempotency_key {
            let event_key = (key.to_string(), period_key.to_string());
            if let Some(prior) = inner.events.get(&event_key) {
                return Ok(*prior as u64);
            }
            let counter_key = (user_id, feature.to_string(), period_key.to_string());
            let count = inner.counters.entry(counter_key).or_insert(0);
            *count += delta as i64;
            let new_count = *count;
            inner.events.insert(event_key, new_count);
            Ok(new_count as u64)
        } else {
            let counter_key = (user_id, feature.to_string(), period_key.to_string());
            let count = inner.counters.entry(counter_key).or_insert(0);
            *count += delta as i64;
            Ok(*count as u64)
        }
    }
}
