use crate::config::EngineConfig;
use crate::entities::{SubscriptionState, subscription_entity};
use crate::error::{AppError, AppResult};
use crate::models::{next_state, SubscriptionEvent};
use crate::services::CatalogService;
use crate::store::{NewSubscription, SubscriptionStore};
use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;

const MAX_CAS_RETRIES: u32 = 3;

/// Owner of subscription rows. Every state change is validated against the
/// transition table and written with an optimistic lock-version guard, so
/// transitions for one subscription serialize even across service instances.
pub struct SubscriptionService {
    subs: Arc<dyn SubscriptionStore>,
    catalog: Arc<CatalogService>,
    engine: EngineConfig,
}

impl SubscriptionService {
    pub fn new(
        subs: Arc<dyn SubscriptionStore>,
        catalog: Arc<CatalogService>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            subs,
            catalog,
            engine,
        }
    }

    pub async fn current_for_user(
        &self,
        user_id: i64,
    ) -> AppResult<Option<subscription_entity::Model>> {
        self.subs.current_for_user(user_id).await
    }

    /// Signup entry point: a non-expiring Active subscription on the free
    /// plan. Calling it again for an already-enrolled user is a no-op; any
    /// other existing subscription makes signup an invalid transition, it
    /// never supersedes what the user has.
    pub async fn signup_free(&self, user_id: i64) -> AppResult<subscription_entity::Model> {
        let free = self.catalog.free_plan().await?;
        if let Some(current) = self.subs.current_for_user(user_id).await? {
            if current.state == SubscriptionState::Active && current.plan_id == free.plan_id {
                return Ok(current);
            }
            log::warn!(
                "rejected signup for user {user_id}: already on {} ({})",
                current.plan_id,
                current.state
            );
            return Err(AppError::InvalidTransition {
                from: current.state.to_string(),
                event: "signup".to_string(),
            });
        }
        self.subs
            .insert_current(NewSubscription {
                user_id,
                plan_id: free.plan_id,
                state: SubscriptionState::Active,
                started_at: Utc::now(),
                expires_at: None,
                auto_renew: false,
                last_observation: Some("signup on free plan".to_string()),
            })
            .await
    }

    /// Successful-payment entry point: supersedes whatever the user had and
    /// starts a fresh Active paid subscription for one billing period.
    pub async fn activate_paid(
        &self,
        user_id: i64,
        plan_id: &str,
    ) -> AppResult<subscription_entity::Model> {
        let plan = self.catalog.get_plan(plan_id).await?;
        if !plan.is_paid {
            return Err(AppError::ValidationError(format!(
                "Plan {plan_id} is not a paid plan"
            )));
        }
        let now = Utc::now();
        self.subs
            .insert_current(NewSubscription {
                user_id,
                plan_id: plan.plan_id,
                state: SubscriptionState::Active,
                started_at: now,
                expires_at: Some(now + Duration::days(self.engine.billing_period_days)),
                auto_renew: true,
                last_observation: Some("activated after successful payment".to_string()),
            })
            .await
    }

    /// Validate `event` against the transition table, fold in its side
    /// effects and write the row back under the lock-version guard. A lost
    /// race re-reads the row and re-validates, bounded by `MAX_CAS_RETRIES`.
    pub async fn apply_transition(
        &self,
        subscription_id: i64,
        event: SubscriptionEvent,
    ) -> AppResult<subscription_entity::Model> {
        let mut attempt = 0u32;
        loop {
            let sub = self
                .subs
                .find(subscription_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Subscription {subscription_id} not found"))
                })?;

            let updated = self.folded(sub, event)?;
            match self.subs.save_guarded(updated).await {
                Ok(saved) => {
                    log::info!(
                        "subscription {} transitioned to {} on {}",
                        saved.id,
                        saved.state,
                        event
                    );
                    return Ok(saved);
                }
                Err(AppError::ConcurrentModification) if attempt < MAX_CAS_RETRIES => {
                    attempt += 1;
                    let jitter_ms = rand::thread_rng().gen_range(5..25);
                    tokio::time::sleep(std::time::Duration::from_millis(jitter_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Compute the post-event row. Pure apart from reading the clock.
    fn folded(
        &self,
        sub: subscription_entity::Model,
        event: SubscriptionEvent,
    ) -> AppResult<subscription_entity::Model> {
        let attempts_after = match event {
            SubscriptionEvent::GatewayRejected => sub.failed_attempts + 1,
            SubscriptionEvent::GatewayApproved => 0,
            _ => sub.failed_attempts,
        };
        let from = sub.state;
        let to = next_state(from, event, attempts_after, self.engine.max_failed_attempts)
            .inspect_err(|_| {
                log::warn!(
                    "rejected transition for subscription {}: {} on {}",
                    sub.id,
                    from,
                    event
                );
            })?;

        let now = Utc::now();
        let mut updated = sub;
        updated.state = to;
        updated.failed_attempts = attempts_after;
        updated.last_observation = Some(format!("{event}: {from} -> {to} at {now}"));

        match event {
            SubscriptionEvent::RenewalDue => {
                // provisional hold while the charge settles
                let base = updated.expires_at.unwrap_or(now);
                updated.expires_at = Some(base + Duration::days(self.engine.grace_days));
            }
            SubscriptionEvent::GatewayApproved => {
                updated.expires_at = Some(now + Duration::days(self.engine.billing_period_days));
                updated.gateway_reference = None;
            }
            SubscriptionEvent::GatewayRejected => {
                // retire the failed charge so the next attempt starts fresh
                updated.gateway_reference = None;
            }
            SubscriptionEvent::Cancel => {
                updated.auto_renew = false;
            }
            _ => {}
        }
        Ok(updated)
    }

    /// Explicit cancel: stays usable until expiry, then expires naturally.
    pub async fn cancel(&self, user_id: i64) -> AppResult<subscription_entity::Model> {
        let current = self
            .subs
            .current_for_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No subscription for user {user_id}")))?;
        self.apply_transition(current.id, SubscriptionEvent::Cancel)
            .await
    }

    /// Manual reinstatement of a suspended subscription (support tooling).
    pub async fn reinstate(&self, subscription_id: i64) -> AppResult<subscription_entity::Model> {
        self.apply_transition(subscription_id, SubscriptionEvent::Reinstate)
            .await
    }

    /// Terminal expiry plus downgrade: the exhausted row becomes Expired and
    /// a fresh free-plan subscription takes over as the user's current one.
    pub async fn expire_and_downgrade(
        &self,
        subscription_id: i64,
    ) -> AppResult<(subscription_entity::Model, subscription_entity::Model)> {
        let expired = self
            .apply_transition(subscription_id, SubscriptionEvent::GraceExhausted)
            .await?;
        let free = self.catalog.free_plan().await?;
        let replacement = self
            .subs
            .insert_current(NewSubscription {
                user_id: expired.user_id,
                plan_id: free.plan_id,
                state: SubscriptionState::Active,
                started_at: Utc::now(),
                expires_at: None,
                auto_renew: false,
                last_observation: Some(format!(
                    "auto-downgrade from expired subscription {}",
                    expired.id
                )),
            })
            .await?;
        Ok((expired, replacement))
    }

    /// Record the gateway reference of an in-flight renewal charge.
    pub async fn record_gateway_reference(
        &self,
        sub: subscription_entity::Model,
        reference: &str,
    ) -> AppResult<subscription_entity::Model> {
        let mut updated = sub;
        updated.gateway_reference = Some(reference.to_string());
        self.subs.save_guarded(updated).await
    }
}
