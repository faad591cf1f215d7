//! Storage ports for the engine. The relational store is the single source of
//! truth for subscriptions and usage counters; everything the services need
//! from it goes through these traits so the sea-orm implementation and the
//! in-memory test store stay interchangeable.

#[cfg(test)]
pub mod memory;
pub mod orm;

use crate::entities::{SubscriptionState, subscription_entity};
use crate::error::AppResult;
use crate::models::Plan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(test)]
pub use memory::MemoryStore;
pub use orm::OrmStore;

/// Fields for a fresh subscription row. Insertion always supersedes the
/// user's previous current row in the same transaction.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: i64,
    pub plan_id: String,
    pub state: SubscriptionState,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub last_observation: Option<String>,
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn find_plan(&self, plan_id: &str) -> AppResult<Option<Plan>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find(&self, id: i64) -> AppResult<Option<subscription_entity::Model>>;

    /// The row with `is_current = true` for this user, if any.
    async fn current_for_user(&self, user_id: i64)
    -> AppResult<Option<subscription_entity::Model>>;

    /// The newest row for this user regardless of currency, for the
    /// late-outcome tie-break.
    async fn latest_for_user(&self, user_id: i64)
    -> AppResult<Option<subscription_entity::Model>>;

    /// Newest row carrying this gateway charge reference.
    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> AppResult<Option<subscription_entity::Model>>;

    /// Supersede the user's current row (if any) and insert the new one as
    /// current, atomically.
    async fn insert_current(&self, new: NewSubscription)
    -> AppResult<subscription_entity::Model>;

    /// Compare-and-swap write: applies `updated` only if the stored row still
    /// carries `updated.lock_version`, bumping the version on success.
    /// Fails with `ConcurrentModification` when another writer got there first.
    async fn save_guarded(
        &self,
        updated: subscription_entity::Model,
    ) -> AppResult<subscription_entity::Model>;

    /// Current Active rows with auto-renew on and an expiry at or before `cutoff`.
    async fn due_for_renewal(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<subscription_entity::Model>>;

    /// Current rows sitting in PendingRenewal.
    async fn pending_renewal(&self) -> AppResult<Vec<subscription_entity::Model>>;

    /// Current rows whose expiry (grace hold included) has passed without
    /// resolution: Active, PendingRenewal or Cancelled past `now`.
    async fn expired_unresolved(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<subscription_entity::Model>>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// 0 for an unseen key, never an error.
    async fn get_count(&self, user_id: i64, feature: &str, period_key: &str) -> AppResult<u64>;

    /// Atomic read-modify-write; concurrent callers for the same key must not
    /// lose increments. A repeated `idempotency_key` within the same period is
    /// a no-op that replays the previously recorded count.
    async fn increment(
        &self,
        user_id: i64,
        feature: &str,
        period_key: &str,
        delta: u64,
        idempotency_key: Option<&str>,
    ) -> AppResult<u64>;
}
