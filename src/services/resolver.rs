use crate::entities::SubscriptionState;
use crate::error::AppResult;
use crate::models::{EntitlementDecision, LimitValue, REMAINING_UNLIMITED};
use crate::services::{CatalogService, SubscriptionService, UsageMeter};
use std::sync::Arc;

/// Composition layer answering "may user U do X right now, and how much
/// quota is left". It never mutates usage: committing the quota after the
/// gated action succeeds is the caller's job, via `UsageMeter::increment`,
/// so actions rejected for unrelated reasons are never charged.
pub struct EntitlementResolver {
    subscriptions: Arc<SubscriptionService>,
    catalog: Arc<CatalogService>,
    meter: Arc<UsageMeter>,
}

impl EntitlementResolver {
    pub fn new(
        subscriptions: Arc<SubscriptionService>,
        catalog: Arc<CatalogService>,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            subscriptions,
            catalog,
            meter,
        }
    }

    /// Errors propagate to the caller; the HTTP layer turns them into a
    /// denial. Quota checks fail closed, never open.
    pub async fn check_and_describe(
        &self,
        user_id: i64,
        feature: &str,
    ) -> AppResult<EntitlementDecision> {
        // anything but an Active subscription resolves to the free plan
        let plan_id = match self.subscriptions.current_for_user(user_id).await? {
            Some(sub) if sub.state == SubscriptionState::Active => sub.plan_id,
            _ => self.catalog.free_plan_id().to_string(),
        };

        let limit = self.catalog.get_limit(&plan_id, feature).await?;
        let period_key = UsageMeter::current_period_key();
        let usage = self.meter.get_usage(user_id, feature, &period_key).await?;

        let (allowed, remaining) = match &limit {
            LimitValue::Unlimited => (true, REMAINING_UNLIMITED),
            LimitValue::Flag(enabled) => (*enabled, if *enabled { REMAINING_UNLIMITED } else { 0 }),
            LimitValue::Count(n) => {
                let remaining = n.saturating_sub(usage) as i64;
                (usage < *n, remaining)
            }
        };

        Ok(EntitlementDecision {
            allowed,
            plan_id,
            feature: feature.to_string(),
            limit,
            usage,
            remaining,
        })
    }
}
