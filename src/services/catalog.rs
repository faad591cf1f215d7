use crate::error::{AppError, AppResult};
use crate::models::{LimitValue, Plan};
use crate::store::PlanStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Read-only view over the plan catalog. Plans change rarely and a few
/// seconds of staleness is acceptable, so lookups go through a short-TTL
/// per-process cache instead of hitting the store every time.
pub struct CatalogService {
    plans: Arc<dyn PlanStore>,
    free_plan_id: String,
    ttl: Duration,
    cache: RwLock<HashMap<String, (Plan, Instant)>>,
}

impl CatalogService {
    pub fn new(plans: Arc<dyn PlanStore>, free_plan_id: String, ttl: Duration) -> Self {
        Self {
            plans,
            free_plan_id,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn free_plan_id(&self) -> &str {
        &self.free_plan_id
    }

    pub async fn get_plan(&self, plan_id: &str) -> AppResult<Plan> {
        {
            let cache = self.cache.read().await;
            if let Some((plan, cached_at)) = cache.get(plan_id)
                && cached_at.elapsed() < self.ttl
            {
                return Ok(plan.clone());
            }
        }

        let plan = self
            .plans
            .find_plan(plan_id)
            .await?
            .ok_or_else(|| AppError::UnknownPlan(plan_id.to_string()))?;

        self.cache
            .write()
            .await
            .insert(plan_id.to_string(), (plan.clone(), Instant::now()));
        Ok(plan)
    }

    pub async fn get_limit(&self, plan_id: &str, feature: &str) -> AppResult<LimitValue> {
        Ok(self.get_plan(plan_id).await?.limit_for(feature))
    }

    /// The downgrade target and the safe default for non-active subscriptions.
    pub async fn free_plan(&self) -> AppResult<Plan> {
        self.get_plan(&self.free_plan_id).await
    }
}
