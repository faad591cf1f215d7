use crate::entities::plan_entity;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A plan's limit for one feature. Serialized form in the `plans.limits` JSON
/// column: `"unlimited"`, `{"flag": bool}` or `{"count": n}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitValue {
    Unlimited,
    Flag(bool),
    Count(u64),
}

impl LimitValue {
    /// A feature name missing from a plan's map resolves to this, never to
    /// an implicit allow.
    pub fn default_deny() -> Self {
        LimitValue::Count(0)
    }
}

/// Immutable catalog entry as the engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    pub is_paid: bool,
    pub monthly_price_cents: i64,
    pub limits: HashMap<String, LimitValue>,
}

impl Plan {
    pub fn limit_for(&self, feature: &str) -> LimitValue {
        self.limits
            .get(feature)
            .cloned()
            .unwrap_or_else(LimitValue::default_deny)
    }
}

impl TryFrom<plan_entity::Model> for Plan {
    type Error = AppError;

    fn try_from(model: plan_entity::Model) -> AppResult<Self> {
        let limits: HashMap<String, LimitValue> = serde_json::from_value(model.limits)?;
        Ok(Plan {
            plan_id: model.plan_id,
            name: model.name,
            is_paid: model.is_paid,
            monthly_price_cents: model.monthly_price_cents,
            limits,
        })
    }
}
