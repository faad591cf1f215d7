use crate::models::LimitValue;
use serde::{Deserialize, Serialize};

/// Sentinel for "no finite remaining quota" (unlimited / boolean features).
pub const REMAINING_UNLIMITED: i64 = -1;

/// The structured answer to "may user U do X right now". A denial always
/// carries limit/usage/remaining so the caller can render an upgrade prompt
/// instead of a bare no.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementDecision {
    pub allowed: bool,
    pub plan_id: String,
    pub feature: String,
    pub limit: LimitValue,
    pub usage: u64,
    pub remaining: i64,
}
