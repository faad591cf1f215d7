use serde::{Deserialize, Serialize};

fn default_delta() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct IncrementUsageRequest {
    #[serde(default = "default_delta")]
    pub delta: u64,
    /// Supplied by the caller when the increment follows a side-effecting
    /// action; a repeated key within the period is a no-op replay.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageResponse {
    pub user_id: i64,
    pub feature: String,
    pub period_key: String,
    pub count: u64,
}
