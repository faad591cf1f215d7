use crate::error::{AppError, AppResult};
use crate::store::UsageStore;
use chrono::Utc;
use std::sync::Arc;

/// Per-user, per-billing-period consumption counters. Reset does not exist:
/// a new calendar month is simply a new period key.
pub struct UsageMeter {
    usage: Arc<dyn UsageStore>,
}

impl UsageMeter {
    pub fn new(usage: Arc<dyn UsageStore>) -> Self {
        Self { usage }
    }

    /// Calendar-month bucket, derived from UTC wall clock.
    pub fn current_period_key() -> String {
        Utc::now().format("%Y-%m").to_string()
    }

    pub async fn get_usage(&self, user_id: i64, feature: &str, period_key: &str) -> AppResult<u64> {
        self.usage.get_count(user_id, feature, period_key).await
    }

    /// Atomic increment. Counters for elapsed periods are immutable, so only
    /// the current period accepts writes. With an `idempotency_key`, a
    /// retried call replays the originally recorded count instead of
    /// double-counting.
    pub async fn increment(
        &self,
        user_id: i64,
        feature: &str,
        period_key: &str,
        delta: u64,
        idempotency_key: Option<&str>,
    ) -> AppResult<u64> {
        if delta == 0 {
            return Err(AppError::ValidationError(
                "Increment delta must be at least 1".to_string(),
            ));
        }
        if period_key != Self::current_period_key() {
            return Err(AppError::ValidationError(format!(
                "Cannot increment usage for period {period_key}: only the current period is writable"
            )));
        }
        self.usage
            .increment(user_id, feature, period_key, delta, idempotency_key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn meter() -> (Arc<MemoryStore>, UsageMeter) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), UsageMeter::new(store))
    }

    #[tokio::test]
    async fn test_unseen_key_reads_zero() {
        let (_, meter) = meter();
        let period = UsageMeter::current_period_key();
        assert_eq!(meter.get_usage(1, "gastos", &period).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_accumulates() {
        let (_, meter) = meter();
        let period = UsageMeter::current_period_key();
        assert_eq!(meter.increment(1, "gastos", &period, 1, None).await.unwrap(), 1);
        assert_eq!(meter.increment(1, "gastos", &period, 2, None).await.unwrap(), 3);
        assert_eq!(meter.get_usage(1, "gastos", &period).await.unwrap(), 3);
        // other keys are untouched
        assert_eq!(meter.get_usage(2, "gastos", &period).await.unwrap(), 0);
        assert_eq!(meter.get_usage(1, "consultas", &period).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_past_period_is_immutable() {
        let (_, meter) = meter();
        let err = meter
            .increment(1, "gastos", "2020-01", 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_zero_delta_rejected() {
        let (_, meter) = meter();
        let period = UsageMeter::current_period_key();
        let err = meter
            .increment(1, "gastos", &period, 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_idempotency_key_replays_original_count() {
        let (_, meter) = meter();
        let period = UsageMeter::current_period_key();
        let first = meter
            .increment(1, "gastos", &period, 1, Some("req-abc"))
            .await
            .unwrap();
        assert_eq!(first, 1);
        // same key: no-op, replays the recorded count even after other writes
        meter.increment(1, "gastos", &period, 1, None).await.unwrap();
        let replay = meter
            .increment(1, "gastos", &period, 1, Some("req-abc"))
            .await
            .unwrap();
        assert_eq!(replay, 1);
        assert_eq!(meter.get_usage(1, "gastos", &period).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let meter = Arc::new(UsageMeter::new(store));
        let period = UsageMeter::current_period_key();

        let k = 128u64;
        let mut handles = Vec::with_capacity(k as usize);
        for _ in 0..k {
            let meter = meter.clone();
            let period = period.clone();
            handles.push(tokio::spawn(async move {
                meter.increment(42, "gastos", &period, 1, None).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(meter.get_usage(42, "gastos", &period).await.unwrap(), k);
    }
}
