use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Events the reconciler emits for the external notification dispatcher.
/// The engine never sends user-visible messages itself.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    SubscriptionExpiring {
        subscription_id: i64,
        user_id: i64,
        expires_at: Option<DateTime<Utc>>,
    },
    RenewalFailed {
        subscription_id: i64,
        user_id: i64,
        failed_attempts: i32,
    },
    SubscriptionRenewed {
        subscription_id: i64,
        user_id: i64,
        plan_id: String,
        expires_at: Option<DateTime<Utc>>,
    },
    SubscriptionDowngraded {
        subscription_id: i64,
        user_id: i64,
        from_plan: String,
        to_plan: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget: a missing subscriber must never fail engine work.
    pub fn emit(&self, event: EngineEvent) {
        log::debug!(
            "engine event: {}",
            serde_json::to_string(&event).unwrap_or_else(|_| format!("{event:?}"))
        );
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
