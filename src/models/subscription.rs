use crate::entities::SubscriptionState;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything that can move a subscription from one state to another.
/// Every mutation of a subscription row goes through `next_state`, so an
/// event not covered by the table can never be applied silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEvent {
    /// Reconciler: inside the renewal window with auto-renew on.
    RenewalDue,
    /// Gateway reported the renewal charge as approved.
    GatewayApproved,
    /// Gateway reported the renewal charge as rejected.
    GatewayRejected,
    /// Reconciler: expiry (including the grace hold) passed unresolved.
    GraceExhausted,
    /// Explicit cancel by the user; stays usable until expiry.
    Cancel,
    /// Manual reinstatement of a suspended subscription.
    Reinstate,
}

impl std::fmt::Display for SubscriptionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionEvent::RenewalDue => write!(f, "renewal_due"),
            SubscriptionEvent::GatewayApproved => write!(f, "gateway_approved"),
            SubscriptionEvent::GatewayRejected => write!(f, "gateway_rejected"),
            SubscriptionEvent::GraceExhausted => write!(f, "grace_exhausted"),
            SubscriptionEvent::Cancel => write!(f, "cancel"),
            SubscriptionEvent::Reinstate => write!(f, "reinstate"),
        }
    }
}

/// The transition table. `attempts_after` is the failed-attempt count as it
/// will stand after the event is folded in; a rejection only suspends once
/// it reaches `max_failed_attempts`.
pub fn next_state(
    from: SubscriptionState,
    event: SubscriptionEvent,
    attempts_after: i32,
    max_failed_attempts: i32,
) -> AppResult<SubscriptionState> {
    use SubscriptionEvent::*;
    use SubscriptionState::*;

    let to = match (from, event) {
        (Active, RenewalDue) => PendingRenewal,
        (PendingRenewal, GatewayApproved) => Active,
        (PendingRenewal, GatewayRejected) => {
            if attempts_after >= max_failed_attempts {
                Suspended
            } else {
                PendingRenewal
            }
        }
        (Active | PendingRenewal | Cancelled, GraceExhausted) => Expired,
        (Active | PendingRenewal, Cancel) => Cancelled,
        (Suspended, Reinstate) => Active,
        _ => {
            return Err(AppError::InvalidTransition {
                from: from.to_string(),
                event: event.to_string(),
            });
        }
    };
    Ok(to)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub subscription_id: i64,
    pub user_id: i64,
    pub plan_id: String,
    pub state: SubscriptionState,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub failed_attempts: i32,
}

impl From<crate::entities::subscription_entity::Model> for SubscriptionResponse {
    fn from(m: crate::entities::subscription_entity::Model) -> Self {
        Self {
            subscription_id: m.id,
            user_id: m.user_id,
            plan_id: m.plan_id,
            state: m.state,
            started_at: m.started_at,
            expires_at: m.expires_at,
            auto_renew: m.auto_renew,
            failed_attempts: m.failed_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivatePaidRequest {
    pub plan_id: String,
}
