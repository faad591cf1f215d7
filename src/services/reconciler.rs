use crate::config::EngineConfig;
use crate::entities::{SubscriptionState, subscription_entity};
use crate::error::{AppError, AppResult};
use crate::events::{EngineEvent, EventBus};
use crate::external::{ChargeStatus, PaymentGateway};
use crate::models::SubscriptionEvent;
use crate::services::{CatalogService, SubscriptionService};
use crate::store::SubscriptionStore;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of one sweep, for logs and the manual trigger endpoint. Per-item
/// failures land in `errors`; they never abort the rest of the sweep.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub sweep_id: String,
    pub renewals_initiated: u32,
    pub outcomes_applied: u32,
    pub expired: u32,
    pub errors: Vec<SweepItemError>,
}

#[derive(Debug, Serialize)]
pub struct SweepItemError {
    pub subscription_id: i64,
    pub error: String,
}

/// The periodic control loop that keeps local subscription state consistent
/// with the payment gateway. Every mutation goes through the transition
/// table, which is what makes re-running a sweep (or running it from two
/// instances at once) safe: already-satisfied steps are simply skipped.
pub struct RenewalReconciler {
    subs: Arc<dyn SubscriptionStore>,
    subscriptions: Arc<SubscriptionService>,
    catalog: Arc<CatalogService>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventBus,
    engine: EngineConfig,
}

impl RenewalReconciler {
    pub fn new(
        subs: Arc<dyn SubscriptionStore>,
        subscriptions: Arc<SubscriptionService>,
        catalog: Arc<CatalogService>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventBus,
        engine: EngineConfig,
    ) -> Self {
        Self {
            subs,
            subscriptions,
            catalog,
            gateway,
            events,
            engine,
        }
    }

    pub async fn run_sweep(&self) -> AppResult<SweepReport> {
        let mut report = SweepReport {
            sweep_id: Uuid::new_v4().to_string(),
            ..Default::default()
        };
        let now = Utc::now();
        log::debug!("reconciler sweep {} starting", report.sweep_id);

        // 1. move due subscriptions into PendingRenewal and start a charge
        let cutoff = now + Duration::hours(self.engine.renewal_lookahead_hours);
        for sub in self.subs.due_for_renewal(cutoff).await? {
            let id = sub.id;
            self.events.emit(EngineEvent::SubscriptionExpiring {
                subscription_id: id,
                user_id: sub.user_id,
                expires_at: sub.expires_at,
            });
            match self.start_renewal(sub).await {
                Ok(()) => report.renewals_initiated += 1,
                Err(e) => report.errors.push(SweepItemError {
                    subscription_id: id,
                    error: e.to_string(),
                }),
            }
        }

        // 2-4. poll pending charges and fold outcomes through the table
        for sub in self.subs.pending_renewal().await? {
            let id = sub.id;
            match self.settle_pending(sub).await {
                Ok(applied) => {
                    if applied {
                        report.outcomes_applied += 1;
                    }
                }
                Err(e) => report.errors.push(SweepItemError {
                    subscription_id: id,
                    error: e.to_string(),
                }),
            }
        }

        // 5. expire whatever the grace hold could not save, and downgrade
        for sub in self.subs.expired_unresolved(now).await? {
            let id = sub.id;
            match self.expire(sub).await {
                Ok(()) => report.expired += 1,
                Err(e) => report.errors.push(SweepItemError {
                    subscription_id: id,
                    error: e.to_string(),
                }),
            }
        }

        log::info!(
            "reconciler sweep {} done: {} renewals initiated, {} outcomes applied, {} expired, {} errors",
            report.sweep_id,
            report.renewals_initiated,
            report.outcomes_applied,
            report.expired,
            report.errors.len()
        );
        Ok(report)
    }

    async fn start_renewal(&self, sub: subscription_entity::Model) -> AppResult<()> {
        let pending = self
            .subscriptions
            .apply_transition(sub.id, SubscriptionEvent::RenewalDue)
            .await?;
        self.initiate_charge(pending).await
    }

    async fn initiate_charge(&self, sub: subscription_entity::Model) -> AppResult<()> {
        let plan = self.catalog.get_plan(&sub.plan_id).await?;
        let description = format!("Renewal of plan {} for user {}", plan.plan_id, sub.user_id);
        match self
            .gateway
            .initiate_charge(sub.id, plan.monthly_price_cents, &self.engine.currency, &description)
            .await
        {
            Ok(initiation) => {
                self.subscriptions
                    .record_gateway_reference(sub, &initiation.gateway_reference)
                    .await?;
                Ok(())
            }
            // a network blip is not a rejection: stay PendingRenewal without
            // a reference and retry the charge on the next sweep
            Err(AppError::GatewayTimeout) | Err(AppError::ExternalApiError(_)) => {
                log::warn!(
                    "charge initiation for subscription {} did not complete, will retry",
                    sub.id
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Returns true when an Approved/Rejected outcome was folded in.
    async fn settle_pending(&self, sub: subscription_entity::Model) -> AppResult<bool> {
        let Some(reference) = sub.gateway_reference.clone() else {
            // charge never got off the ground last sweep
            self.initiate_charge(sub).await?;
            return Ok(false);
        };

        let outcome = match self.gateway.get_outcome(&reference).await {
            Ok(outcome) => outcome,
            Err(AppError::GatewayTimeout) | Err(AppError::ExternalApiError(_)) => {
                log::warn!(
                    "outcome poll for subscription {} unavailable, treating as pending",
                    sub.id
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        match outcome.status {
            ChargeStatus::Pending => Ok(false),
            ChargeStatus::Approved => {
                let renewed = self
                    .subscriptions
                    .apply_transition(sub.id, SubscriptionEvent::GatewayApproved)
                    .await?;
                self.events.emit(EngineEvent::SubscriptionRenewed {
                    subscription_id: renewed.id,
                    user_id: renewed.user_id,
                    plan_id: renewed.plan_id,
                    expires_at: renewed.expires_at,
                });
                Ok(true)
            }
            ChargeStatus::Rejected => {
                let updated = self
                    .subscriptions
                    .apply_transition(sub.id, SubscriptionEvent::GatewayRejected)
                    .await?;
                self.events.emit(EngineEvent::RenewalFailed {
                    subscription_id: updated.id,
                    user_id: updated.user_id,
                    failed_attempts: updated.failed_attempts,
                });
                Ok(true)
            }
        }
    }

    async fn expire(&self, sub: subscription_entity::Model) -> AppResult<()> {
        let (expired, replacement) = self.subscriptions.expire_and_downgrade(sub.id).await?;
        self.events.emit(EngineEvent::SubscriptionDowngraded {
            subscription_id: expired.id,
            user_id: expired.user_id,
            from_plan: expired.plan_id,
            to_plan: replacement.plan_id,
        });
        Ok(())
    }

    /// Push-delivery entry point for gateway webhooks. Late outcomes follow
    /// the tie-break rule: a late Approved re-activates via a fresh
    /// subscription if nothing newer than the auto-downgrade free row exists;
    /// a late Rejected on a settled subscription is a no-op.
    pub async fn apply_outcome(&self, gateway_reference: &str, status: ChargeStatus) -> AppResult<()> {
        let sub = self
            .subs
            .find_by_gateway_reference(gateway_reference)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No subscription for charge {gateway_reference}"))
            })?;

        match (status, sub.state) {
            (ChargeStatus::Pending, _) => Ok(()),
            (ChargeStatus::Approved, SubscriptionState::PendingRenewal) => {
                let renewed = self
                    .subscriptions
                    .apply_transition(sub.id, SubscriptionEvent::GatewayApproved)
                    .await?;
                self.events.emit(EngineEvent::SubscriptionRenewed {
                    subscription_id: renewed.id,
                    user_id: renewed.user_id,
                    plan_id: renewed.plan_id,
                    expires_at: renewed.expires_at,
                });
                Ok(())
            }
            (ChargeStatus::Approved, _) => self.reactivate_if_most_recent(sub).await,
            (ChargeStatus::Rejected, SubscriptionState::PendingRenewal) => {
                let updated = self
                    .subscriptions
                    .apply_transition(sub.id, SubscriptionEvent::GatewayRejected)
                    .await?;
                self.events.emit(EngineEvent::RenewalFailed {
                    subscription_id: updated.id,
                    user_id: updated.user_id,
                    failed_attempts: updated.failed_attempts,
                });
                Ok(())
            }
            (ChargeStatus::Rejected, _) => {
                log::info!(
                    "late rejection for settled subscription {}, ignoring",
                    sub.id
                );
                Ok(())
            }
        }
    }

    /// History stays append-only: a late approval never mutates the stale
    /// row, it starts a fresh Active subscription on the same plan.
    async fn reactivate_if_most_recent(&self, sub: subscription_entity::Model) -> AppResult<()> {
        let latest = self
            .subs
            .latest_for_user(sub.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No subscriptions for user {}", sub.user_id)))?;

        let superseded_only_by_downgrade = latest.plan_id == self.engine.free_plan_id
            && latest.state == SubscriptionState::Active
            && latest.id > sub.id;

        if latest.id == sub.id || superseded_only_by_downgrade {
            let fresh = self
                .subscriptions
                .activate_paid(sub.user_id, &sub.plan_id)
                .await?;
            log::info!(
                "late approval for subscription {}: re-activated as {}",
                sub.id,
                fresh.id
            );
            self.events.emit(EngineEvent::SubscriptionRenewed {
                subscription_id: fresh.id,
                user_id: fresh.user_id,
                plan_id: fresh.plan_id,
                expires_at: fresh.expires_at,
            });
        } else {
            log::info!(
                "late approval for subscription {} ignored: user {} has moved on",
                sub.id,
                sub.user_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::gateway::MockGateway;
    use crate::models::{LimitValue, Plan};
    use crate::store::{MemoryStore, SubscriptionStore};
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
        subscriptions: Arc<SubscriptionService>,
        reconciler: RenewalReconciler,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        fixture_with_engine(EngineConfig::default())
    }

    fn fixture_with_engine(engine: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert_plan(Plan {
            plan_id: "gratis".to_string(),
            name: "Gratis".to_string(),
            is_paid: false,
            monthly_price_cents: 0,
            limits: HashMap::new(),
        });
        store.insert_plan(Plan {
            plan_id: "basico".to_string(),
            name: "Básico".to_string(),
            is_paid: true,
            monthly_price_cents: 500,
            limits: HashMap::from([("gastos_recurrentes".to_string(), LimitValue::Count(10))]),
        });

        let catalog = Arc::new(CatalogService::new(
            store.clone(),
            "gratis".to_string(),
            StdDuration::from_secs(30),
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            store.clone(),
            catalog.clone(),
            engine.clone(),
        ));
        let gateway = Arc::new(MockGateway::new());
        let events = EventBus::new(64);
        let reconciler = RenewalReconciler::new(
            store.clone(),
            subscriptions.clone(),
            catalog,
            gateway.clone(),
            events.clone(),
            engine,
        );
        Fixture {
            store,
            gateway,
            subscriptions,
            reconciler,
            events,
        }
    }

    /// Paid subscription whose expiry sits inside the renewal window.
    async fn due_subscription(f: &Fixture, user_id: i64) -> i64 {
        let paid = f.subscriptions.activate_paid(user_id, "basico").await.unwrap();
        f.store
            .set_expires_at(paid.id, Some(Utc::now() + Duration::hours(1)));
        paid.id
    }

    #[tokio::test]
    async fn test_due_subscription_enters_pending_with_charge() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;

        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report.renewals_initiated, 1);
        assert!(report.errors.is_empty());

        let sub = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(sub.state, SubscriptionState::PendingRenewal);
        assert!(sub.gateway_reference.is_some());
        assert_eq!(f.gateway.charges_initiated(), 1);
    }

    #[tokio::test]
    async fn test_charge_uses_configured_currency() {
        let engine = EngineConfig {
            currency: "eur".to_string(),
            ..EngineConfig::default()
        };
        let f = fixture_with_engine(engine);
        due_subscription(&f, 7).await;

        f.reconciler.run_sweep().await.unwrap();
        assert_eq!(f.gateway.last_currency().as_deref(), Some("eur"));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;

        f.reconciler.run_sweep().await.unwrap();
        let after_first = f.store.find(id).await.unwrap().unwrap();

        // overlapping trigger: same end state, no second charge
        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report.renewals_initiated, 0);
        assert_eq!(report.expired, 0);
        let after_second = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(after_first.state, after_second.state);
        assert_eq!(after_first.gateway_reference, after_second.gateway_reference);
        assert_eq!(after_first.expires_at, after_second.expires_at);
        assert_eq!(f.gateway.charges_initiated(), 1);
    }

    #[tokio::test]
    async fn test_approved_outcome_renews() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;
        f.reconciler.run_sweep().await.unwrap();

        let reference = f
            .store
            .find(id)
            .await
            .unwrap()
            .unwrap()
            .gateway_reference
            .unwrap();
        f.gateway.set_outcome(&reference, ChargeStatus::Approved);

        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report.outcomes_applied, 1);

        let sub = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(sub.state, SubscriptionState::Active);
        assert_eq!(sub.failed_attempts, 0);
        assert!(sub.expires_at.unwrap() > Utc::now() + Duration::days(29));
    }

    #[tokio::test]
    async fn test_rejections_until_suspension() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;
        f.reconciler.run_sweep().await.unwrap();

        for expected in 1..=3 {
            // each failed attempt retires its charge, so a fresh one may be
            // needed before the next rejection lands
            let mut sub = f.store.find(id).await.unwrap().unwrap();
            if sub.gateway_reference.is_none() {
                f.reconciler.run_sweep().await.unwrap();
                sub = f.store.find(id).await.unwrap().unwrap();
            }
            f.gateway
                .set_outcome(&sub.gateway_reference.unwrap(), ChargeStatus::Rejected);
            f.reconciler.run_sweep().await.unwrap();
            let sub = f.store.find(id).await.unwrap().unwrap();
            assert_eq!(sub.failed_attempts, expected);
            if expected < 3 {
                assert_eq!(sub.state, SubscriptionState::PendingRenewal);
            } else {
                assert_eq!(sub.state, SubscriptionState::Suspended);
            }
        }
        // one charge per attempt, none once suspended
        assert_eq!(f.gateway.charges_initiated(), 3);
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_treated_as_pending() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;
        f.reconciler.run_sweep().await.unwrap();

        f.gateway.set_timeout_mode(true);
        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report.outcomes_applied, 0);
        assert!(report.errors.is_empty());

        let sub = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(sub.state, SubscriptionState::PendingRenewal);
        assert_eq!(sub.failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_charge_initiation_timeout_retries_next_sweep() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;

        f.gateway.set_timeout_mode(true);
        f.reconciler.run_sweep().await.unwrap();
        let sub = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(sub.state, SubscriptionState::PendingRenewal);
        assert!(sub.gateway_reference.is_none());

        f.gateway.set_timeout_mode(false);
        f.reconciler.run_sweep().await.unwrap();
        let sub = f.store.find(id).await.unwrap().unwrap();
        assert!(sub.gateway_reference.is_some());
        assert_eq!(f.gateway.charges_initiated(), 1);
    }

    #[tokio::test]
    async fn test_grace_exhaustion_expires_and_downgrades() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;
        f.reconciler.run_sweep().await.unwrap();

        // renewal never resolves and the grace hold runs out
        f.store.set_expires_at(id, Some(Utc::now() - Duration::hours(1)));
        let mut rx = f.events.subscribe();
        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report.expired, 1);

        let old = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(old.state, SubscriptionState::Expired);
        assert!(!old.is_current);

        let current = f.store.current_for_user(7).await.unwrap().unwrap();
        assert_eq!(current.plan_id, "gratis");
        assert_eq!(current.state, SubscriptionState::Active);

        let saw_downgrade = std::iter::from_fn(|| rx.try_recv().ok()).any(|e| {
            matches!(
                e,
                EngineEvent::SubscriptionDowngraded { subscription_id, .. } if subscription_id == id
            )
        });
        assert!(saw_downgrade);

        // third invariant pass: nothing more to do
        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report.expired, 0);
    }

    #[tokio::test]
    async fn test_per_item_failure_does_not_stall_the_sweep() {
        let f = fixture();
        // a poisoned row pointing at a plan the catalog no longer knows
        let bad = f.subscriptions.activate_paid(1, "basico").await.unwrap();
        f.store.set_expires_at(bad.id, Some(Utc::now()));
        {
            let mut row = f.store.find(bad.id).await.unwrap().unwrap();
            row.plan_id = "plan_borrado".to_string();
            f.store.save_guarded(row).await.unwrap();
        }
        let good = due_subscription(&f, 2).await;

        let report = f.reconciler.run_sweep().await.unwrap();
        assert!(!report.errors.is_empty());
        assert!(report.errors.iter().all(|e| e.subscription_id == bad.id));
        assert_eq!(report.renewals_initiated, 1);
        let good_row = f.store.find(good).await.unwrap().unwrap();
        assert_eq!(good_row.state, SubscriptionState::PendingRenewal);
    }

    #[tokio::test]
    async fn test_webhook_outcome_applies_without_polling() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;
        f.reconciler.run_sweep().await.unwrap();
        let reference = f
            .store
            .find(id)
            .await
            .unwrap()
            .unwrap()
            .gateway_reference
            .unwrap();

        f.reconciler
            .apply_outcome(&reference, ChargeStatus::Approved)
            .await
            .unwrap();
        let sub = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(sub.state, SubscriptionState::Active);
    }

    #[tokio::test]
    async fn test_late_approval_after_downgrade_creates_fresh_subscription() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;
        f.reconciler.run_sweep().await.unwrap();
        let reference = f
            .store
            .find(id)
            .await
            .unwrap()
            .unwrap()
            .gateway_reference
            .unwrap();

        // the sweep expires and downgrades before the webhook lands
        f.store.set_expires_at(id, Some(Utc::now() - Duration::hours(1)));
        f.reconciler.run_sweep().await.unwrap();
        assert_eq!(
            f.store.current_for_user(7).await.unwrap().unwrap().plan_id,
            "gratis"
        );

        f.reconciler
            .apply_outcome(&reference, ChargeStatus::Approved)
            .await
            .unwrap();

        // re-activated on a fresh row, stale record untouched
        let current = f.store.current_for_user(7).await.unwrap().unwrap();
        assert_eq!(current.plan_id, "basico");
        assert_eq!(current.state, SubscriptionState::Active);
        assert_ne!(current.id, id);
        let stale = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(stale.state, SubscriptionState::Expired);
    }

    #[tokio::test]
    async fn test_late_rejection_on_expired_subscription_is_noop() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;
        f.reconciler.run_sweep().await.unwrap();
        let reference = f
            .store
            .find(id)
            .await
            .unwrap()
            .unwrap()
            .gateway_reference
            .unwrap();

        f.store.set_expires_at(id, Some(Utc::now() - Duration::hours(1)));
        f.reconciler.run_sweep().await.unwrap();

        f.reconciler
            .apply_outcome(&reference, ChargeStatus::Rejected)
            .await
            .unwrap();
        let stale = f.store.find(id).await.unwrap().unwrap();
        assert_eq!(stale.state, SubscriptionState::Expired);
        assert_eq!(stale.failed_attempts, 0);
        assert_eq!(
            f.store.current_for_user(7).await.unwrap().unwrap().plan_id,
            "gratis"
        );
    }

    #[tokio::test]
    async fn test_late_approval_ignored_when_user_moved_on() {
        let f = fixture();
        let id = due_subscription(&f, 7).await;
        f.reconciler.run_sweep().await.unwrap();
        let reference = f
            .store
            .find(id)
            .await
            .unwrap()
            .unwrap()
            .gateway_reference
            .unwrap();

        f.store.set_expires_at(id, Some(Utc::now() - Duration::hours(1)));
        f.reconciler.run_sweep().await.unwrap();
        // the user bought a new paid subscription after the downgrade
        let newer = f.subscriptions.activate_paid(7, "basico").await.unwrap();

        f.reconciler
            .apply_outcome(&reference, ChargeStatus::Approved)
            .await
            .unwrap();
        let current = f.store.current_for_user(7).await.unwrap().unwrap();
        assert_eq!(current.id, newer.id);
    }
}
