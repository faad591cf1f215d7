//! Background scheduled tasks for the engine.
//!
//! The reconciliation sweep is the only recurring job; a second task drains
//! engine events and logs them for the external notification dispatcher.
//! Call `spawn_all` once during startup to launch them.

use crate::events::EventBus;
use crate::services::RenewalReconciler;
use std::sync::Arc;

/// Spawn all background tasks.
///
/// Notes
/// - The sweep is idempotent; a missed or overlapping run converges to the
///   same state instead of double-charging.
/// - This function detaches tasks via `tokio::spawn`; it does not block.
pub fn spawn_all(reconciler: Arc<RenewalReconciler>, events: EventBus, sweep_interval_secs: u64) {
    // renewal reconciliation sweep
    {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            loop {
                match reconciler.run_sweep().await {
                    Ok(report) if !report.errors.is_empty() => {
                        log::warn!(
                            "reconciliation sweep {} finished with {} item errors",
                            report.sweep_id,
                            report.errors.len()
                        );
                    }
                    Ok(_) => {}
                    Err(e) => log::error!("reconciliation sweep failed: {e:?}"),
                }
                tokio::time::sleep(std::time::Duration::from_secs(sweep_interval_secs)).await;
            }
        });
    }

    // engine event drain; the notification dispatcher subscribes here
    {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            log::info!("engine event: {json}");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("engine event drain lagged, {n} events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
