//! Periodic guest-expiry sweep.

use std::time::Duration;

use docperm_storage::GrantStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::PermissionEngine;

/// Runs [`PermissionEngine::cleanup_expired_guest_permissions`] on a timer.
pub struct GuestSweeper;

impl GuestSweeper {
    /// Spawn the sweep loop. The first pass runs immediately; the loop exits once
    /// `shutdown` carries `true` or its sender is dropped.
    pub fn spawn<S: GrantStore + 'static>(
        engine: PermissionEngine<S>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = interval.as_secs(), "Guest sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.cleanup_expired_guest_permissions().await {
                            Ok(report) => debug!(
                                expired = report.expired,
                                failed = report.failed,
                                "Guest sweep pass complete"
                            ),
                            Err(e) => warn!(error = %e, "Guest sweep pass failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Guest sweeper stopped");
        })
    }
}
