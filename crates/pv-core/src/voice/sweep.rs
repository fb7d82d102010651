//! Periodic expiry sweep.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::LifecycleManager;

/// Drives [`LifecycleManager::evaluate_expiry`] on a fixed interval.
///
/// Sweeps never overlap: each sweep is awaited before the next tick is
/// taken, and ticks missed while a slow sweep runs are skipped.
pub struct SweepScheduler {
    manager: Arc<LifecycleManager>,
    interval: Duration,
}

/// Handle for a running sweep task
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepScheduler {
    pub fn new(manager: Arc<LifecycleManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Start sweeping. The first sweep runs one interval from now.
    pub fn spawn(self) -> SweepHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval_secs = self.interval.as_secs_f64();
        info!(interval_secs, "Starting expiry sweep");

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                // Run the sweep in its own task so a panic ends only this sweep
                let manager = Arc::clone(&self.manager);
                let sweep = tokio::spawn(async move {
                    manager.evaluate_expiry(Utc::now()).await
                });
                match sweep.await {
                    Ok(report) => {
                        if !report.deleted.is_empty() || report.failures > 0 {
                            info!(
                                checked = report.checked,
                                deleted = report.deleted.len(),
                                occupied = report.occupied,
                                failures = report.failures,
                                "Sweep finished"
                            );
                        } else {
                            debug!(checked = report.checked, "Sweep finished");
                        }
                    }
                    Err(e) => error!(error = %e, "Sweep task failed"),
                }
            }

            info!("Expiry sweep stopped");
        });

        SweepHandle { shutdown, task }
    }
}

impl SweepHandle {
    /// Stop after the sweep in progress, if any, and wait for the task to end.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Sweep task ended abnormally");
        }
    }
}
