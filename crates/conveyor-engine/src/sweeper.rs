//! Periodic recovery of runs whose jobs all ended without a final pass.

use crate::bounded::Bounded;
use crate::queue::TriggerSender;
use crate::trigger::TriggerRequest;
use conveyor_core::Result;
use conveyor_core::ports::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Re-enqueues a trigger pass for every stalled run.
pub struct StalledRunSweeper {
    store: Arc<dyn Store>,
    sender: TriggerSender,
    interval: Duration,
    bounded: Bounded,
}

impl StalledRunSweeper {
    pub fn new(store: Arc<dyn Store>, sender: TriggerSender, interval: Duration, io_timeout: Duration) -> Self {
        Self {
            store,
            sender,
            interval,
            bounded: Bounded::new(io_timeout),
        }
    }

    /// One sweep. Passes run as the user who started the run, without
    /// administrative bypass. Returns the number of runs enqueued.
    pub async fn sweep(&self) -> Result<usize> {
        let runs = self
            .bounded
            .call(
                "load_building_runs_with_ended_jobs",
                self.store.load_building_runs_with_ended_jobs(),
            )
            .await?;

        let mut enqueued = 0;
        for run in runs {
            debug!(run_id = %run.id, attempt = run.run_attempt, "Found stalled run");
            let request = TriggerRequest {
                run_id: run.id,
                user_id: run.user_id,
                is_admin_with_mfa: false,
            };
            match self.sender.enqueue(request).await {
                Ok(()) => enqueued += 1,
                Err(e) => warn!(run_id = %run.id, error = %e, "Unable to enqueue stalled run"),
            }
        }

        if enqueued > 0 {
            info!(count = enqueued, "Re-triggered stalled runs");
        }
        Ok(enqueued)
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);

        info!(interval_secs = self.interval.as_secs(), "Starting stalled-run sweeper");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Stalled-run sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stalled-run sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
