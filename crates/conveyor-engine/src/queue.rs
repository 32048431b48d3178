//! Bounded queue of trigger requests and its worker.

use crate::trigger::{TriggerEngine, TriggerRequest};
use conveyor_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, error, info};

/// Create a trigger queue holding up to `capacity` pending requests, served
/// by at most `concurrency` passes at a time.
pub fn trigger_queue(
    capacity: usize,
    engine: Arc<TriggerEngine>,
    concurrency: usize,
) -> (TriggerSender, TriggerWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TriggerSender { tx },
        TriggerWorker {
            rx,
            engine,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        },
    )
}

/// Producer side, cloned into every component that requests passes.
#[derive(Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<TriggerRequest>,
}

impl TriggerSender {
    /// Enqueue a request, waiting while the queue is full.
    pub async fn enqueue(&self, request: TriggerRequest) -> Result<()> {
        debug!(run_id = %request.run_id, "Enqueuing trigger request");
        self.tx
            .send(request)
            .await
            .map_err(|e| Error::Internal(format!("trigger queue closed: {e}")))
    }
}

pub struct TriggerWorker {
    rx: mpsc::Receiver<TriggerRequest>,
    engine: Arc<TriggerEngine>,
    semaphore: Arc<Semaphore>,
}

impl TriggerWorker {
    /// Serve requests until shutdown or until every sender is dropped, then
    /// wait for in-flight passes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_concurrent = self.semaphore.available_permits(),
            "Starting trigger worker"
        );
        let mut tasks = tokio::task::JoinSet::new();

        'serve: loop {
            // a free permit comes first so shutdown is seen while every pass is busy
            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if stopping(changed.is_err(), &shutdown) {
                        break;
                    }
                    continue;
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
            };

            let request = loop {
                tokio::select! {
                    request = self.rx.recv() => break request,
                    changed = shutdown.changed() => {
                        if stopping(changed.is_err(), &shutdown) {
                            break 'serve;
                        }
                    }
                    Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                }
            };
            let Some(request) = request else {
                info!("Trigger queue closed");
                break;
            };

            let engine = self.engine.clone();
            tasks.spawn(async move {
                let _permit = permit;
                if let Err(e) = engine.trigger(&request).await {
                    error!(run_id = %request.run_id, error = %e, "Trigger request failed");
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }
}

fn stopping(closed: bool, shutdown: &watch::Receiver<bool>) -> bool {
    if closed || *shutdown.borrow() {
        info!("Trigger worker shutting down");
        return true;
    }
    false
}
