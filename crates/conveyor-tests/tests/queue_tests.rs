//! Trigger worker behavior while every pass slot is busy.

use async_trait::async_trait;
use conveyor_core::Result;
use conveyor_core::ids::UserId;
use conveyor_core::ports::{Authorizer, Resource, Role};
use conveyor_engine::{EngineConfig, TriggerEngine, TriggerRequest, trigger_queue};
use conveyor_tests::{InMemoryAuthorizer, TestHarness};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, watch};

const SINGLE: &str = r#"
jobs:
  job1: {}
"#;

/// Holds every authorization check until the test opens the gate.
struct HeldAuthorizer {
    inner: Arc<InMemoryAuthorizer>,
    entered: Notify,
    gate: Semaphore,
}

#[async_trait]
impl Authorizer for HeldAuthorizer {
    async fn has_role(&self, user_id: UserId, project_key: &str, resource: &Resource, role: Role) -> Result<bool> {
        self.entered.notify_one();
        let _open = self.gate.acquire().await;
        self.inner.has_role(user_id, project_key, resource, role).await
    }
}

#[tokio::test]
async fn test_worker_stops_while_all_permits_are_held() {
    let h = TestHarness::new();
    let held = Arc::new(HeldAuthorizer {
        inner: h.authorizer.clone(),
        entered: Notify::new(),
        gate: Semaphore::new(0),
    });
    let engine = Arc::new(TriggerEngine::new(
        Arc::new(h.store.clone()),
        held.clone(),
        &EngineConfig::default(),
    ));
    let (sender, worker) = trigger_queue(4, engine, 1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let first = h.start_run(SINGLE).unwrap();
    let second = h.start_run(SINGLE).unwrap();
    for run in [&first, &second] {
        sender
            .enqueue(TriggerRequest {
                run_id: run.id,
                user_id: h.user.id,
                is_admin_with_mfa: false,
            })
            .await
            .unwrap();
    }

    let worker_handle = tokio::spawn(worker.run(shutdown_rx));
    tokio::time::timeout(Duration::from_secs(5), held.entered.notified())
        .await
        .unwrap();

    // the only permit belongs to the first pass
    shutdown_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    held.gate.add_permits(16);

    tokio::time::timeout(Duration::from_secs(5), worker_handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.instances(&first, "job1").len(), 1);
    assert!(h.instances(&second, "job1").is_empty());
}
