//! Database integration tests.
//!
//! Run with: `cargo test -p conveyor-tests --test database_tests --features integration`

#![cfg(feature = "integration")]

use conveyor_core::Error;
use conveyor_core::ports::{Authorizer, Resource, Role, Store};
use conveyor_core::run::{InfoLevel, JobStatus, RunInfo, RunStatus};
use conveyor_core::variables::VariableSetItem;
use conveyor_core::workflow::WorkflowDefinition;
use conveyor_engine::{EngineConfig, TriggerEngine, TriggerRequest};
use conveyor_tests::{
    IntegrationFixture, PROJECT_KEY, RunFixture, UserFixture, VariableSetFixture, context::TestContext,
};
use std::sync::Arc;

const CHAIN: &str = r#"
jobs:
  job1:
    vars: [app]
  job2:
    needs: [job1]
"#;

#[tokio::test]
async fn test_run_round_trip() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let store = ctx.store();

    let user = UserFixture::with_groups("alice", &["devs"]);
    store.create_user(&user).await.expect("Failed to create user");
    let run = RunFixture::new(WorkflowDefinition::from_yaml(CHAIN).unwrap(), &user);
    store.create_run(&run).await.expect("Failed to create run");

    let found = store
        .load_run(run.id)
        .await
        .expect("Failed to load run")
        .expect("Run not found");
    assert_eq!(found.workflow, run.workflow);
    assert_eq!(found.contexts.cds.workflow, "my-workflow");
    assert_eq!(found.status, RunStatus::Building);

    let loaded_user = store
        .load_user(user.id)
        .await
        .expect("Failed to load user")
        .expect("User not found");
    assert_eq!(loaded_user.groups, vec!["devs".to_string()]);
}

#[tokio::test]
async fn test_duplicate_run_job_conflicts() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let store = ctx.store();

    let user = UserFixture::named("alice");
    let run = RunFixture::new(WorkflowDefinition::from_yaml(CHAIN).unwrap(), &user);
    store.create_run(&run).await.expect("Failed to create run");

    let mut tx = store.begin().await.unwrap();
    tx.insert_run_job(&RunFixture::run_job(&run, "job1", JobStatus::Waiting))
        .await
        .expect("Failed to insert run job");
    tx.insert_run_info(&RunInfo::new(run.id, InfoLevel::Info, "first"))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .insert_run_job(&RunFixture::run_job(&run, "job1", JobStatus::Waiting))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    drop(tx);

    assert_eq!(store.load_run_jobs(run.id, 1).await.unwrap().len(), 1);
    let infos = store.load_run_infos(run.id).await.unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].message, "first");
}

#[tokio::test]
async fn test_secrets_masked_without_decryption() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let store = ctx.store();

    store
        .create_variable_set(&VariableSetFixture::new(
            "app",
            vec![
                VariableSetItem::string("name", "conveyor"),
                VariableSetItem::secret("token", "s3cr3t"),
            ],
        ))
        .await
        .unwrap();
    store
        .create_integration(&IntegrationFixture::artifact_manager("artifactory", Some("eu-west")))
        .await
        .unwrap();

    let masked = store
        .load_variable_set(PROJECT_KEY, "app", false)
        .await
        .unwrap()
        .unwrap();
    let clear = store
        .load_variable_set(PROJECT_KEY, "app", true)
        .await
        .unwrap()
        .unwrap();
    let token = |set: &conveyor_core::variables::VariableSet| {
        set.items
            .iter()
            .find(|i| i.name == "token")
            .map(|i| i.value.clone())
            .unwrap()
    };
    assert_ne!(token(&masked), "s3cr3t");
    assert_eq!(token(&clear), "s3cr3t");

    let integration = store
        .load_integration(PROJECT_KEY, "artifactory", false)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(integration.config["token"].value, "artifactory-token");
    assert_eq!(integration.region(), Some("eu-west"));

    assert!(store.load_variable_set(PROJECT_KEY, "missing", true).await.unwrap().is_none());
}

#[tokio::test]
async fn test_grants() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let authorizer = ctx.authorizer();
    let user = UserFixture::named("alice");
    let varset = Resource::VariableSet("app".to_string());

    assert!(!authorizer.has_role(user.id, PROJECT_KEY, &varset, Role::Use).await.unwrap());
    authorizer.grant(user.id, PROJECT_KEY, &varset, Role::Use).await.unwrap();
    authorizer.grant(user.id, PROJECT_KEY, &varset, Role::Use).await.unwrap();
    assert!(authorizer.has_role(user.id, PROJECT_KEY, &varset, Role::Use).await.unwrap());
    assert!(!authorizer.has_role(user.id, PROJECT_KEY, &varset, Role::Execute).await.unwrap());
}

#[tokio::test]
async fn test_trigger_passes_over_postgres() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let store = ctx.store();
    let authorizer = ctx.authorizer();
    let config = EngineConfig::default();

    let user = UserFixture::named("alice");
    store.create_user(&user).await.unwrap();
    store
        .create_variable_set(&VariableSetFixture::new("app", vec![VariableSetItem::string("a", "b")]))
        .await
        .unwrap();
    authorizer
        .grant(user.id, PROJECT_KEY, &Resource::Region(config.default_region.clone()), Role::Execute)
        .await
        .unwrap();
    authorizer
        .grant(user.id, PROJECT_KEY, &Resource::VariableSet("app".to_string()), Role::Use)
        .await
        .unwrap();

    let run = RunFixture::new(WorkflowDefinition::from_yaml(CHAIN).unwrap(), &user);
    store.create_run(&run).await.unwrap();

    let engine = TriggerEngine::new(Arc::new(store.clone()), Arc::new(authorizer), &config);
    let request = TriggerRequest {
        run_id: run.id,
        user_id: user.id,
        is_admin_with_mfa: false,
    };

    let outcome = engine.trigger(&request).await.unwrap();
    assert_eq!(outcome.created, 1);
    // a repeated pass over unchanged state creates nothing
    assert_eq!(engine.trigger(&request).await.unwrap().created, 0);

    let job1 = store.load_run_jobs(run.id, 1).await.unwrap();
    assert_eq!(job1.len(), 1);
    assert!(store.load_building_runs_with_ended_jobs().await.unwrap().is_empty());

    store
        .update_run_job_status(job1[0].id, JobStatus::Success)
        .await
        .unwrap();
    let stalled = store.load_building_runs_with_ended_jobs().await.unwrap();
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].id, run.id);

    engine.trigger(&request).await.unwrap();
    let job2 = store
        .load_run_jobs(run.id, 1)
        .await
        .unwrap()
        .into_iter()
        .find(|rj| rj.job_id == "job2")
        .expect("job2 not scheduled");
    store.update_run_job_status(job2.id, JobStatus::Success).await.unwrap();

    let outcome = engine.trigger(&request).await.unwrap();
    assert_eq!(outcome.status, Some(RunStatus::Success));
    assert_eq!(store.load_run(run.id).await.unwrap().unwrap().status, RunStatus::Success);
    assert!(store.load_building_runs_with_ended_jobs().await.unwrap().is_empty());
}
