//! Test harness wiring the trigger engine to the in-memory adapters.

use crate::fixtures::{PROJECT_KEY, RunFixture, UserFixture};
use crate::memory::{InMemoryAuthorizer, InMemoryStore};
use conveyor_core::Result;
use conveyor_core::ports::{Resource, Role};
use conveyor_core::run::{JobStatus, Run, RunJob};
use conveyor_core::user::User;
use conveyor_core::workflow::WorkflowDefinition;
use conveyor_engine::{EngineConfig, TriggerEngine, TriggerOutcome, TriggerRequest};
use std::sync::Arc;

/// An engine over an in-memory store, with a default acting user.
pub struct TestHarness {
    pub store: InMemoryStore,
    pub authorizer: Arc<InMemoryAuthorizer>,
    pub engine: Arc<TriggerEngine>,
    pub user: User,
    default_region: String,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        crate::init_test_logging();

        let store = InMemoryStore::new();
        let authorizer = Arc::new(InMemoryAuthorizer::new());
        let engine = Arc::new(TriggerEngine::new(
            Arc::new(store.clone()),
            authorizer.clone(),
            &config,
        ));
        let user = UserFixture::named("alice");
        store.insert_user(user.clone());

        let harness = Self {
            store,
            authorizer,
            engine,
            user,
            default_region: config.default_region.clone(),
        };
        // every user may execute in the default region unless a test says otherwise
        harness.grant_region(&harness.user, &harness.default_region);
        harness
    }

    /// Create a building run of a YAML workflow, started by the default user.
    pub fn start_run(&self, yaml: &str) -> Result<Run> {
        let run = RunFixture::new(WorkflowDefinition::from_yaml(yaml)?, &self.user);
        self.store.insert_run(run.clone());
        Ok(run)
    }

    /// Register a user allowed to execute in the default region.
    pub fn add_user(&self, username: &str, groups: &[&str]) -> User {
        let user = UserFixture::with_groups(username, groups);
        self.store.insert_user(user.clone());
        self.grant_region(&user, &self.default_region);
        user
    }

    pub fn grant_varset(&self, user: &User, name: &str) {
        self.authorizer
            .grant(user.id, PROJECT_KEY, Resource::VariableSet(name.to_string()), Role::Use);
    }

    pub fn grant_region(&self, user: &User, region: &str) {
        self.authorizer
            .grant(user.id, PROJECT_KEY, Resource::Region(region.to_string()), Role::Execute);
    }

    /// Trigger a pass as the default user, without administrative bypass.
    pub async fn trigger(&self, run: &Run) -> Result<TriggerOutcome> {
        self.trigger_as(run, &self.user, false).await
    }

    pub async fn trigger_as(&self, run: &Run, user: &User, is_admin_with_mfa: bool) -> Result<TriggerOutcome> {
        self.engine
            .trigger(&TriggerRequest {
                run_id: run.id,
                user_id: user.id,
                is_admin_with_mfa,
            })
            .await
    }

    /// Committed instances of a job in the run's current attempt.
    pub fn instances(&self, run: &Run, job: &str) -> Vec<RunJob> {
        let attempt = self.store.run(run.id).map_or(run.run_attempt, |r| r.run_attempt);
        self.store
            .run_jobs(run.id)
            .into_iter()
            .filter(|rj| rj.job_id == job && rj.run_attempt == attempt)
            .collect()
    }

    /// Move every instance of a job to `status`.
    pub fn finish(&self, run: &Run, job: &str, status: JobStatus) {
        for rj in self.instances(run, job) {
            self.store.set_job_status(rj.id, status);
        }
    }

    /// Messages of every info recorded on the run.
    pub fn messages(&self, run: &Run) -> Vec<String> {
        self.store
            .run_infos(run.id)
            .into_iter()
            .map(|i| i.message)
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
