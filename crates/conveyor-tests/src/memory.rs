//! In-memory Store and Authorizer.
//!
//! Writes are buffered per transaction and applied on commit. Run job keys
//! are reserved at insert time, the way a unique index blocks a concurrent
//! insert, and released if the transaction is dropped.

use async_trait::async_trait;
use conveyor_core::ids::{RunId, RunJobId, UserId};
use conveyor_core::integration::{ConfigValueType, ProjectIntegration};
use conveyor_core::ports::{Authorizer, Resource, Role, Store, StoreTransaction};
use conveyor_core::run::{JobStatus, Run, RunInfo, RunJob, RunResult, RunStatus, matrix_key};
use conveyor_core::user::User;
use conveyor_core::variables::VariableSet;
use conveyor_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const MASKED: &str = "**********";

type InstanceKey = (RunId, i32, String, String);

fn instance_key(run_job: &RunJob) -> InstanceKey {
    (
        run_job.run_id,
        run_job.run_attempt,
        run_job.job_id.clone(),
        matrix_key(&run_job.matrix),
    )
}

#[derive(Default)]
struct State {
    runs: HashMap<RunId, Run>,
    run_jobs: Vec<RunJob>,
    run_infos: Vec<RunInfo>,
    run_results: Vec<RunResult>,
    variable_sets: Vec<VariableSet>,
    integrations: Vec<ProjectIntegration>,
    users: HashMap<UserId, User>,
    reserved: HashSet<InstanceKey>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_run(&self, run: Run) {
        self.lock().runs.insert(run.id, run);
    }

    pub fn insert_user(&self, user: User) {
        self.lock().users.insert(user.id, user);
    }

    pub fn insert_variable_set(&self, set: VariableSet) {
        self.lock().variable_sets.push(set);
    }

    pub fn insert_integration(&self, integration: ProjectIntegration) {
        self.lock().integrations.push(integration);
    }

    pub fn insert_run_result(&self, result: RunResult) {
        self.lock().run_results.push(result);
    }

    pub fn run(&self, id: RunId) -> Option<Run> {
        self.lock().runs.get(&id).cloned()
    }

    /// Every committed run job of a run, across attempts.
    pub fn run_jobs(&self, run_id: RunId) -> Vec<RunJob> {
        self.lock()
            .run_jobs
            .iter()
            .filter(|rj| rj.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn run_infos(&self, run_id: RunId) -> Vec<RunInfo> {
        self.lock()
            .run_infos
            .iter()
            .filter(|i| i.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Move a run job to a new status, as a worker would.
    pub fn set_job_status(&self, id: RunJobId, status: JobStatus) {
        let now = chrono::Utc::now();
        let mut state = self.lock();
        if let Some(rj) = state.run_jobs.iter_mut().find(|rj| rj.id == id) {
            rj.status = status;
            if status == JobStatus::Building {
                rj.started = Some(now);
            }
            if status.is_terminal() {
                rj.ended = Some(now);
            }
        }
    }

    /// Start a new attempt of a run.
    pub fn restart_run(&self, id: RunId) {
        if let Some(run) = self.lock().runs.get_mut(&id) {
            run.run_attempt += 1;
            run.contexts.cds.run_attempt = run.run_attempt;
            run.status = RunStatus::Building;
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_run(&self, id: RunId) -> Result<Option<Run>> {
        Ok(self.run(id))
    }

    async fn load_run_jobs(&self, run_id: RunId, run_attempt: i32) -> Result<Vec<RunJob>> {
        Ok(self
            .lock()
            .run_jobs
            .iter()
            .filter(|rj| rj.run_id == run_id && rj.run_attempt == run_attempt)
            .cloned()
            .collect())
    }

    async fn load_run_results(&self, run_id: RunId, run_attempt: i32) -> Result<Vec<RunResult>> {
        Ok(self
            .lock()
            .run_results
            .iter()
            .filter(|r| r.run_id == run_id && r.run_attempt == run_attempt)
            .cloned()
            .collect())
    }

    async fn load_variable_set(
        &self,
        project_key: &str,
        name: &str,
        with_decryption: bool,
    ) -> Result<Option<VariableSet>> {
        let set = self
            .lock()
            .variable_sets
            .iter()
            .find(|s| s.project_key == project_key && s.name == name)
            .cloned();

        Ok(set.map(|mut set| {
            if !with_decryption {
                for item in set.items.iter_mut().filter(|i| i.is_secret()) {
                    item.value = MASKED.to_string();
                }
            }
            set
        }))
    }

    async fn load_integration(
        &self,
        project_key: &str,
        name: &str,
        with_decryption: bool,
    ) -> Result<Option<ProjectIntegration>> {
        let integration = self
            .lock()
            .integrations
            .iter()
            .find(|i| i.project_key == project_key && i.name == name)
            .cloned();

        Ok(integration.map(|mut integration| {
            if !with_decryption {
                for value in integration.config.values_mut() {
                    if value.value_type == ConfigValueType::Password {
                        value.value = MASKED.to_string();
                    }
                }
            }
            integration
        }))
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn load_building_runs_with_ended_jobs(&self) -> Result<Vec<Run>> {
        let state = self.lock();
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|run| run.status == RunStatus::Building)
            .filter(|run| {
                let mut jobs = state
                    .run_jobs
                    .iter()
                    .filter(|rj| rj.run_id == run.id && rj.run_attempt == run.run_attempt)
                    .peekable();
                jobs.peek().is_some() && jobs.all(|rj| rj.status.is_terminal())
            })
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.id);
        Ok(runs)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            state: self.state.clone(),
            run_jobs: Vec::new(),
            run_infos: Vec::new(),
            statuses: Vec::new(),
            committed: false,
        }))
    }
}

struct InMemoryTransaction {
    state: Arc<Mutex<State>>,
    run_jobs: Vec<RunJob>,
    run_infos: Vec<RunInfo>,
    statuses: Vec<(RunId, RunStatus)>,
    committed: bool,
}

impl InMemoryTransaction {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_run_job(&mut self, run_job: &RunJob) -> Result<()> {
        let key = instance_key(run_job);
        if !self.lock().reserved.insert(key) {
            return Err(Error::Conflict(format!(
                "run job {} already exists for matrix {:?}",
                run_job.job_id,
                matrix_key(&run_job.matrix)
            )));
        }
        self.run_jobs.push(run_job.clone());
        Ok(())
    }

    async fn insert_run_info(&mut self, info: &RunInfo) -> Result<()> {
        self.run_infos.push(info.clone());
        Ok(())
    }

    async fn update_run_status(&mut self, run_id: RunId, status: RunStatus) -> Result<()> {
        self.statuses.push((run_id, status));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let run_jobs = std::mem::take(&mut this.run_jobs);
        let run_infos = std::mem::take(&mut this.run_infos);
        let statuses = std::mem::take(&mut this.statuses);

        {
            let mut state = this.lock();
            state.run_jobs.extend(run_jobs);
            state.run_infos.extend(run_infos);
            for (run_id, status) in statuses {
                if let Some(run) = state.runs.get_mut(&run_id) {
                    run.status = status;
                    run.last_modified = chrono::Utc::now();
                }
            }
        }

        this.committed = true;
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.committed || self.run_jobs.is_empty() {
            return;
        }
        let keys: Vec<InstanceKey> = self.run_jobs.iter().map(instance_key).collect();
        let mut state = self.lock();
        for key in keys {
            state.reserved.remove(&key);
        }
    }
}

/// Grants held in memory. Counts oracle calls.
#[derive(Default)]
pub struct InMemoryAuthorizer {
    grants: Mutex<HashSet<(UserId, String, Resource, Role)>>,
    calls: AtomicUsize,
}

impl InMemoryAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user_id: UserId, project_key: &str, resource: Resource, role: Role) {
        self.grants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((user_id, project_key.to_string(), resource, role));
    }

    /// Number of `has_role` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for InMemoryAuthorizer {
    async fn has_role(&self, user_id: UserId, project_key: &str, resource: &Resource, role: Role) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
        Ok(grants.contains(&(user_id, project_key.to_string(), resource.clone(), role)))
    }
}
