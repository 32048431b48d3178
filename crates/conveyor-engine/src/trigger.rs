//! The run-trigger orchestrator.
//!
//! Each pass re-derives the run state from persisted run jobs, decides which
//! jobs became eligible and persists their instances. Passes hold no lock:
//! every instance is created in its own transaction and the store rejects a
//! second instance for the same `(run, attempt, job, matrix)`, so racing
//! passes for the same run cannot double-schedule.

use crate::bounded::Bounded;
use crate::condition::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::context::{ContextBuilder, integrations_context};
use crate::dag::WorkflowGraph;
use crate::gate::GateEvaluator;
use crate::matrix::MatrixExpander;
use crate::results;
use chrono::Utc;
use conveyor_core::context::JobsResultContext;
use conveyor_core::ids::{RunId, RunJobId, UserId};
use conveyor_core::integration::ProjectIntegration;
use conveyor_core::interpolation::interpolate;
use conveyor_core::ports::{Authorizer, Resource, Role, Store};
use conveyor_core::run::{InfoLevel, JobStatus, Matrix, Run, RunInfo, RunJob, RunStatus};
use conveyor_core::user::User;
use conveyor_core::variables::VariableSet;
use conveyor_core::workflow::{JobDefinition, WorkflowDefinition};
use conveyor_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The single entry point of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub run_id: RunId,
    pub user_id: UserId,
    #[serde(default)]
    pub is_admin_with_mfa: bool,
}

/// The acting user of a pass.
#[derive(Debug, Clone)]
pub struct TriggerHint {
    pub user: User,
    /// Admin role backed by a recently verified strong factor. Bypasses gate
    /// reviewers and resource authorization.
    pub is_admin_with_mfa: bool,
}

/// What one pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerOutcome {
    /// Instances created in status Waiting.
    pub created: usize,
    /// Instances created in status Skipped.
    pub skipped: usize,
    /// New run status, when the pass finished the run.
    pub status: Option<RunStatus>,
}

pub struct TriggerEngine {
    store: Arc<dyn Store>,
    authorizer: Arc<dyn Authorizer>,
    bounded: Bounded,
    default_region: String,
    matrix: MatrixExpander,
    conditions: ConditionEvaluator,
    gates: GateEvaluator,
}

/// State accumulated during one pass.
struct Pass<'a> {
    run: &'a Run,
    hint: &'a TriggerHint,
    created: Vec<RunJob>,
    decisions: HashMap<Resource, bool>,
    integrations: HashMap<String, ProjectIntegration>,
    outcome: TriggerOutcome,
}

/// A coordinate ready to be persisted.
struct ResolvedInstance {
    job: JobDefinition,
    matrix: Matrix,
    region: String,
    enabled_integrations: Vec<String>,
}

impl TriggerEngine {
    pub fn new(store: Arc<dyn Store>, authorizer: Arc<dyn Authorizer>, config: &EngineConfig) -> Self {
        Self {
            store,
            authorizer,
            bounded: Bounded::new(config.io_timeout()),
            default_region: config.default_region.clone(),
            matrix: MatrixExpander::new(),
            conditions: ConditionEvaluator::new(),
            gates: GateEvaluator::new(),
        }
    }

    /// Load the run and the acting user, then run one pass.
    pub async fn trigger(&self, request: &TriggerRequest) -> Result<TriggerOutcome> {
        let run = self
            .bounded
            .call("load_run", self.store.load_run(request.run_id))
            .await?
            .ok_or_else(|| Error::RunNotFound(request.run_id.to_string()))?;

        if run.status.is_terminal() {
            debug!(run_id = %run.id, status = run.status.as_str(), "Run already finished");
            return Ok(TriggerOutcome::default());
        }

        let user = self
            .bounded
            .call("load_user", self.store.load_user(request.user_id))
            .await?
            .ok_or_else(|| Error::UserNotFound(request.user_id.to_string()))?;

        let hint = TriggerHint {
            user,
            is_admin_with_mfa: request.is_admin_with_mfa,
        };
        self.trigger_run(&run, &hint).await
    }

    /// Run one pass over a loaded run. A fatal error is recorded as an
    /// error-level run info when a transaction can still be opened.
    pub async fn trigger_run(&self, run: &Run, hint: &TriggerHint) -> Result<TriggerOutcome> {
        match self.run_pass(run, hint).await {
            Ok(outcome) => {
                info!(
                    run_id = %run.id,
                    attempt = run.run_attempt,
                    created = outcome.created,
                    skipped = outcome.skipped,
                    "Trigger pass completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                error!(run_id = %run.id, attempt = run.run_attempt, error = %err, "Trigger pass aborted");
                self.record_failure(run, &err).await;
                Err(err)
            }
        }
    }

    async fn run_pass(&self, run: &Run, hint: &TriggerHint) -> Result<TriggerOutcome> {
        let workflow = &run.workflow;
        let graph = WorkflowGraph::build(workflow)?;

        let run_jobs = self
            .bounded
            .call("load_run_jobs", self.store.load_run_jobs(run.id, run.run_attempt))
            .await?;
        let run_results = self
            .bounded
            .call("load_run_results", self.store.load_run_results(run.id, run.run_attempt))
            .await?;

        let jobs = results::build_jobs_context(&self.matrix, workflow, &run_jobs, &run_results)?;
        let stages = self.stage_statuses(workflow, &graph, &jobs);
        let builder = ContextBuilder::new(run, &graph, &jobs);

        let mut pass = Pass {
            run,
            hint,
            created: Vec::new(),
            decisions: HashMap::new(),
            integrations: HashMap::new(),
            outcome: TriggerOutcome::default(),
        };

        for (name, job) in &workflow.jobs {
            let instances = results::instances_of(&run_jobs, name);
            let pending = results::pending_coordinates(&self.matrix, job, &instances)?;
            if pending.is_empty() {
                continue;
            }

            if !dependencies_met(&graph, &stages, &jobs, name, job) {
                debug!(run_id = %run.id, job = %name, "Dependencies not ended yet");
                continue;
            }

            self.process_job(&mut pass, &graph, &builder, &jobs, name, job, pending)
                .await?;
        }

        let Pass {
            created,
            mut outcome,
            ..
        } = pass;
        let mut all_jobs = run_jobs;
        all_jobs.extend(created);
        outcome.status = self.finalize(run, &all_jobs).await?;

        Ok(outcome)
    }

    /// Status of every ended stage: Fail if a job without `continue-on-error`
    /// failed, Success otherwise.
    fn stage_statuses(
        &self,
        workflow: &WorkflowDefinition,
        graph: &WorkflowGraph,
        jobs: &JobsResultContext,
    ) -> BTreeMap<String, JobStatus> {
        let mut statuses = BTreeMap::new();
        for stage in workflow.stages.keys() {
            let members = graph.stage_jobs(stage);
            if !members.iter().all(|j| jobs.contains_key(j)) {
                continue;
            }
            let failed = members.iter().any(|j| {
                jobs.get(j).is_some_and(|r| r.result == JobStatus::Fail)
                    && !workflow.jobs.get(j).is_some_and(|d| d.continue_on_error)
            });
            let status = if failed { JobStatus::Fail } else { JobStatus::Success };
            debug!(stage = %stage, status = status.as_str(), "Stage ended");
            statuses.insert(stage.clone(), status);
        }
        statuses
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_job(
        &self,
        pass: &mut Pass<'_>,
        graph: &WorkflowGraph,
        builder: &ContextBuilder<'_>,
        jobs: &JobsResultContext,
        name: &str,
        job: &JobDefinition,
        pending: Vec<Matrix>,
    ) -> Result<()> {
        let run = pass.run;
        let variable_sets = self.load_variable_sets(&run.project_key, &job.vars).await?;

        let gate = job.gate.as_ref().and_then(|g| run.workflow.gates.get(g));
        let gate_inputs = gate.map(|g| g.default_inputs()).unwrap_or_default();
        let base = builder.build(name, &variable_sets, &Matrix::new(), gate_inputs.clone())?;
        let base_value = base.to_value()?;

        let ancestors_succeeded =
            self.conditions
                .ancestors_succeeded(&run.workflow, &graph.ancestors(name), jobs);
        if !self
            .conditions
            .evaluate(job.condition.as_deref(), &base_value, ancestors_succeeded)?
        {
            info!(run_id = %run.id, job = %name, "Condition not satisfied, skipping job");
            let message = format!("Job \"{name}\": The condition is not satisfied");
            let instances = self.unresolved(job, pending);
            return self.skip(pass, name, instances, &gate_inputs, message).await;
        }

        if !pass.hint.is_admin_with_mfa {
            for set_name in &job.vars {
                let resource = Resource::VariableSet(set_name.clone());
                if !self.authorized(pass, &resource, Role::Use).await? {
                    let message = denial_message(&pass.hint.user, &resource);
                    let instances = self.unresolved(job, pending);
                    return self.skip(pass, name, instances, &gate_inputs, message).await;
                }
            }
        }

        let mut resolved = Vec::with_capacity(pending.len());
        for matrix in pending {
            let mut context = base.clone();
            context.matrix = matrix.clone();
            let context = context.to_value()?;
            resolved.push(self.resolve_instance(pass, job, matrix, &context).await?);
        }

        let mut allowed = Vec::with_capacity(resolved.len());
        let mut denied: BTreeMap<String, Vec<ResolvedInstance>> = BTreeMap::new();
        for instance in resolved {
            let resource = Resource::Region(instance.region.clone());
            if pass.hint.is_admin_with_mfa || self.authorized(pass, &resource, Role::Execute).await? {
                allowed.push(instance);
            } else {
                denied.entry(instance.region.clone()).or_default().push(instance);
            }
        }
        for (region, instances) in denied {
            let message = denial_message(&pass.hint.user, &Resource::Region(region));
            self.skip(pass, name, instances, &gate_inputs, message).await?;
        }

        if let Some(gate) = gate
            && !self
                .gates
                .can_proceed(gate, &pass.hint.user, pass.hint.is_admin_with_mfa, &base_value)?
        {
            info!(run_id = %run.id, job = %name, "Gate not satisfied, job stays pending");
            return Ok(());
        }

        for instance in allowed {
            let label = self.matrix.display_name(name, &instance.matrix);
            let run_job = self.new_run_job(
                pass,
                name,
                instance.job,
                instance.matrix,
                instance.region,
                JobStatus::Waiting,
                gate_inputs.clone(),
            );
            let infos = instance
                .enabled_integrations
                .iter()
                .map(|integration| {
                    RunInfo::new(
                        run.id,
                        InfoLevel::Info,
                        format!("Integration \"{integration}\" enabled on job \"{name}\""),
                    )
                    .for_job(run_job.id)
                })
                .collect();
            if self.persist(pass, run_job, infos).await? {
                info!(run_id = %run.id, job = %label, "Job instance queued");
            }
        }

        Ok(())
    }

    async fn load_variable_sets(&self, project_key: &str, names: &[String]) -> Result<Vec<VariableSet>> {
        let mut sets = Vec::with_capacity(names.len());
        for name in names {
            let set = self
                .bounded
                .call(
                    "load_variable_set",
                    self.store.load_variable_set(project_key, name, true),
                )
                .await?
                .ok_or_else(|| Error::VariableSetNotFound(name.clone()))?;
            sets.push(set);
        }
        Ok(sets)
    }

    async fn load_integration(&self, pass: &mut Pass<'_>, name: &str) -> Result<ProjectIntegration> {
        if let Some(integration) = pass.integrations.get(name) {
            return Ok(integration.clone());
        }
        let integration = self
            .bounded
            .call(
                "load_integration",
                self.store.load_integration(&pass.run.project_key, name, false),
            )
            .await?
            .ok_or_else(|| Error::IntegrationNotFound(name.to_string()))?;
        pass.integrations.insert(name.to_string(), integration.clone());
        Ok(integration)
    }

    /// Interpolate integration names and region against the coordinate's
    /// context, then resolve the integrations and the region.
    async fn resolve_instance(
        &self,
        pass: &mut Pass<'_>,
        job: &JobDefinition,
        matrix: Matrix,
        context: &serde_json::Value,
    ) -> Result<ResolvedInstance> {
        let mut resolved = job.clone();
        resolved.integrations = job
            .integrations
            .iter()
            .map(|name| interpolate(name, context))
            .collect::<Result<_>>()?;
        let workflow_names = pass
            .run
            .workflow
            .integrations
            .iter()
            .map(|name| interpolate(name, context))
            .collect::<Result<Vec<_>>>()?;

        let mut job_level = Vec::with_capacity(resolved.integrations.len());
        for name in &resolved.integrations {
            job_level.push(self.load_integration(pass, name).await?);
        }
        let mut workflow_level = Vec::with_capacity(workflow_names.len());
        for name in &workflow_names {
            workflow_level.push(self.load_integration(pass, name).await?);
        }
        let enabled = integrations_context(&job_level, &workflow_level)?;

        let region = match job.region.as_deref().map(str::trim) {
            Some(region) if !region.is_empty() => interpolate(region, context)?,
            _ => job_level
                .iter()
                .chain(&workflow_level)
                .find_map(|i| i.region())
                .map(str::to_string)
                .unwrap_or_else(|| self.default_region.clone()),
        };
        resolved.region = Some(region.clone());

        Ok(ResolvedInstance {
            job: resolved,
            matrix,
            region,
            enabled_integrations: enabled
                .artifact_manager
                .iter()
                .chain(enabled.deployment.iter())
                .map(|i| i.name.clone())
                .collect(),
        })
    }

    async fn authorized(&self, pass: &mut Pass<'_>, resource: &Resource, role: Role) -> Result<bool> {
        if let Some(decision) = pass.decisions.get(resource) {
            return Ok(*decision);
        }
        let decision = self
            .bounded
            .call(
                "has_role",
                self.authorizer
                    .has_role(pass.hint.user.id, &pass.run.project_key, resource, role),
            )
            .await?;
        if !decision {
            warn!(
                run_id = %pass.run.id,
                user = %pass.hint.user.username,
                resource = %resource,
                role = role.as_str(),
                "Authorization denied"
            );
        }
        pass.decisions.insert(resource.clone(), decision);
        Ok(decision)
    }

    /// Coordinates skipped before their integrations and region were
    /// resolved keep the job as declared.
    fn unresolved(&self, job: &JobDefinition, coordinates: Vec<Matrix>) -> Vec<ResolvedInstance> {
        let region = job
            .region
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| self.default_region.clone());
        coordinates
            .into_iter()
            .map(|matrix| ResolvedInstance {
                job: job.clone(),
                matrix,
                region: region.clone(),
                enabled_integrations: Vec::new(),
            })
            .collect()
    }

    /// Create a Skipped instance per coordinate. The explanation goes with
    /// the first instance.
    async fn skip(
        &self,
        pass: &mut Pass<'_>,
        name: &str,
        instances: Vec<ResolvedInstance>,
        gate_inputs: &BTreeMap<String, serde_json::Value>,
        message: String,
    ) -> Result<()> {
        let mut info = Some(RunInfo::new(pass.run.id, InfoLevel::Warning, message));

        for instance in instances {
            let run_job = self.new_run_job(
                pass,
                name,
                instance.job,
                instance.matrix,
                instance.region,
                JobStatus::Skipped,
                gate_inputs.clone(),
            );
            let infos = info.take().into_iter().collect();
            self.persist(pass, run_job, infos).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn new_run_job(
        &self,
        pass: &Pass<'_>,
        name: &str,
        job: JobDefinition,
        matrix: Matrix,
        region: String,
        status: JobStatus,
        gate_inputs: BTreeMap<String, serde_json::Value>,
    ) -> RunJob {
        let now = Utc::now();
        let run = pass.run;
        RunJob {
            id: RunJobId::new(),
            run_id: run.id,
            project_key: run.project_key.clone(),
            workflow_name: run.workflow_name.clone(),
            run_number: run.run_number,
            run_attempt: run.run_attempt,
            job_id: name.to_string(),
            job,
            status,
            matrix,
            region,
            gate_inputs,
            user_id: pass.hint.user.id,
            username: pass.hint.user.username.clone(),
            queued: now,
            started: None,
            ended: (status == JobStatus::Skipped).then_some(now),
        }
    }

    /// Insert one instance and its infos in a single transaction. Returns
    /// false when another pass created the same instance first.
    async fn persist(&self, pass: &mut Pass<'_>, run_job: RunJob, infos: Vec<RunInfo>) -> Result<bool> {
        let mut tx = self.bounded.call("begin", self.store.begin()).await?;

        match self
            .bounded
            .call("insert_run_job", tx.insert_run_job(&run_job))
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                debug!(
                    run_id = %run_job.run_id,
                    job = %run_job.job_id,
                    "Instance already created by a concurrent pass"
                );
                return Ok(false);
            }
            Err(err) => return Err(err),
        }
        for info in &infos {
            self.bounded
                .call("insert_run_info", tx.insert_run_info(info))
                .await?;
        }
        self.bounded.call("commit", tx.commit()).await?;

        if run_job.status == JobStatus::Skipped {
            pass.outcome.skipped += 1;
        } else {
            pass.outcome.created += 1;
        }
        pass.created.push(run_job);
        Ok(true)
    }

    /// Persist the run status once every job has ended, if it changed.
    async fn finalize(&self, run: &Run, all_jobs: &[RunJob]) -> Result<Option<RunStatus>> {
        for (name, job) in &run.workflow.jobs {
            let instances = results::instances_of(all_jobs, name);
            if !results::job_ended(&self.matrix, job, &instances)? {
                return Ok(None);
            }
        }

        let status = compute_run_status(&run.workflow, all_jobs);
        if status == run.status {
            return Ok(None);
        }

        let mut tx = self.bounded.call("begin", self.store.begin()).await?;
        self.bounded
            .call("update_run_status", tx.update_run_status(run.id, status))
            .await?;
        self.bounded.call("commit", tx.commit()).await?;

        info!(run_id = %run.id, status = status.as_str(), "Run finished");
        Ok(Some(status))
    }

    async fn record_failure(&self, run: &Run, err: &Error) {
        let info = RunInfo::new(run.id, InfoLevel::Error, err.to_string());
        let recorded: Result<()> = async {
            let mut tx = self.bounded.call("begin", self.store.begin()).await?;
            self.bounded
                .call("insert_run_info", tx.insert_run_info(&info))
                .await?;
            self.bounded.call("commit", tx.commit()).await
        }
        .await;

        if let Err(e) = recorded {
            warn!(run_id = %run.id, error = %e, "Unable to record trigger failure");
        }
    }
}

/// Stopped if any instance stopped, else Fail if a job without
/// `continue-on-error` failed, else Success.
pub fn compute_run_status(workflow: &WorkflowDefinition, run_jobs: &[RunJob]) -> RunStatus {
    if run_jobs.iter().any(|rj| rj.status == JobStatus::Stopped) {
        return RunStatus::Stopped;
    }
    let failed = run_jobs.iter().any(|rj| {
        rj.status == JobStatus::Fail
            && !workflow
                .jobs
                .get(&rj.job_id)
                .is_some_and(|j| j.continue_on_error)
    });
    if failed { RunStatus::Fail } else { RunStatus::Success }
}

fn dependencies_met(
    graph: &WorkflowGraph,
    stages: &BTreeMap<String, JobStatus>,
    jobs: &JobsResultContext,
    name: &str,
    job: &JobDefinition,
) -> bool {
    if let Some(stage) = graph.stage_of(name)
        && !graph
            .stage_needs(stage)
            .iter()
            .all(|needed| stages.contains_key(needed))
    {
        return false;
    }
    job.needs.iter().all(|need| jobs.contains_key(need))
}

fn denial_message(user: &User, resource: &Resource) -> String {
    format!(
        "User {} does not have enough right on {}",
        user.username, resource
    )
}
