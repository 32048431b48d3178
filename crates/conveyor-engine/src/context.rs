//! Assembly of the read-only execution context of a job.

use crate::dag::WorkflowGraph;
use conveyor_core::context::{IntegrationContext, IntegrationsContext, JobContext, JobsResultContext};
use conveyor_core::integration::{IntegrationModel, ProjectIntegration};
use conveyor_core::run::{JobStatus, Matrix, Run};
use conveyor_core::variables::VariableSet;
use conveyor_core::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Builds job contexts for one run from the current job results.
pub struct ContextBuilder<'a> {
    run: &'a Run,
    graph: &'a WorkflowGraph,
    jobs: &'a JobsResultContext,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(run: &'a Run, graph: &'a WorkflowGraph, jobs: &'a JobsResultContext) -> Self {
        Self { run, graph, jobs }
    }

    /// Build the context of a job for one matrix coordinate.
    ///
    /// `jobs` holds the ended ancestors, `needs` the direct dependencies with
    /// tolerated failures reported as successes. Integrations are resolved
    /// separately with [`integrations_context`].
    pub fn build(
        &self,
        job_name: &str,
        variable_sets: &[VariableSet],
        matrix: &Matrix,
        gate: BTreeMap<String, Value>,
    ) -> Result<JobContext> {
        let workflow = &self.run.workflow;
        let job = workflow
            .jobs
            .get(job_name)
            .ok_or_else(|| Error::InvalidWorkflow(format!("unknown job {job_name:?}")))?;

        let mut cds = self.run.contexts.cds.clone();
        cds.job = job_name.to_string();
        cds.stage = self.graph.stage_of(job_name).unwrap_or_default().to_string();

        let mut env = workflow.env.clone();
        env.extend(self.run.contexts.env.clone());
        env.extend(job.env.clone());

        let jobs = self
            .graph
            .ancestors(job_name)
            .into_iter()
            .filter_map(|name| self.jobs.get(&name).map(|r| (name, r.clone())))
            .collect();

        let needs = self
            .graph
            .needs_context_jobs(job_name)
            .into_iter()
            .filter_map(|name| {
                let mut result = self.jobs.get(&name)?.clone();
                let tolerated = workflow.jobs.get(&name).is_some_and(|j| j.continue_on_error);
                if tolerated && result.result == JobStatus::Fail {
                    result.result = JobStatus::Success;
                }
                Some((name, result))
            })
            .collect();

        Ok(JobContext {
            cds,
            git: self.run.contexts.git.clone(),
            env,
            vars: vars_context(variable_sets),
            jobs,
            needs,
            matrix: matrix.clone(),
            gate,
            integrations: IntegrationsContext::default(),
        })
    }
}

/// Variable set name to item name to value. Items holding a JSON object or
/// array are parsed so expressions can index into them.
pub fn vars_context(variable_sets: &[VariableSet]) -> Map<String, Value> {
    variable_sets
        .iter()
        .map(|set| {
            let items: Map<String, Value> = set
                .items
                .iter()
                .map(|item| (item.name.clone(), parse_item_value(&item.value)))
                .collect();
            (set.name.clone(), Value::Object(items))
        })
        .collect()
}

/// Whether a value is shaped like a JSON object or array.
pub fn looks_like_json(value: &str) -> bool {
    let trimmed = value.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

fn parse_item_value(value: &str) -> Value {
    if looks_like_json(value)
        && let Ok(parsed) = serde_json::from_str::<Value>(value.trim())
    {
        return parsed;
    }
    Value::String(value.to_string())
}

/// Resolve at most one artifact manager and one deployment integration.
/// Job-level integrations come first and win over workflow-level ones.
pub fn integrations_context(
    job_integrations: &[ProjectIntegration],
    workflow_integrations: &[ProjectIntegration],
) -> Result<IntegrationsContext> {
    let mut context = IntegrationsContext::default();

    for integration in job_integrations.iter().chain(workflow_integrations) {
        let slot = match &integration.model {
            IntegrationModel::ArtifactManager { .. } => &mut context.artifact_manager,
            IntegrationModel::Deployment { .. } => &mut context.deployment,
            IntegrationModel::Hook { .. } | IntegrationModel::Event { .. } => {
                return Err(Error::UnsupportedIntegration(integration.name.clone()));
            }
        };
        if slot.is_none() {
            *slot = Some(IntegrationContext {
                name: integration.name.clone(),
                platform: integration.model.platform().to_string(),
                config: integration
                    .config
                    .iter()
                    .map(|(k, v)| (k.clone(), v.value.clone()))
                    .collect(),
            });
        }
    }

    Ok(context)
}
