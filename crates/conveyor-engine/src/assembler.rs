//! Full execution context of a queued run job, as handed to a worker.

use crate::bounded::Bounded;
use crate::context::{ContextBuilder, integrations_context};
use crate::dag::WorkflowGraph;
use crate::matrix::MatrixExpander;
use crate::results;
use crate::secrets::SecretExtractor;
use conveyor_core::context::JobContext;
use conveyor_core::integration::ProjectIntegration;
use conveyor_core::interpolation::interpolate;
use conveyor_core::ports::Store;
use conveyor_core::run::{Run, RunJob};
use conveyor_core::variables::VariableSet;
use conveyor_core::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A job context together with the values a worker must redact.
#[derive(Debug, Clone)]
pub struct AssembledJob {
    pub context: JobContext,
    pub sensitive: BTreeSet<String>,
}

pub struct JobContextAssembler {
    store: Arc<dyn Store>,
    bounded: Bounded,
    matrix: MatrixExpander,
    secrets: SecretExtractor,
}

impl JobContextAssembler {
    pub fn new(store: Arc<dyn Store>, io_timeout: Duration) -> Self {
        Self {
            store,
            bounded: Bounded::new(io_timeout),
            matrix: MatrixExpander::new(),
            secrets: SecretExtractor::new(),
        }
    }

    /// Rebuild the context of `run_job` from current state, with decrypted
    /// variables and integrations.
    pub async fn assemble(&self, run: &Run, run_job: &RunJob) -> Result<AssembledJob> {
        let graph = WorkflowGraph::build(&run.workflow)?;
        let run_jobs = self
            .bounded
            .call("load_run_jobs", self.store.load_run_jobs(run.id, run_job.run_attempt))
            .await?;
        let run_results = self
            .bounded
            .call("load_run_results", self.store.load_run_results(run.id, run_job.run_attempt))
            .await?;
        let jobs = results::build_jobs_context(&self.matrix, &run.workflow, &run_jobs, &run_results)?;

        let mut variable_sets: Vec<VariableSet> = Vec::with_capacity(run_job.job.vars.len());
        for name in &run_job.job.vars {
            let set = self
                .bounded
                .call(
                    "load_variable_set",
                    self.store.load_variable_set(&run.project_key, name, true),
                )
                .await?
                .ok_or_else(|| Error::VariableSetNotFound(name.clone()))?;
            variable_sets.push(set);
        }

        let mut context = ContextBuilder::new(run, &graph, &jobs).build(
            &run_job.job_id,
            &variable_sets,
            &run_job.matrix,
            run_job.gate_inputs.clone(),
        )?;
        let value = context.to_value()?;

        // job integrations were interpolated when the instance was created
        let job_level = self.load_integrations(&run.project_key, &run_job.job.integrations).await?;
        let workflow_names = run
            .workflow
            .integrations
            .iter()
            .map(|name| interpolate(name, &value))
            .collect::<Result<Vec<_>>>()?;
        let workflow_level = self.load_integrations(&run.project_key, &workflow_names).await?;
        context.integrations = integrations_context(&job_level, &workflow_level)?;

        let all: Vec<ProjectIntegration> = job_level.into_iter().chain(workflow_level).collect();
        let sensitive = self.secrets.collect(&variable_sets, &all)?;

        debug!(
            run_job_id = %run_job.id,
            job = %run_job.job_id,
            sensitive = sensitive.len(),
            "Assembled job context"
        );
        Ok(AssembledJob { context, sensitive })
    }

    async fn load_integrations(&self, project_key: &str, names: &[String]) -> Result<Vec<ProjectIntegration>> {
        let mut integrations = Vec::with_capacity(names.len());
        for name in names {
            let integration = self
                .bounded
                .call(
                    "load_integration",
                    self.store.load_integration(project_key, name, true),
                )
                .await?
                .ok_or_else(|| Error::IntegrationNotFound(name.clone()))?;
            integrations.push(integration);
        }
        Ok(integrations)
    }
}
