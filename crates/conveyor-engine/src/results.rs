//! Derivation of job results from persisted run jobs.

use crate::matrix::MatrixExpander;
use conveyor_core::context::{JobResult, JobsResultContext};
use conveyor_core::run::{JobStatus, RunJob, RunResult, RunResultDetail, matrix_key};
use conveyor_core::workflow::{JobDefinition, WorkflowDefinition};
use conveyor_core::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Instances of one job in the current attempt.
pub fn instances_of<'a>(run_jobs: &'a [RunJob], job: &str) -> Vec<&'a RunJob> {
    run_jobs.iter().filter(|rj| rj.job_id == job).collect()
}

/// Matrix keys of a job that have no instance yet.
///
/// A job without strategy needs a single instance, and any existing instance
/// satisfies it.
pub fn pending_coordinates(
    expander: &MatrixExpander,
    job: &JobDefinition,
    instances: &[&RunJob],
) -> Result<Vec<conveyor_core::run::Matrix>> {
    if !job.has_matrix() {
        return Ok(if instances.is_empty() {
            vec![Default::default()]
        } else {
            vec![]
        });
    }

    let existing: BTreeSet<String> = instances.iter().map(|rj| matrix_key(&rj.matrix)).collect();
    Ok(expander
        .expand(&job.matrix_axes())?
        .into_iter()
        .filter(|coordinate| !existing.contains(&matrix_key(coordinate)))
        .collect())
}

/// Whether every required instance of a job exists and has ended.
pub fn job_ended(expander: &MatrixExpander, job: &JobDefinition, instances: &[&RunJob]) -> Result<bool> {
    if instances.is_empty() || instances.iter().any(|rj| !rj.status.is_terminal()) {
        return Ok(false);
    }
    Ok(pending_coordinates(expander, job, instances)?.is_empty())
}

/// Fold matrix siblings into one status.
pub fn fold_status(instances: &[&RunJob]) -> JobStatus {
    if instances.iter().any(|rj| rj.status == JobStatus::Fail) {
        JobStatus::Fail
    } else if instances.iter().any(|rj| rj.status == JobStatus::Stopped) {
        JobStatus::Stopped
    } else if instances.iter().all(|rj| rj.status == JobStatus::Skipped) {
        JobStatus::Skipped
    } else {
        JobStatus::Success
    }
}

/// Build the results of every ended job from the attempt's run jobs and results.
pub fn build_jobs_context(
    expander: &MatrixExpander,
    workflow: &WorkflowDefinition,
    run_jobs: &[RunJob],
    run_results: &[RunResult],
) -> Result<JobsResultContext> {
    let mut context = JobsResultContext::new();

    for (name, job) in &workflow.jobs {
        let instances = instances_of(run_jobs, name);
        if !job_ended(expander, job, &instances)? {
            continue;
        }

        let ids: BTreeSet<_> = instances.iter().map(|rj| rj.id).collect();
        let mut outputs = BTreeMap::new();
        let mut run_results_by_name = BTreeMap::new();
        for result in run_results.iter().filter(|r| ids.contains(&r.run_job_id)) {
            match &result.detail {
                RunResultDetail::Variable { name, value } => {
                    outputs.insert(name.clone(), value.clone());
                }
                other => {
                    run_results_by_name.insert(other.name().to_string(), serde_json::to_value(other)?);
                }
            }
        }

        context.insert(
            name.clone(),
            JobResult {
                result: fold_status(&instances),
                outputs,
                run_results: run_results_by_name,
            },
        );
    }

    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::ids::{RunId, RunJobId, RunResultId, UserId};
    use conveyor_core::run::Matrix;
    use conveyor_core::workflow::Strategy;
    use serde_json::json;

    fn run_job(job: &str, status: JobStatus, matrix: &[(&str, &str)]) -> RunJob {
        RunJob {
            id: RunJobId::new(),
            run_id: RunId::new(),
            project_key: "PROJ".into(),
            workflow_name: "wf".into(),
            run_number: 1,
            run_attempt: 1,
            job_id: job.into(),
            job: JobDefinition::default(),
            status,
            matrix: matrix.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            region: "default".into(),
            gate_inputs: Default::default(),
            user_id: UserId::new(),
            username: "alice".into(),
            queued: chrono::Utc::now(),
            started: None,
            ended: None,
        }
    }

    fn matrix_job() -> JobDefinition {
        JobDefinition {
            strategy: Some(Strategy {
                matrix: serde_json::from_value(json!({"os": ["linux", "macos"]})).unwrap(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pending_coordinates() {
        let expander = MatrixExpander::new();
        let linux = run_job("build", JobStatus::Waiting, &[("os", "linux")]);
        let pending = pending_coordinates(&expander, &matrix_job(), &[&linux]).unwrap();
        let mut macos = Matrix::new();
        macos.insert("os".into(), "macos".into());
        assert_eq!(pending, vec![macos]);

        let plain = JobDefinition::default();
        assert_eq!(pending_coordinates(&expander, &plain, &[]).unwrap().len(), 1);
        assert!(pending_coordinates(&expander, &plain, &[&linux]).unwrap().is_empty());
    }

    #[test]
    fn test_pending_coordinates_with_separator_values() {
        let expander = MatrixExpander::new();
        let job = JobDefinition {
            strategy: Some(Strategy {
                matrix: serde_json::from_value(json!({"a": ["x,b=y", "x"], "b": ["z", "y,b=z"]}))
                    .unwrap(),
            }),
            ..Default::default()
        };
        let first = run_job("build", JobStatus::Waiting, &[("a", "x,b=y"), ("b", "z")]);

        let pending = pending_coordinates(&expander, &job, &[&first]).unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().any(|m| m["a"] == "x" && m["b"] == "y,b=z"));
        assert!(!pending.contains(&first.matrix));
    }

    #[test]
    fn test_matrix_job_ends_with_all_siblings() {
        let expander = MatrixExpander::new();
        let job = matrix_job();
        let linux = run_job("build", JobStatus::Fail, &[("os", "linux")]);
        let macos = run_job("build", JobStatus::Building, &[("os", "macos")]);
        assert!(!job_ended(&expander, &job, &[&linux]).unwrap());
        assert!(!job_ended(&expander, &job, &[&linux, &macos]).unwrap());

        let macos = run_job("build", JobStatus::Success, &[("os", "macos")]);
        assert!(job_ended(&expander, &job, &[&linux, &macos]).unwrap());
        assert_eq!(fold_status(&[&linux, &macos]), JobStatus::Fail);
    }

    #[test]
    fn test_fold_status() {
        let skipped = run_job("a", JobStatus::Skipped, &[]);
        let success = run_job("a", JobStatus::Success, &[]);
        let stopped = run_job("a", JobStatus::Stopped, &[]);
        assert_eq!(fold_status(&[&skipped]), JobStatus::Skipped);
        assert_eq!(fold_status(&[&skipped, &success]), JobStatus::Success);
        assert_eq!(fold_status(&[&stopped, &success]), JobStatus::Stopped);
    }

    #[test]
    fn test_build_jobs_context_with_results() {
        let expander = MatrixExpander::new();
        let mut wf = WorkflowDefinition::default();
        wf.jobs.insert("build".into(), JobDefinition::default());
        wf.jobs.insert("test".into(), JobDefinition::default());

        let build = run_job("build", JobStatus::Success, &[]);
        let test = run_job("test", JobStatus::Building, &[]);
        let results = vec![
            RunResult {
                id: RunResultId::new(),
                run_id: build.run_id,
                run_job_id: build.id,
                run_attempt: 1,
                detail: RunResultDetail::Variable {
                    name: "version".into(),
                    value: "1.2.0".into(),
                },
            },
            RunResult {
                id: RunResultId::new(),
                run_id: build.run_id,
                run_job_id: build.id,
                run_attempt: 1,
                detail: RunResultDetail::Artifact {
                    name: "app.tar.gz".into(),
                    path: "dist".into(),
                    size: 42,
                    md5: "abc".into(),
                },
            },
        ];

        let ctx = build_jobs_context(&expander, &wf, &[build, test], &results).unwrap();
        assert_eq!(ctx.len(), 1);
        let build = &ctx["build"];
        assert_eq!(build.result, JobStatus::Success);
        assert_eq!(build.outputs["version"], "1.2.0");
        assert_eq!(build.run_results["app.tar.gz"]["size"], 42);
    }
}
