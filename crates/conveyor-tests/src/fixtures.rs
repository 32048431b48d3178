//! Test fixtures for creating sample data.

use chrono::Utc;
use conveyor_core::ids::{IntegrationId, RunId, RunJobId, RunResultId, UserId, VariableSetId};
use conveyor_core::integration::{ConfigValueType, IntegrationConfigValue, IntegrationModel, ProjectIntegration};
use conveyor_core::run::{
    CdsContext, GitContext, JobStatus, Matrix, Run, RunContext, RunJob, RunResult, RunResultDetail, RunStatus,
};
use conveyor_core::user::User;
use conveyor_core::variables::{VariableSet, VariableSetItem};
use conveyor_core::workflow::WorkflowDefinition;
use std::collections::BTreeMap;

pub const PROJECT_KEY: &str = "PROJ";

/// Factory for creating test users.
pub struct UserFixture;

impl UserFixture {
    pub fn named(username: &str) -> User {
        User {
            id: UserId::new(),
            username: username.to_string(),
            groups: vec![],
        }
    }

    pub fn with_groups(username: &str, groups: &[&str]) -> User {
        User {
            groups: groups.iter().map(|g| g.to_string()).collect(),
            ..Self::named(username)
        }
    }
}

/// Factory for creating test runs.
pub struct RunFixture;

impl RunFixture {
    /// A building run at attempt 1, started by `user`.
    pub fn new(workflow: WorkflowDefinition, user: &User) -> Run {
        let id = RunId::new();
        let workflow_name = if workflow.name.is_empty() {
            "my-workflow".to_string()
        } else {
            workflow.name.clone()
        };
        Run {
            id,
            project_key: PROJECT_KEY.to_string(),
            workflow_name: workflow_name.clone(),
            run_number: 1,
            run_attempt: 1,
            status: RunStatus::Building,
            user_id: user.id,
            username: user.username.clone(),
            workflow,
            contexts: RunContext {
                cds: CdsContext {
                    project_key: PROJECT_KEY.to_string(),
                    workflow: workflow_name,
                    run_id: id.to_string(),
                    run_number: 1,
                    run_attempt: 1,
                    triggering_actor: user.username.clone(),
                    ..Default::default()
                },
                git: GitContext {
                    server: Some("github".to_string()),
                    repository: Some("acme/app".to_string()),
                    git_ref: Some("refs/heads/main".to_string()),
                    sha: Some("4f2b9c1".to_string()),
                },
                env: BTreeMap::new(),
            },
            started: Utc::now(),
            last_modified: Utc::now(),
        }
    }

    /// A run job of `run` without matrix.
    pub fn run_job(run: &Run, job: &str, status: JobStatus) -> RunJob {
        Self::matrix_job(run, job, Matrix::new(), status)
    }

    pub fn matrix_job(run: &Run, job: &str, matrix: Matrix, status: JobStatus) -> RunJob {
        RunJob {
            id: RunJobId::new(),
            run_id: run.id,
            project_key: run.project_key.clone(),
            workflow_name: run.workflow_name.clone(),
            run_number: run.run_number,
            run_attempt: run.run_attempt,
            job_id: job.to_string(),
            job: run.workflow.jobs.get(job).cloned().unwrap_or_default(),
            status,
            matrix,
            region: "default".to_string(),
            gate_inputs: BTreeMap::new(),
            user_id: run.user_id,
            username: run.username.clone(),
            queued: Utc::now(),
            started: None,
            ended: status.is_terminal().then(Utc::now),
        }
    }

    /// A variable result uploaded by `run_job`.
    pub fn variable_result(run_job: &RunJob, name: &str, value: &str) -> RunResult {
        RunResult {
            id: RunResultId::new(),
            run_id: run_job.run_id,
            run_job_id: run_job.id,
            run_attempt: run_job.run_attempt,
            detail: RunResultDetail::Variable {
                name: name.to_string(),
                value: value.to_string(),
            },
        }
    }
}

/// Factory for creating variable sets.
pub struct VariableSetFixture;

impl VariableSetFixture {
    pub fn new(name: &str, items: Vec<VariableSetItem>) -> VariableSet {
        VariableSet {
            id: VariableSetId::new(),
            project_key: PROJECT_KEY.to_string(),
            name: name.to_string(),
            items,
        }
    }
}

/// Factory for creating project integrations.
pub struct IntegrationFixture;

impl IntegrationFixture {
    /// An artifact manager with a password token and an optional region.
    pub fn artifact_manager(name: &str, region: Option<&str>) -> ProjectIntegration {
        let mut config = BTreeMap::new();
        config.insert(
            "url".to_string(),
            IntegrationConfigValue::new("https://artifacts.acme.dev", ConfigValueType::String),
        );
        config.insert(
            "token".to_string(),
            IntegrationConfigValue::new(format!("{name}-token"), ConfigValueType::Password),
        );
        if let Some(region) = region {
            config.insert(
                "cds.region".to_string(),
                IntegrationConfigValue::new(region, ConfigValueType::Region),
            );
        }
        Self::with_model(
            name,
            IntegrationModel::ArtifactManager {
                platform: "artifactory".to_string(),
            },
            config,
        )
    }

    pub fn deployment(name: &str) -> ProjectIntegration {
        Self::with_model(
            name,
            IntegrationModel::Deployment {
                platform: "helm".to_string(),
            },
            BTreeMap::new(),
        )
    }

    pub fn hook(name: &str) -> ProjectIntegration {
        Self::with_model(
            name,
            IntegrationModel::Hook {
                platform: "slack".to_string(),
            },
            BTreeMap::new(),
        )
    }

    fn with_model(
        name: &str,
        model: IntegrationModel,
        config: BTreeMap<String, IntegrationConfigValue>,
    ) -> ProjectIntegration {
        ProjectIntegration {
            id: IntegrationId::new(),
            project_key: PROJECT_KEY.to_string(),
            name: name.to_string(),
            model,
            config,
        }
    }
}
