//! Run and execution types.

use crate::ids::{RunId, RunInfoId, RunJobId, RunResultId, UserId};
use crate::workflow::{JobDefinition, WorkflowDefinition};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One concrete matrix coordinate: axis name to stringified value.
pub type Matrix = BTreeMap<String, String>;

/// Canonical key of a matrix coordinate, used for uniqueness checks.
///
/// A JSON object with sorted keys, so axis names and values holding `,` or
/// `=` cannot collide.
pub fn matrix_key(matrix: &Matrix) -> String {
    serde_json::Value::Object(
        matrix
            .iter()
            .map(|(axis, value)| (axis.clone(), serde_json::Value::String(value.clone())))
            .collect(),
    )
    .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    pub id: RunId,
    pub project_key: String,
    pub workflow_name: String,
    pub run_number: i64,
    pub run_attempt: i32,
    pub status: RunStatus,
    pub user_id: UserId,
    pub username: String,
    pub workflow: WorkflowDefinition,
    pub contexts: RunContext,
    pub started: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RunStatus {
    Building,
    Success,
    Fail,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Building)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Building => "Building",
            RunStatus::Success => "Success",
            RunStatus::Fail => "Fail",
            RunStatus::Stopped => "Stopped",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Building" => Ok(RunStatus::Building),
            "Success" => Ok(RunStatus::Success),
            "Fail" => Ok(RunStatus::Fail),
            "Stopped" => Ok(RunStatus::Stopped),
            other => Err(crate::Error::Serialization(format!(
                "unknown run status {other:?}"
            ))),
        }
    }
}

/// Static values known when the run was created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RunContext {
    pub cds: CdsContext,
    #[serde(default)]
    pub git: GitContext,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CdsContext {
    pub project_key: String,
    pub workflow: String,
    pub run_id: String,
    pub run_number: i64,
    pub run_attempt: i32,
    pub triggering_actor: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub stage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GitContext {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
}

/// One schedulable unit: a job name plus a matrix coordinate within a run attempt.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunJob {
    pub id: RunJobId,
    pub run_id: RunId,
    pub project_key: String,
    pub workflow_name: String,
    pub run_number: i64,
    pub run_attempt: i32,
    pub job_id: String,
    /// Resolved job snapshot with integrations interpolated and region set.
    pub job: JobDefinition,
    pub status: JobStatus,
    #[serde(default)]
    pub matrix: Matrix,
    pub region: String,
    #[serde(default)]
    pub gate_inputs: BTreeMap<String, serde_json::Value>,
    pub user_id: UserId,
    pub username: String,
    pub queued: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum JobStatus {
    Scheduling,
    Waiting,
    Building,
    Success,
    Fail,
    Skipped,
    Stopped,
}

impl JobStatus {
    /// Only ended instances count towards dependency satisfaction.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Fail | JobStatus::Skipped | JobStatus::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduling => "Scheduling",
            JobStatus::Waiting => "Waiting",
            JobStatus::Building => "Building",
            JobStatus::Success => "Success",
            JobStatus::Fail => "Fail",
            JobStatus::Skipped => "Skipped",
            JobStatus::Stopped => "Stopped",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scheduling" => Ok(JobStatus::Scheduling),
            "Waiting" => Ok(JobStatus::Waiting),
            "Building" => Ok(JobStatus::Building),
            "Success" => Ok(JobStatus::Success),
            "Fail" => Ok(JobStatus::Fail),
            "Skipped" => Ok(JobStatus::Skipped),
            "Stopped" => Ok(JobStatus::Stopped),
            other => Err(crate::Error::Serialization(format!(
                "unknown job status {other:?}"
            ))),
        }
    }
}

/// Append-only diagnostic entry attached to a run, or to one of its jobs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunInfo {
    pub id: RunInfoId,
    pub run_id: RunId,
    pub run_job_id: Option<RunJobId>,
    pub level: InfoLevel,
    pub message: String,
    pub issued_at: DateTime<Utc>,
}

impl RunInfo {
    pub fn new(run_id: RunId, level: InfoLevel, message: impl Into<String>) -> Self {
        Self {
            id: RunInfoId::new(),
            run_id,
            run_job_id: None,
            level,
            message: message.into(),
            issued_at: Utc::now(),
        }
    }

    /// Attach the entry to a run job.
    pub fn for_job(mut self, run_job_id: RunJobId) -> Self {
        self.run_job_id = Some(run_job_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InfoLevel {
    Info,
    Warning,
    Error,
}

impl InfoLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoLevel::Info => "info",
            InfoLevel::Warning => "warning",
            InfoLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for InfoLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(InfoLevel::Info),
            "warning" => Ok(InfoLevel::Warning),
            "error" => Ok(InfoLevel::Error),
            other => Err(crate::Error::Serialization(format!(
                "unknown info level {other:?}"
            ))),
        }
    }
}

/// A result uploaded by a run job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunResult {
    pub id: RunResultId,
    pub run_id: RunId,
    pub run_job_id: RunJobId,
    pub run_attempt: i32,
    pub detail: RunResultDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunResultDetail {
    /// Becomes a job output.
    Variable { name: String, value: String },
    Artifact {
        name: String,
        path: String,
        size: i64,
        md5: String,
    },
    Coverage {
        name: String,
        percent: f64,
    },
}

impl RunResultDetail {
    pub fn name(&self) -> &str {
        match self {
            RunResultDetail::Variable { name, .. }
            | RunResultDetail::Artifact { name, .. }
            | RunResultDetail::Coverage { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_key_is_sorted() {
        let mut matrix = Matrix::new();
        matrix.insert("os".into(), "linux".into());
        matrix.insert("arch".into(), "amd64".into());
        assert_eq!(matrix_key(&matrix), r#"{"arch":"amd64","os":"linux"}"#);
        assert_eq!(matrix_key(&Matrix::new()), "{}");
    }

    #[test]
    fn test_matrix_key_separators_do_not_collide() {
        let left: Matrix = [("a", "x,b=y"), ("b", "z")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let right: Matrix = [("a", "x"), ("b", "y,b=z")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_ne!(matrix_key(&left), matrix_key(&right));
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Skipped.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(!JobStatus::Waiting.is_terminal());
        assert!(!JobStatus::Building.is_terminal());
        assert!(!JobStatus::Scheduling.is_terminal());
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [JobStatus::Waiting, JobStatus::Fail, JobStatus::Skipped] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("Running".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_run_result_detail_tagging() {
        let detail: RunResultDetail =
            serde_json::from_value(serde_json::json!({"type": "variable", "name": "v", "value": "1"}))
                .unwrap();
        assert_eq!(detail.name(), "v");
    }
}
