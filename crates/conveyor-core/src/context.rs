//! Execution contexts handed to expressions and to the job dispatcher.

use crate::run::{CdsContext, GitContext, JobStatus, Matrix};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of one job, folded over its matrix siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub result: JobStatus,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub run_results: BTreeMap<String, serde_json::Value>,
}

impl JobResult {
    pub fn new(result: JobStatus) -> Self {
        Self {
            result,
            outputs: BTreeMap::new(),
            run_results: BTreeMap::new(),
        }
    }
}

/// Job name to folded result. Rebuilt on every trigger pass, never persisted.
pub type JobsResultContext = BTreeMap<String, JobResult>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IntegrationsContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_manager: Option<IntegrationContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<IntegrationContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationContext {
    pub name: String,
    pub platform: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Read-only execution context of a job instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub cds: CdsContext,
    pub git: GitContext,
    pub env: BTreeMap<String, String>,
    pub vars: serde_json::Map<String, serde_json::Value>,
    pub jobs: JobsResultContext,
    pub needs: JobsResultContext,
    pub matrix: Matrix,
    pub gate: BTreeMap<String, serde_json::Value>,
    pub integrations: IntegrationsContext,
}

impl JobContext {
    /// JSON view used as the root object of expression evaluation.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_json_shape() {
        let mut ctx = JobContext::default();
        ctx.cds.workflow = "build".into();
        let mut result = JobResult::new(JobStatus::Success);
        result.outputs.insert("version".into(), "1.2".into());
        ctx.needs.insert("compile".into(), result);

        let value = ctx.to_value().unwrap();
        assert_eq!(value["cds"]["workflow"], "build");
        assert_eq!(value["needs"]["compile"]["result"], "Success");
        assert_eq!(value["needs"]["compile"]["outputs"]["version"], "1.2");
        assert!(value["needs"]["compile"]["runResults"].is_object());
        assert!(value["integrations"].as_object().unwrap().is_empty());
    }
}
