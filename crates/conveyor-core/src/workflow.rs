//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML. A run freezes a copy
//! of the definition at creation time, so every trigger pass for that run sees
//! the same graph.

use crate::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stages: BTreeMap<String, StageDefinition>,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobDefinition>,
    #[serde(default)]
    pub gates: BTreeMap<String, GateDefinition>,
    /// Environment inherited by every job.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Integrations inherited by every job.
    #[serde(default)]
    pub integrations: Vec<String>,
}

impl WorkflowDefinition {
    /// Parse a workflow from its YAML representation.
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Whether jobs are grouped into stages rather than chained by flat needs.
    pub fn uses_stages(&self) -> bool {
        !self.stages.is_empty()
    }

    /// JSON schema of the workflow document.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(WorkflowDefinition)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageDefinition {
    #[serde(default)]
    pub needs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default)]
    pub gate: Option<String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    /// Variable sets bound to the job.
    #[serde(default)]
    pub vars: Vec<String>,
    #[serde(default)]
    pub integrations: Vec<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub runs_on: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl JobDefinition {
    /// Matrix axes of the job, empty when it has no strategy.
    pub fn matrix_axes(&self) -> BTreeMap<String, serde_json::Value> {
        self.strategy
            .as_ref()
            .map(|s| s.matrix.clone())
            .unwrap_or_default()
    }

    pub fn has_matrix(&self) -> bool {
        self.strategy.as_ref().is_some_and(|s| !s.matrix.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Strategy {
    /// Axis name to ordered list of scalar values.
    #[serde(default)]
    pub matrix: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GateDefinition {
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, GateInput>,
    #[serde(default)]
    pub reviewers: GateReviewers,
}

impl GateDefinition {
    /// Default value of every input, as exposed in the `gate` context.
    pub fn default_inputs(&self) -> BTreeMap<String, serde_json::Value> {
        self.inputs
            .iter()
            .map(|(name, input)| {
                let value = input
                    .default
                    .clone()
                    .unwrap_or_else(|| input.input_type.zero_value());
                (name.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GateReviewers {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl GateReviewers {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GateInput {
    #[serde(rename = "type", default)]
    pub input_type: GateInputType,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateInputType {
    #[default]
    String,
    Boolean,
    Number,
}

impl GateInputType {
    fn zero_value(&self) -> serde_json::Value {
        match self {
            GateInputType::String => serde_json::Value::String(String::new()),
            GateInputType::Boolean => serde_json::Value::Bool(false),
            GateInputType::Number => serde_json::json!(0),
        }
    }
}
