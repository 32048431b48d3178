//! Project variable sets.

use crate::ids::VariableSetId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named, project-scoped collection of items.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VariableSet {
    pub id: VariableSetId,
    pub project_key: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<VariableSetItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VariableSetItem {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: VariableSetItemType,
    /// A literal, or the text of a JSON object or array.
    pub value: String,
}

impl VariableSetItem {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            item_type: VariableSetItemType::String,
            value: value.into(),
        }
    }

    pub fn secret(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            item_type: VariableSetItemType::Secret,
            value: value.into(),
        }
    }

    pub fn is_secret(&self) -> bool {
        self.item_type == VariableSetItemType::Secret
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VariableSetItemType {
    String,
    Secret,
}

impl VariableSetItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableSetItemType::String => "string",
            VariableSetItemType::Secret => "secret",
        }
    }
}

impl std::str::FromStr for VariableSetItemType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(VariableSetItemType::String),
            "secret" => Ok(VariableSetItemType::Secret),
            other => Err(crate::Error::Serialization(format!(
                "unknown variable type {other:?}"
            ))),
        }
    }
}
