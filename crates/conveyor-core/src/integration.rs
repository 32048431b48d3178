//! Project integrations resolved onto jobs.

use crate::ids::IntegrationId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectIntegration {
    pub id: IntegrationId,
    pub project_key: String,
    pub name: String,
    pub model: IntegrationModel,
    #[serde(default)]
    pub config: BTreeMap<String, IntegrationConfigValue>,
}

impl ProjectIntegration {
    /// Region carried by the first region-typed config entry, if any.
    pub fn region(&self) -> Option<&str> {
        self.config
            .values()
            .find(|c| c.value_type == ConfigValueType::Region)
            .map(|c| c.value.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Password-typed config values.
    pub fn sensitive_values(&self) -> impl Iterator<Item = &str> {
        self.config
            .values()
            .filter(|c| c.value_type == ConfigValueType::Password)
            .map(|c| c.value.as_str())
    }
}

/// What an integration is used for. Only artifact managers and deployments
/// can be enabled on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrationModel {
    ArtifactManager { platform: String },
    Deployment { platform: String },
    Hook { platform: String },
    Event { platform: String },
}

impl IntegrationModel {
    pub fn platform(&self) -> &str {
        match self {
            IntegrationModel::ArtifactManager { platform }
            | IntegrationModel::Deployment { platform }
            | IntegrationModel::Hook { platform }
            | IntegrationModel::Event { platform } => platform,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IntegrationConfigValue {
    pub value: String,
    #[serde(rename = "type", default)]
    pub value_type: ConfigValueType,
}

impl IntegrationConfigValue {
    pub fn new(value: impl Into<String>, value_type: ConfigValueType) -> Self {
        Self {
            value: value.into(),
            value_type,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValueType {
    #[default]
    String,
    Text,
    Password,
    Region,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integration(config: &[(&str, &str, ConfigValueType)]) -> ProjectIntegration {
        ProjectIntegration {
            id: IntegrationId::new(),
            project_key: "PROJ".into(),
            name: "artifactory".into(),
            model: IntegrationModel::ArtifactManager {
                platform: "artifactory".into(),
            },
            config: config
                .iter()
                .map(|(k, v, t)| (k.to_string(), IntegrationConfigValue::new(*v, *t)))
                .collect(),
        }
    }

    #[test]
    fn test_region_from_config() {
        let integ = integration(&[
            ("url", "https://repo", ConfigValueType::String),
            ("myregion", "eu-west", ConfigValueType::Region),
        ]);
        assert_eq!(integ.region(), Some("eu-west"));
        assert_eq!(integration(&[]).region(), None);
    }

    #[test]
    fn test_sensitive_values() {
        let integ = integration(&[
            ("token", "s3cr3t", ConfigValueType::Password),
            ("url", "https://repo", ConfigValueType::String),
        ]);
        assert_eq!(integ.sensitive_values().collect::<Vec<_>>(), vec!["s3cr3t"]);
    }

    #[test]
    fn test_model_tagging() {
        let model: IntegrationModel =
            serde_json::from_str(r#"{"kind":"deployment","platform":"helm"}"#).unwrap();
        assert_eq!(model.platform(), "helm");
        assert!(matches!(model, IntegrationModel::Deployment { .. }));
    }
}
