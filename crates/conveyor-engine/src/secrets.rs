//! Collection of sensitive substrings for log redaction.

use crate::context::looks_like_json;
use conveyor_core::integration::ProjectIntegration;
use conveyor_core::variables::VariableSet;
use conveyor_core::{Error, Result};
use serde_json::Value;
use std::collections::BTreeSet;

/// Produces the flat, deduplicated set of values that must never be logged.
pub struct SecretExtractor;

impl SecretExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Collect sensitive strings from secret variable items and from
    /// password-typed integration config.
    ///
    /// Secret items shaped like JSON must parse; the serialization of every
    /// nested object and array, and every leaf, are collected alongside the
    /// raw value.
    pub fn collect(
        &self,
        variable_sets: &[VariableSet],
        integrations: &[ProjectIntegration],
    ) -> Result<BTreeSet<String>> {
        let mut sensitive = BTreeSet::new();

        for set in variable_sets {
            for item in set.items.iter().filter(|i| i.is_secret()) {
                if looks_like_json(&item.value) {
                    let parsed: Value = serde_json::from_str(item.value.trim()).map_err(|e| {
                        Error::Serialization(format!(
                            "secret {}.{} holds malformed JSON: {e}",
                            set.name, item.name
                        ))
                    })?;
                    collect_json(&parsed, &mut sensitive);
                }
                add_forms(&item.value, &mut sensitive);
            }
        }

        for integration in integrations {
            for value in integration.sensitive_values() {
                add_forms(value, &mut sensitive);
            }
        }

        sensitive.retain(|s| !s.trim().is_empty());
        Ok(sensitive)
    }
}

impl Default for SecretExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// The raw value, its lines split on real and escaped newlines, and its
/// one-line form.
fn add_forms(value: &str, out: &mut BTreeSet<String>) {
    out.insert(value.to_string());
    out.extend(value.split('\n').map(str::to_string));
    out.extend(value.split("\\n").map(str::to_string));
    out.insert(value.replace('\n', "\\n"));
}

/// Every object and array contributes its compact serialization, as
/// `toJSON` would print it; every leaf contributes its text.
fn collect_json(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            add_forms(&value.to_string(), out);
            map.values().for_each(|v| collect_json(v, out));
        }
        Value::Array(items) => {
            add_forms(&value.to_string(), out);
            items.iter().for_each(|v| collect_json(v, out));
        }
        Value::String(s) => add_forms(s, out),
        Value::Number(_) | Value::Bool(_) | Value::Null => add_forms(&value.to_string(), out),
    }
}
