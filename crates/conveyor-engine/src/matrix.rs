//! Matrix expansion for job fan-out.

use conveyor_core::run::Matrix;
use conveyor_core::{Error, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Expander for matrix strategies.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand axes into the cartesian product of their values.
    ///
    /// Zero axes yield a single empty coordinate. Every axis must be a
    /// non-empty list of scalars; values are stringified, and values that
    /// stringify alike (`1` and `"1"`) collapse into one.
    pub fn expand(&self, axes: &BTreeMap<String, Value>) -> Result<Vec<Matrix>> {
        let mut result = vec![Matrix::new()];

        for (axis, values) in axes {
            let values = Self::axis_values(axis, values)?;
            let mut next = Vec::with_capacity(result.len() * values.len());

            for combo in &result {
                for value in &values {
                    let mut combo = combo.clone();
                    combo.insert(axis.clone(), value.clone());
                    next.push(combo);
                }
            }

            result = next;
        }

        Ok(result)
    }

    fn axis_values(axis: &str, values: &Value) -> Result<Vec<String>> {
        let Some(items) = values.as_array() else {
            return Err(Error::InvalidMatrix(format!(
                "axis {axis:?} must be a list of values"
            )));
        };
        if items.is_empty() {
            return Err(Error::InvalidMatrix(format!("axis {axis:?} has no values")));
        }

        let mut seen = BTreeSet::new();
        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let value = match item {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::InvalidMatrix(format!(
                        "axis {axis:?} has a non-scalar value {other}"
                    )));
                }
            };
            if seen.insert(value.clone()) {
                result.push(value);
            }
        }
        Ok(result)
    }

    /// Human-readable name of a job instance, e.g. `build (os=linux, arch=arm64)`.
    pub fn display_name(&self, job_name: &str, matrix: &Matrix) -> String {
        if matrix.is_empty() {
            return job_name.to_string();
        }

        let parts: Vec<String> = matrix
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        format!("{} ({})", job_name, parts.join(", "))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn axes(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_matrix_expansion() {
        let expander = MatrixExpander::new();
        let combos = expander
            .expand(&axes(json!({"foo": ["foo1", "foo2"], "bar": ["bar1", "bar2"]})))
            .unwrap();

        assert_eq!(combos.len(), 4);
        let pairs: BTreeSet<(String, String)> = combos
            .iter()
            .map(|c| (c["foo"].clone(), c["bar"].clone()))
            .collect();
        for foo in ["foo1", "foo2"] {
            for bar in ["bar1", "bar2"] {
                assert!(pairs.contains(&(foo.to_string(), bar.to_string())));
            }
        }
    }

    #[test]
    fn test_cardinality_is_product_of_axes() {
        let expander = MatrixExpander::new();
        let combos = expander
            .expand(&axes(json!({"os": ["linux", "macos"], "node": [18, 20, 22], "debug": [true]})))
            .unwrap();
        assert_eq!(combos.len(), 6);
        assert!(combos.iter().all(|c| c["debug"] == "true"));
        assert!(combos.iter().any(|c| c["node"] == "18"));
    }

    #[test]
    fn test_zero_axes_yield_one_empty_coordinate() {
        let combos = MatrixExpander::new().expand(&BTreeMap::new()).unwrap();
        assert_eq!(combos, vec![Matrix::new()]);
    }

    #[test]
    fn test_malformed_axes() {
        let expander = MatrixExpander::new();
        assert!(expander.expand(&axes(json!({"os": "linux"}))).is_err());
        assert!(expander.expand(&axes(json!({"os": []}))).is_err());
        assert!(expander.expand(&axes(json!({"os": [{"name": "linux"}]}))).is_err());
    }

    #[test]
    fn test_values_stringifying_alike_are_deduplicated() {
        let expander = MatrixExpander::new();
        let combos = expander
            .expand(&axes(json!({"v": [1, "1", 2, true, "true"]})))
            .unwrap();
        let values: Vec<&str> = combos.iter().map(|c| c["v"].as_str()).collect();
        assert_eq!(values, vec!["1", "2", "true"]);
    }

    #[test]
    fn test_display_name() {
        let expander = MatrixExpander::new();
        let mut matrix = Matrix::new();
        matrix.insert("os".into(), "linux".into());
        assert_eq!(expander.display_name("build", &matrix), "build (os=linux)");
        assert_eq!(expander.display_name("build", &Matrix::new()), "build");
    }
}
