//! Evaluation of expression trees against a JSON context.

use super::parser::{BinaryOp, Expr, number_value};
use crate::{Error, Result};
use serde_json::Value;
use std::cmp::Ordering;

/// Evaluates expressions against a context whose top-level keys (`cds`, `vars`,
/// `needs`, ...) are the identifiers an expression can reference.
pub struct Evaluator<'a> {
    context: &'a Value,
    ancestors_succeeded: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a Value) -> Self {
        Self {
            context,
            ancestors_succeeded: true,
        }
    }

    /// Outcome reported by `success()` and, negated, by `failure()`.
    pub fn with_ancestors_succeeded(mut self, succeeded: bool) -> Self {
        self.ancestors_succeeded = succeeded;
        self
    }

    pub fn evaluate(&self, source: &str, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => Ok(self.context.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Member(target, name) => {
                let target = self.evaluate(source, target)?;
                Ok(target.get(name).cloned().unwrap_or(Value::Null))
            }
            Expr::Index(target, index) => {
                let target = self.evaluate(source, target)?;
                let index = self.evaluate(source, index)?;
                Ok(match (&target, &index) {
                    (Value::Array(items), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| items.get(i as usize))
                        .cloned()
                        .unwrap_or(Value::Null),
                    (Value::Object(map), Value::String(key)) => {
                        map.get(key).cloned().unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                })
            }
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.evaluate(source, inner)?))),
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.evaluate(source, left)?;
                if !truthy(&left) {
                    return Ok(left);
                }
                self.evaluate(source, right)
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.evaluate(source, left)?;
                if truthy(&left) {
                    return Ok(left);
                }
                self.evaluate(source, right)
            }
            Expr::Binary(op, left, right) => {
                let left = self.evaluate(source, left)?;
                let right = self.evaluate(source, right)?;
                Ok(Value::Bool(compare(*op, &left, &right)))
            }
            Expr::Call(name, args) => self.call(source, name, args),
        }
    }

    fn call(&self, source: &str, name: &str, args: &[Expr]) -> Result<Value> {
        let values = args
            .iter()
            .map(|arg| self.evaluate(source, arg))
            .collect::<Result<Vec<_>>>()?;

        let arity = |expected: usize| -> Result<()> {
            if values.len() == expected {
                Ok(())
            } else {
                Err(Error::expression(
                    source,
                    format!("{name}() expects {expected} argument(s), got {}", values.len()),
                ))
            }
        };

        match name {
            "success" => {
                arity(0)?;
                Ok(Value::Bool(self.ancestors_succeeded))
            }
            "failure" => {
                arity(0)?;
                Ok(Value::Bool(!self.ancestors_succeeded))
            }
            "always" => {
                arity(0)?;
                Ok(Value::Bool(true))
            }
            "contains" => {
                arity(2)?;
                Ok(Value::Bool(match &values[0] {
                    Value::Array(items) => items.iter().any(|item| loose_eq(item, &values[1])),
                    other => to_text(other)
                        .to_lowercase()
                        .contains(&to_text(&values[1]).to_lowercase()),
                }))
            }
            "startsWith" => {
                arity(2)?;
                Ok(Value::Bool(
                    to_text(&values[0])
                        .to_lowercase()
                        .starts_with(&to_text(&values[1]).to_lowercase()),
                ))
            }
            "endsWith" => {
                arity(2)?;
                Ok(Value::Bool(
                    to_text(&values[0])
                        .to_lowercase()
                        .ends_with(&to_text(&values[1]).to_lowercase()),
                ))
            }
            "format" => {
                let Some((template, rest)) = values.split_first() else {
                    return Err(Error::expression(source, "format() expects a template"));
                };
                let mut out = to_text(template);
                for (i, value) in rest.iter().enumerate() {
                    out = out.replace(&format!("{{{i}}}"), &to_text(value));
                }
                Ok(Value::String(out))
            }
            "join" => {
                if values.is_empty() || values.len() > 2 {
                    return Err(Error::expression(source, "join() expects 1 or 2 arguments"));
                }
                let separator = values.get(1).map(to_text).unwrap_or_else(|| ",".into());
                Ok(Value::String(match &values[0] {
                    Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(&separator),
                    other => to_text(other),
                }))
            }
            "toJSON" => {
                arity(1)?;
                Ok(Value::String(serde_json::to_string(&values[0])?))
            }
            "fromJSON" => {
                arity(1)?;
                serde_json::from_str(&to_text(&values[0]))
                    .map_err(|e| Error::expression(source, format!("fromJSON(): {e}")))
            }
            other => Err(Error::expression(source, format!("unknown function {other}()"))),
        }
    }
}

/// Boolean coercion of a value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String coercion used by interpolation and string functions.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => number_value(f).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            left == right
        }
        _ => to_number(left) == to_number(right),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    match op {
        BinaryOp::Eq => loose_eq(left, right),
        BinaryOp::Ne => !loose_eq(left, right),
        _ => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => to_number(left).partial_cmp(&to_number(right)),
            };
            match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
                (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
                (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
                (BinaryOp::Ge, Some(o)) => o != Ordering::Less,
                _ => false,
            }
        }
    }
}
