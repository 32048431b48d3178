//! The `${{ }}` expression language.
//!
//! Expressions reference the job context by dotted path (`vars.myset.key`,
//! `needs.build.result`), compare with `== != < <= > >=`, combine with
//! `&& || !` and call a small set of helper functions. The job-status functions
//! `success()`, `failure()` and `always()` are answered by the caller through
//! [`Evaluator::with_ancestors_succeeded`].

mod eval;
mod lexer;
mod parser;

pub use eval::{Evaluator, to_text, truthy};
pub use parser::{BinaryOp, Expr, parse};

use crate::Result;

/// Remove an optional `${{ ... }}` wrapper around a whole expression.
pub fn strip_delimiters(source: &str) -> &str {
    let trimmed = source.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Parse and evaluate an expression against a JSON context.
pub fn evaluate(source: &str, context: &serde_json::Value) -> Result<serde_json::Value> {
    let source = strip_delimiters(source);
    let expr = parse(source)?;
    Evaluator::new(context).evaluate(source, &expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> serde_json::Value {
        json!({
            "cds": {"workflow": "x", "run_number": 12},
            "vars": {"myvar": {"item": {"region": "eu", "zones": ["a", "b"]}, "flag": "true"}},
            "needs": {"build": {"result": "Success", "outputs": {"version": "1.2.0"}}},
            "matrix": {"os": "linux"}
        })
    }

    fn eval(source: &str) -> serde_json::Value {
        evaluate(source, &context()).unwrap()
    }

    #[test]
    fn test_strip_delimiters() {
        assert_eq!(strip_delimiters("${{ a == b }}"), "a == b");
        assert_eq!(strip_delimiters("  a == b "), "a == b");
        assert_eq!(strip_delimiters("${{always()}}"), "always()");
    }

    #[test]
    fn test_wrapped_and_bare_forms_agree() {
        assert_eq!(eval("cds.workflow == 'x'"), json!(true));
        assert_eq!(eval("${{ cds.workflow == 'x' }}"), json!(true));
        assert_eq!(eval("cds.workflow != 'x'"), json!(false));
    }

    #[test]
    fn test_number_comparisons() {
        assert_eq!(eval("1 == 2"), json!(false));
        assert_eq!(eval("cds.run_number > 10"), json!(true));
        assert_eq!(eval("cds.run_number <= '12'"), json!(true));
        assert_eq!(eval("'abc' < 'abd'"), json!(true));
    }

    #[test]
    fn test_nested_paths_and_index() {
        assert_eq!(eval("vars.myvar.item.region"), json!("eu"));
        assert_eq!(eval("vars.myvar.item.zones[1]"), json!("b"));
        assert_eq!(eval("vars['myvar'].item['region']"), json!("eu"));
        assert_eq!(eval("vars.missing.deep"), json!(null));
    }

    #[test]
    fn test_logical_operators() {
        assert_eq!(eval("needs.build.result == 'Success' && matrix.os == 'linux'"), json!(true));
        assert_eq!(eval("!(matrix.os == 'linux') || false"), json!(false));
        assert_eq!(eval("vars.missing || 'fallback'"), json!("fallback"));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("contains(vars.myvar.item.zones, 'a')"), json!(true));
        assert_eq!(eval("startsWith(needs.build.outputs.version, '1.')"), json!(true));
        assert_eq!(eval("endsWith(matrix.os, 'UX')"), json!(true));
        assert_eq!(eval("format('{0}-{1}', matrix.os, cds.run_number)"), json!("linux-12"));
        assert_eq!(eval("join(vars.myvar.item.zones, '+')"), json!("a+b"));
        assert_eq!(eval("toJSON(matrix)"), json!(r#"{"os":"linux"}"#));
        assert_eq!(eval("fromJSON(vars.myvar.flag)"), json!(true));
    }

    #[test]
    fn test_status_functions() {
        let ctx = context();
        let expr = parse("success()").unwrap();
        let ok = Evaluator::new(&ctx).evaluate("success()", &expr).unwrap();
        assert_eq!(ok, json!(true));

        let failed = Evaluator::new(&ctx).with_ancestors_succeeded(false);
        assert_eq!(failed.evaluate("success()", &expr).unwrap(), json!(false));
        let expr = parse("failure()").unwrap();
        assert_eq!(failed.evaluate("failure()", &expr).unwrap(), json!(true));
        let expr = parse("always()").unwrap();
        assert_eq!(failed.evaluate("always()", &expr).unwrap(), json!(true));
    }

    #[test]
    fn test_evaluation_errors() {
        assert!(evaluate("${{ cds.workflow ==< && 'x' }}", &context()).is_err());
        assert!(evaluate("nope()", &context()).is_err());
        assert!(evaluate("always(1)", &context()).is_err());
        assert!(evaluate("fromJSON('{')", &context()).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!("false")));
        assert!(truthy(&json!({})));
        assert_eq!(to_text(&json!(3.0)), "3");
        assert_eq!(to_text(&json!(null)), "");
    }
}
