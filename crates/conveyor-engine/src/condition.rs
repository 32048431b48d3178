//! Job condition evaluation.

use conveyor_core::context::JobsResultContext;
use conveyor_core::expr::{self, Evaluator};
use conveyor_core::run::JobStatus;
use conveyor_core::workflow::WorkflowDefinition;
use conveyor_core::Result;
use std::collections::BTreeSet;

/// Condition applied to jobs without an `if`.
pub const DEFAULT_CONDITION: &str = "success()";

/// Evaluates `if` expressions of jobs and gates.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a condition, with or without its `${{ }}` wrapper.
    ///
    /// `ancestors_succeeded` answers `success()` and `failure()`. A malformed
    /// expression is an error; anything else is coerced to a boolean.
    pub fn evaluate(
        &self,
        condition: Option<&str>,
        context: &serde_json::Value,
        ancestors_succeeded: bool,
    ) -> Result<bool> {
        let source = match condition.map(expr::strip_delimiters) {
            Some(c) if !c.is_empty() => c,
            _ => DEFAULT_CONDITION,
        };

        let tree = expr::parse(source)?;
        let value = Evaluator::new(context)
            .with_ancestors_succeeded(ancestors_succeeded)
            .evaluate(source, &tree)?;
        Ok(expr::truthy(&value))
    }

    /// Whether no required ancestor failed. Failures of jobs marked
    /// `continue-on-error` do not count.
    pub fn ancestors_succeeded(
        &self,
        workflow: &WorkflowDefinition,
        ancestors: &BTreeSet<String>,
        jobs: &JobsResultContext,
    ) -> bool {
        !ancestors.iter().any(|name| {
            let failed = jobs
                .get(name)
                .is_some_and(|r| r.result == JobStatus::Fail);
            let tolerated = workflow
                .jobs
                .get(name)
                .is_some_and(|j| j.continue_on_error);
            failed && !tolerated
        })
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::context::JobResult;
    use conveyor_core::workflow::JobDefinition;
    use serde_json::json;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn workflow() -> WorkflowDefinition {
        let mut wf = WorkflowDefinition::default();
        wf.jobs.insert("build".into(), JobDefinition::default());
        wf.jobs.insert(
            "lint".into(),
            JobDefinition {
                continue_on_error: true,
                ..Default::default()
            },
        );
        wf
    }

    #[test]
    fn test_empty_condition_means_success() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate(None, &json!({}), true).unwrap());
        assert!(!eval.evaluate(None, &json!({}), false).unwrap());
        assert!(!eval.evaluate(Some("  "), &json!({}), false).unwrap());
    }

    #[test]
    fn test_status_functions() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate(Some("${{ always() }}"), &json!({}), false).unwrap());
        assert!(eval.evaluate(Some("failure()"), &json!({}), false).unwrap());
        assert!(!eval.evaluate(Some("failure()"), &json!({}), true).unwrap());
    }

    #[test]
    fn test_context_expressions() {
        let eval = ConditionEvaluator::new();
        let ctx = json!({"cds": {"workflow": "x"}});
        assert!(eval.evaluate(Some("cds.workflow == 'x'"), &ctx, true).unwrap());
        assert!(eval.evaluate(Some("${{ cds.workflow == 'x' }}"), &ctx, true).unwrap());
        assert!(!eval.evaluate(Some("1 == 2"), &ctx, true).unwrap());
        assert!(eval.evaluate(Some("${{ cds.workflow ==< && 'x' }}"), &ctx, true).is_err());
    }

    #[test]
    fn test_ancestors_succeeded_ignores_continue_on_error() {
        let eval = ConditionEvaluator::new();
        let wf = workflow();
        let mut jobs = JobsResultContext::new();
        jobs.insert("build".into(), JobResult::new(JobStatus::Success));
        jobs.insert("lint".into(), JobResult::new(JobStatus::Fail));
        assert!(eval.ancestors_succeeded(&wf, &names(&["build", "lint"]), &jobs));

        jobs.insert("build".into(), JobResult::new(JobStatus::Fail));
        assert!(!eval.ancestors_succeeded(&wf, &names(&["build", "lint"]), &jobs));
        assert!(eval.ancestors_succeeded(&wf, &names(&["lint"]), &jobs));
    }
}
