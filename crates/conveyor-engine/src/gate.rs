//! Manual-approval gates.

use crate::condition::ConditionEvaluator;
use conveyor_core::user::User;
use conveyor_core::workflow::GateDefinition;
use conveyor_core::Result;
use tracing::debug;

/// Decides whether a gated job may proceed.
pub struct GateEvaluator {
    conditions: ConditionEvaluator,
}

impl GateEvaluator {
    pub fn new() -> Self {
        Self {
            conditions: ConditionEvaluator::new(),
        }
    }

    /// A listed reviewer always passes. Anyone else passes only as an admin
    /// holding a fresh strong authentication factor. Gates without reviewers
    /// evaluate their own `if`, where an empty condition passes.
    pub fn can_proceed(
        &self,
        gate: &GateDefinition,
        user: &User,
        is_admin_with_mfa: bool,
        context: &serde_json::Value,
    ) -> Result<bool> {
        if !gate.reviewers.is_empty() {
            let reviewer = gate.reviewers.users.iter().any(|u| u == &user.username)
                || user.in_any_group(&gate.reviewers.groups);
            if !reviewer {
                debug!(user = %user.username, is_admin_with_mfa, "User is not a gate reviewer");
            }
            return Ok(reviewer || is_admin_with_mfa);
        }

        match gate.condition.as_deref().map(str::trim) {
            None | Some("") => Ok(true),
            Some(condition) => self.conditions.evaluate(Some(condition), context, true),
        }
    }
}

impl Default for GateEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::ids::UserId;
    use conveyor_core::workflow::GateReviewers;
    use serde_json::json;

    fn user(name: &str, groups: &[&str]) -> User {
        User {
            id: UserId::new(),
            username: name.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    fn gate(users: &[&str], groups: &[&str]) -> GateDefinition {
        GateDefinition {
            reviewers: GateReviewers {
                users: users.iter().map(|u| u.to_string()).collect(),
                groups: groups.iter().map(|g| g.to_string()).collect(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_reviewer_passes() {
        let gates = GateEvaluator::new();
        let gate = gate(&["alice"], &["release-team"]);
        assert!(gates.can_proceed(&gate, &user("alice", &[]), false, &json!({})).unwrap());
        assert!(gates
            .can_proceed(&gate, &user("bob", &["release-team"]), false, &json!({}))
            .unwrap());
    }

    #[test]
    fn test_non_reviewer_needs_admin_with_mfa() {
        let gates = GateEvaluator::new();
        let gate = gate(&["alice"], &[]);
        assert!(!gates.can_proceed(&gate, &user("bob", &[]), false, &json!({})).unwrap());
        assert!(gates.can_proceed(&gate, &user("bob", &[]), true, &json!({})).unwrap());
    }

    #[test]
    fn test_gate_condition_without_reviewers() {
        let gates = GateEvaluator::new();
        let mut gate = gate(&[], &[]);
        assert!(gates.can_proceed(&gate, &user("bob", &[]), false, &json!({})).unwrap());

        gate.condition = Some("${{ gate.approve == true }}".into());
        let approved = json!({"gate": {"approve": true}});
        let refused = json!({"gate": {"approve": false}});
        assert!(gates.can_proceed(&gate, &user("bob", &[]), false, &approved).unwrap());
        assert!(!gates.can_proceed(&gate, &user("bob", &[]), true, &refused).unwrap());

        gate.condition = Some("gate.approve ==".into());
        assert!(gates.can_proceed(&gate, &user("bob", &[]), false, &approved).is_err());
    }
}
