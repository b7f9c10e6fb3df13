//! Environment-scoped approval policy and violation accumulation.

use serde::{Deserialize, Serialize};

use crate::provenance::codehost::{CiStatus, PullRequest, Review};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub min_approvals: u32,
    pub require_ci_passing: bool,
    pub require_merged: bool,
    pub blocked_approvers: Vec<String>,
    pub allowed_approvers: Vec<String>,
    pub require_change_ticket: bool,
    pub allow_self_approval: bool,
}

impl ApprovalPolicy {
    pub fn production() -> Self {
        Self {
            min_approvals: 2,
            require_ci_passing: true,
            require_merged: true,
            blocked_approvers: default_bots(),
            allowed_approvers: Vec::new(),
            require_change_ticket: true,
            allow_self_approval: false,
        }
    }

    pub fn staging() -> Self {
        Self {
            min_approvals: 1,
            require_ci_passing: true,
            require_merged: true,
            blocked_approvers: default_bots(),
            allowed_approvers: Vec::new(),
            require_change_ticket: false,
            allow_self_approval: false,
        }
    }

    pub fn development() -> Self {
        Self {
            min_approvals: 0,
            require_ci_passing: false,
            require_merged: false,
            blocked_approvers: Vec::new(),
            allowed_approvers: Vec::new(),
            require_change_ticket: false,
            allow_self_approval: true,
        }
    }

    /// Resolve by environment name: explicit for `production`/`staging`,
    /// everything else gets development defaults.
    pub fn for_environment(environment_name: &str) -> Self {
        match environment_name.to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::production(),
            "staging" | "stage" => Self::staging(),
            _ => Self::development(),
        }
    }

    /// Short-circuit per spec: a policy with zero approvals required and no
    /// CI/merge requirement never needs to contact the code host.
    pub fn is_unconditional(&self) -> bool {
        self.min_approvals == 0 && !self.require_ci_passing && !self.require_merged
    }

    pub fn evaluate(
        &self,
        pr: &PullRequest,
        reviews: &[Review],
        ci: &CiStatus,
        change_ticket: Option<&str>,
    ) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();

        let valid_approvals = reviews
            .iter()
            .filter(|r| r.state.eq_ignore_ascii_case("APPROVED"))
            .filter(|r| self.allowed_approvers.is_empty() || self.allowed_approvers.iter().any(|a| a.eq_ignore_ascii_case(&r.author_login)))
            .filter(|r| !self.blocked_approvers.iter().any(|b| b.eq_ignore_ascii_case(&r.author_login)))
            .filter(|r| self.allow_self_approval || !r.author_login.eq_ignore_ascii_case(&pr.author_login))
            .count() as u32;

        if valid_approvals < self.min_approvals {
            violations.push(PolicyViolation {
                rule: "min_approvals".to_string(),
                message: format!(
                    "requires {} approvals, but only {} valid approvals found",
                    self.min_approvals, valid_approvals
                ),
            });
        }

        if self.require_ci_passing && ci.state != "success" {
            violations.push(PolicyViolation {
                rule: "require_ci_passing".to_string(),
                message: format!("CI status is \"{}\", expected \"success\"", ci.state),
            });
        }

        if self.require_merged && !pr.merged {
            violations.push(PolicyViolation {
                rule: "require_merged".to_string(),
                message: "pull request is not merged".to_string(),
            });
        }

        if self.require_change_ticket && change_ticket.map(str::trim).unwrap_or("").is_empty() {
            violations.push(PolicyViolation {
                rule: "require_change_ticket".to_string(),
                message: "no change ticket reference provided".to_string(),
            });
        }

        violations
    }
}

fn default_bots() -> Vec<String> {
    vec!["dependabot[bot]".to_string(), "renovate[bot]".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub rule: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pr(author: &str, merged: bool) -> PullRequest {
        PullRequest {
            number: 42,
            url: "https://github.com/acme/widgets/pull/42".to_string(),
            author_login: author.to_string(),
            merged,
            merge_commit_sha: Some("deadbeef".to_string()),
            base_branch: "main".to_string(),
            head_branch: "feature".to_string(),
        }
    }

    fn review(author: &str, state: &str) -> Review {
        Review {
            author_login: author.to_string(),
            author_email: None,
            state: state.to_string(),
            submitted_at: Utc::now(),
        }
    }

    fn passing_ci() -> CiStatus {
        CiStatus {
            state: "success".to_string(),
            checks: Default::default(),
        }
    }

    #[test]
    fn self_approval_is_filtered_by_author_login_not_sha() {
        let policy = ApprovalPolicy::production();
        let pr = pr("alice", true);
        let reviews = vec![review("alice", "APPROVED")];
        let violations = policy.evaluate(&pr, &reviews, &passing_ci(), Some("TICKET-1"));

        assert!(violations.iter().any(|v| v.rule == "min_approvals"));
        assert_eq!(
            violations.iter().find(|v| v.rule == "min_approvals").unwrap().message,
            "requires 2 approvals, but only 0 valid approvals found"
        );
    }

    #[test]
    fn development_policy_is_unconditional() {
        assert!(ApprovalPolicy::development().is_unconditional());
        assert!(!ApprovalPolicy::staging().is_unconditional());
        assert!(!ApprovalPolicy::production().is_unconditional());
    }

    #[test]
    fn production_approved_with_two_independent_reviewers() {
        let policy = ApprovalPolicy::production();
        let pr = pr("alice", true);
        let reviews = vec![review("bob", "APPROVED"), review("carol", "APPROVED")];
        let violations = policy.evaluate(&pr, &reviews, &passing_ci(), Some("TICKET-1"));
        assert!(violations.is_empty());
    }

    #[test]
    fn blocked_approver_does_not_count() {
        let mut policy = ApprovalPolicy::staging();
        policy.min_approvals = 1;
        let pr = pr("alice", true);
        let reviews = vec![review("dependabot[bot]", "APPROVED")];
        let violations = policy.evaluate(&pr, &reviews, &passing_ci(), None);
        assert!(violations.iter().any(|v| v.rule == "min_approvals"));
    }
}
