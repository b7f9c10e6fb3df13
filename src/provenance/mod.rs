//! Provenance gate: validates a candidate deployment against an
//! environment-scoped approval policy and emits a tamper-evident receipt.

pub mod codehost;
pub mod policy;
pub mod receipt;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{
    compliance as db_compliance, deployments as db_deployments, environments as db_environments,
    releases as db_releases, services as db_services,
};
use crate::errors::{CoreError, CoreResult};
use crate::state::ControllerState;

use codehost::CodeHostClient;
use policy::{ApprovalPolicy, PolicyViolation};
use receipt::ComplianceReceipt;

pub struct ProvenanceGate {
    state: Arc<ControllerState>,
    codehost: Arc<dyn CodeHostClient>,
}

impl ProvenanceGate {
    pub fn new(state: Arc<ControllerState>, codehost: Arc<dyn CodeHostClient>) -> Self {
        Self { state, codehost }
    }

    /// `CheckDeploymentApproval`: resolve policy, gather PR/review/CI
    /// evidence (unless the environment's policy is unconditional), evaluate
    /// violations, sign and persist a receipt regardless of outcome.
    pub async fn check_deployment_approval(
        &self,
        deployment_id: Uuid,
        change_ticket: Option<&str>,
    ) -> CoreResult<ComplianceReceipt> {
        let deployment = db_deployments::find_by_id(&self.state.db_pool, deployment_id)
            .await
            .map_err(|e| CoreError::from_db_error("loading deployment for approval check", e))?
            .ok_or_else(|| CoreError::not_found(format!("deployment {deployment_id} not found")))?;

        let environment = db_environments::find_by_id(&self.state.db_pool, deployment.environment_id)
            .await
            .map_err(|e| CoreError::from_db_error("loading environment for approval check", e))?
            .ok_or_else(|| {
                CoreError::not_found(format!("environment {} not found", deployment.environment_id))
            })?;

        let release = db_releases::find_by_id(&self.state.db_pool, deployment.release_id)
            .await
            .map_err(|e| CoreError::from_db_error("loading release for approval check", e))?
            .ok_or_else(|| CoreError::not_found(format!("release {} not found", deployment.release_id)))?;

        let service = db_services::find_by_id(&self.state.db_pool, release.service_id)
            .await
            .map_err(|e| CoreError::from_db_error("loading service for approval check", e))?
            .ok_or_else(|| CoreError::not_found(format!("service {} not found", release.service_id)))?;

        let policy = ApprovalPolicy::for_environment(&environment.name);

        let (violations, pr, reviews, ci) = if policy.is_unconditional() {
            (Vec::new(), None, Vec::new(), None)
        } else {
            self.gather_evidence(&service.git_repo, &release.git_sha, &policy, change_ticket)
                .await?
        };

        let policy_compliant = violations.is_empty();
        let receipt = ComplianceReceipt::new(
            deployment.id,
            service.id,
            environment.id,
            release.id,
            policy_compliant,
            violations,
            pr.as_ref(),
            &reviews,
            ci.as_ref(),
            change_ticket.map(str::to_string),
            policy,
            chrono::Utc::now(),
        );

        let receipt_json =
            serde_json::to_value(&receipt).map_err(|e| CoreError::fatal(format!("failed to serialize receipt: {e}")))?;

        db_compliance::insert(
            &self.state.db_pool,
            deployment.id,
            service.id,
            environment.id,
            release.id,
            policy_compliant,
            receipt_json,
            &receipt.signature,
        )
        .await
        .map_err(|e| CoreError::from_db_error("persisting compliance receipt", e))?;

        self.state
            .metrics
            .provenance_decisions_total
            .with_label_values(&[
                environment.name.as_str(),
                if policy_compliant { "true" } else { "false" },
            ])
            .inc();

        info!(
            %deployment_id,
            environment = %environment.name,
            policy_compliant,
            "provenance gate decision recorded"
        );

        Ok(receipt)
    }

    async fn gather_evidence(
        &self,
        repo: &str,
        commit_sha: &str,
        policy: &ApprovalPolicy,
        change_ticket: Option<&str>,
    ) -> CoreResult<(
        Vec<PolicyViolation>,
        Option<codehost::PullRequest>,
        Vec<codehost::Review>,
        Option<codehost::CiStatus>,
    )> {
        let pr = self
            .codehost
            .find_pull_request_for_commit(repo, commit_sha)
            .await
            .map_err(|e| CoreError::transient(format!("failed to look up pull request: {e}")))?;

        let Some(pr) = pr else {
            warn!(repo, commit_sha, "no pull request found for commit");
            return Ok((
                vec![PolicyViolation {
                    rule: "pull_request".to_string(),
                    message: "no pull request found for the release commit".to_string(),
                }],
                None,
                Vec::new(),
                None,
            ));
        };

        let reviews = self
            .codehost
            .list_reviews(repo, pr.number)
            .await
            .map_err(|e| CoreError::transient(format!("failed to list pull request reviews: {e}")))?;

        let ci = self
            .codehost
            .get_ci_status(repo, commit_sha)
            .await
            .map_err(|e| CoreError::transient(format!("failed to fetch CI status: {e}")))?;

        let violations = policy.evaluate(&pr, &reviews, &ci, change_ticket);

        Ok((violations, Some(pr), reviews, Some(ci)))
    }

    /// `VerifyReceipt`: recompute the signature over the persisted JSON and
    /// compare. A receipt mutated after the fact fails verification by
    /// construction.
    pub async fn verify_receipt(&self, receipt_id: Uuid) -> CoreResult<bool> {
        let row = db_compliance::find_by_id(&self.state.db_pool, receipt_id)
            .await
            .map_err(|e| CoreError::from_db_error("loading compliance receipt", e))?
            .ok_or_else(|| CoreError::not_found(format!("compliance receipt {receipt_id} not found")))?;

        let receipt: ComplianceReceipt = serde_json::from_value(row.receipt)
            .map_err(|e| CoreError::fatal(format!("stored receipt is not well-formed: {e}")))?;

        receipt
            .verify()
            .map_err(|e| CoreError::fatal(format!("failed to recompute receipt signature: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::policy::ApprovalPolicy;

    #[test]
    fn unknown_environment_name_defaults_to_development() {
        let policy = ApprovalPolicy::for_environment("preview-123");
        assert_eq!(policy.min_approvals, 0);
        assert!(policy.allow_self_approval);
    }
}
