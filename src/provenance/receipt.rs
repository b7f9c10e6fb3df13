//! Tamper-evident compliance receipts: a signed, human-readable record of
//! the evidence behind a deployment's approval decision.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::provenance::codehost::{CiStatus, PullRequest, Review};
use crate::provenance::policy::{ApprovalPolicy, PolicyViolation};

const RECEIPT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestEvidence {
    pub url: String,
    pub number: u64,
    pub merge_commit_sha: Option<String>,
    pub base_branch: String,
    pub head_branch: String,
}

impl From<&PullRequest> for PullRequestEvidence {
    fn from(pr: &PullRequest) -> Self {
        Self {
            url: pr.url.clone(),
            number: pr.number,
            merge_commit_sha: pr.merge_commit_sha.clone(),
            base_branch: pr.base_branch.clone(),
            head_branch: pr.head_branch.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalEvidence {
    pub login: String,
    pub email: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl From<&Review> for ApprovalEvidence {
    fn from(r: &Review) -> Self {
        Self {
            login: r.author_login.clone(),
            email: r.author_email.clone(),
            submitted_at: r.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiEvidence {
    pub state: String,
    pub checks: std::collections::BTreeMap<String, String>,
}

impl From<&CiStatus> for CiEvidence {
    fn from(ci: &CiStatus) -> Self {
        Self {
            state: ci.state.clone(),
            checks: ci.checks.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReceipt {
    pub version: u32,
    pub deployment_id: Uuid,
    pub service_id: Uuid,
    pub environment_id: Uuid,
    pub release_id: Uuid,
    pub policy_compliant: bool,
    pub violations: Vec<PolicyViolation>,
    pub pull_request: Option<PullRequestEvidence>,
    pub approvals: Vec<ApprovalEvidence>,
    pub ci: Option<CiEvidence>,
    pub change_ticket: Option<String>,
    pub policy_snapshot: ApprovalPolicy,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub signature: String,
}

#[allow(clippy::too_many_arguments)]
impl ComplianceReceipt {
    pub fn new(
        deployment_id: Uuid,
        service_id: Uuid,
        environment_id: Uuid,
        release_id: Uuid,
        policy_compliant: bool,
        violations: Vec<PolicyViolation>,
        pull_request: Option<&PullRequest>,
        approvals: &[Review],
        ci: Option<&CiStatus>,
        change_ticket: Option<String>,
        policy_snapshot: ApprovalPolicy,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut receipt = Self {
            version: RECEIPT_VERSION,
            deployment_id,
            service_id,
            environment_id,
            release_id,
            policy_compliant,
            violations,
            pull_request: pull_request.map(Into::into),
            approvals: approvals.iter().map(Into::into).collect(),
            ci: ci.map(Into::into),
            change_ticket,
            policy_snapshot,
            generated_at,
            signature: String::new(),
        };
        receipt.signature = receipt.compute_signature().unwrap_or_default();
        receipt
    }

    /// `base64(SHA-256(canonical JSON with signature blanked))`. Canonical
    /// here means the receipt's own declared field order, serialized once;
    /// the signature field is never part of its own hash.
    fn compute_signature(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.signature = String::new();
        let bytes = serde_json::to_vec(&unsigned).context("failed to serialize receipt for signing")?;
        let digest = Sha256::digest(&bytes);
        Ok(STANDARD.encode(digest))
    }

    pub fn verify(&self) -> Result<bool> {
        let expected = self.compute_signature()?;
        Ok(expected == self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ComplianceReceipt {
        ComplianceReceipt::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            true,
            Vec::new(),
            None,
            &[],
            None,
            None,
            ApprovalPolicy::development(),
            Utc::now(),
        )
    }

    #[test]
    fn verify_succeeds_on_untouched_receipt() {
        let receipt = sample();
        assert!(receipt.verify().unwrap());
    }

    #[test]
    fn verify_fails_after_mutation() {
        let mut receipt = sample();
        receipt.policy_compliant = false;
        assert!(!receipt.verify().unwrap());
    }

    #[test]
    fn round_trip_preserves_verification() {
        let receipt = sample();
        let json = serde_json::to_string(&receipt).unwrap();
        let restored: ComplianceReceipt = serde_json::from_str(&json).unwrap();
        assert!(restored.verify().unwrap());
    }
}
