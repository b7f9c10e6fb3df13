use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::ComplianceReceiptRow;

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    deployment_id: Uuid,
    service_id: Uuid,
    environment_id: Uuid,
    release_id: Uuid,
    policy_compliant: bool,
    receipt: serde_json::Value,
    signature: &str,
) -> Result<ComplianceReceiptRow> {
    let row = sqlx::query_as!(
        ComplianceReceiptRow,
        r#"
        INSERT INTO compliance_receipts
            (deployment_id, service_id, environment_id, release_id, policy_compliant, receipt, signature)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, deployment_id, service_id, environment_id, release_id,
                  policy_compliant, receipt, signature, created_at
        "#,
        deployment_id,
        service_id,
        environment_id,
        release_id,
        policy_compliant,
        receipt,
        signature
    )
    .fetch_one(pool)
    .await
    .context("failed to persist compliance receipt")?;

    Ok(row)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ComplianceReceiptRow>> {
    let row = sqlx::query_as!(
        ComplianceReceiptRow,
        r#"
        SELECT id, deployment_id, service_id, environment_id, release_id,
               policy_compliant, receipt, signature, created_at
        FROM compliance_receipts
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find compliance receipt")?;

    Ok(row)
}

pub async fn latest_for_deployment(
    pool: &PgPool,
    deployment_id: Uuid,
) -> Result<Option<ComplianceReceiptRow>> {
    let row = sqlx::query_as!(
        ComplianceReceiptRow,
        r#"
        SELECT id, deployment_id, service_id, environment_id, release_id,
               policy_compliant, receipt, signature, created_at
        FROM compliance_receipts
        WHERE deployment_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        deployment_id
    )
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest compliance receipt for deployment")?;

    Ok(row)
}
