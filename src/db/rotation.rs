use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{RotationAuditLog, RotationStatus, SecretChangeEvent};

pub async fn create_event(
    pool: &PgPool,
    service_id: Uuid,
    environment: &str,
    secret_name: &str,
    old_version: Option<&str>,
    new_version: &str,
    triggered_by: Option<Uuid>,
) -> Result<SecretChangeEvent> {
    let status = RotationStatus::Pending.to_string();
    let event = sqlx::query_as!(
        SecretChangeEvent,
        r#"
        INSERT INTO secret_change_events
            (service_id, environment, secret_name, old_version, new_version, status, triggered_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING
            id, service_id, environment, secret_name, old_version, new_version,
            status as "status: RotationStatus",
            rollout_id, triggered_by, created_at, updated_at
        "#,
        service_id,
        environment,
        secret_name,
        old_version,
        new_version,
        status,
        triggered_by
    )
    .fetch_one(pool)
    .await
    .context("failed to create secret change event")?;

    Ok(event)
}

pub async fn mark_event_status(
    pool: &PgPool,
    id: Uuid,
    status: RotationStatus,
    rollout_id: Option<&str>,
) -> Result<()> {
    let status_str = status.to_string();
    sqlx::query!(
        r#"
        UPDATE secret_change_events
        SET status = $2, rollout_id = COALESCE($3, rollout_id), updated_at = NOW()
        WHERE id = $1
        "#,
        id,
        status_str,
        rollout_id
    )
    .execute(pool)
    .await
    .context("failed to update secret change event status")?;
    Ok(())
}

pub async fn create_audit_row(
    pool: &PgPool,
    event_id: Uuid,
    service_id: Uuid,
    secret_name: &str,
    old_version: Option<&str>,
    new_version: &str,
    rollout_strategy: &str,
) -> Result<RotationAuditLog> {
    let status = RotationStatus::InProgress.to_string();
    let row = sqlx::query_as!(
        RotationAuditLog,
        r#"
        INSERT INTO rotation_audit_logs
            (event_id, service_id, secret_name, old_version, new_version, status, started_at, pods_restarted, rollout_strategy)
        VALUES ($1, $2, $3, $4, $5, $6, NOW(), 0, $7)
        RETURNING
            id, event_id, service_id, secret_name, old_version, new_version,
            status as "status: RotationStatus",
            started_at, completed_at, duration_ms, pods_restarted, rollout_strategy, error
        "#,
        event_id,
        service_id,
        secret_name,
        old_version,
        new_version,
        status,
        rollout_strategy
    )
    .fetch_one(pool)
    .await
    .context("failed to create rotation audit row")?;

    Ok(row)
}

pub async fn finalize_audit_row(
    pool: &PgPool,
    id: Uuid,
    status: RotationStatus,
    pods_restarted: i32,
    error: Option<&str>,
    completed_at: DateTime<Utc>,
    duration_ms: i64,
) -> Result<()> {
    let status_str = status.to_string();
    sqlx::query!(
        r#"
        UPDATE rotation_audit_logs
        SET status = $2, pods_restarted = $3, error = $4, completed_at = $5, duration_ms = $6
        WHERE id = $1
        "#,
        id,
        status_str,
        pods_restarted,
        error,
        completed_at,
        duration_ms
    )
    .execute(pool)
    .await
    .context("failed to finalize rotation audit row")?;
    Ok(())
}

pub async fn history_for_service(
    pool: &PgPool,
    service_id: Uuid,
    limit: i64,
) -> Result<Vec<RotationAuditLog>> {
    let rows = sqlx::query_as!(
        RotationAuditLog,
        r#"
        SELECT
            id, event_id, service_id, secret_name, old_version, new_version,
            status as "status: RotationStatus",
            started_at, completed_at, duration_ms, pods_restarted, rollout_strategy, error
        FROM rotation_audit_logs
        WHERE service_id = $1
        ORDER BY started_at DESC
        LIMIT $2
        "#,
        service_id,
        limit
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch rotation history")?;

    Ok(rows)
}
