use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{DeliveryStatus, WebhookDelivery, WebhookDestination, WebhookKind};

pub async fn list_subscribed(
    pool: &PgPool,
    project_id: Uuid,
    event_type: &str,
) -> Result<Vec<WebhookDestination>> {
    let destinations = sqlx::query_as!(
        WebhookDestination,
        r#"
        SELECT
            id, project_id,
            kind as "kind: WebhookKind",
            url, signing_secret, subscribed_event_types, enabled, consecutive_failures,
            created_at, updated_at
        FROM webhook_destinations
        WHERE project_id = $1 AND enabled = true AND $2 = ANY(subscribed_event_types)
        "#,
        project_id,
        event_type
    )
    .fetch_all(pool)
    .await
    .context("failed to list subscribed webhook destinations")?;

    Ok(destinations)
}

pub async fn create_delivery(
    pool: &PgPool,
    destination_id: Uuid,
    event_id: Uuid,
) -> Result<WebhookDelivery> {
    let status = DeliveryStatus::Pending.to_string();
    let delivery = sqlx::query_as!(
        WebhookDelivery,
        r#"
        INSERT INTO webhook_deliveries (destination_id, event_id, status)
        VALUES ($1, $2, $3)
        RETURNING
            id, destination_id, event_id,
            status as "status: DeliveryStatus",
            http_status, duration_ms, error, created_at, updated_at
        "#,
        destination_id,
        event_id,
        status
    )
    .fetch_one(pool)
    .await
    .context("failed to create webhook delivery row")?;

    Ok(delivery)
}

pub async fn finalize_delivery(
    pool: &PgPool,
    id: Uuid,
    status: DeliveryStatus,
    http_status: Option<i32>,
    duration_ms: i64,
    error: Option<&str>,
) -> Result<()> {
    let status_str = status.to_string();
    sqlx::query!(
        r#"
        UPDATE webhook_deliveries
        SET status = $2, http_status = $3, duration_ms = $4, error = $5, updated_at = NOW()
        WHERE id = $1
        "#,
        id,
        status_str,
        http_status,
        duration_ms,
        error
    )
    .execute(pool)
    .await
    .context("failed to finalize webhook delivery")?;
    Ok(())
}

pub async fn record_success(pool: &PgPool, destination_id: Uuid) -> Result<()> {
    sqlx::query!(
        "UPDATE webhook_destinations SET consecutive_failures = 0, updated_at = NOW() WHERE id = $1",
        destination_id
    )
    .execute(pool)
    .await
    .context("failed to reset destination failure count")?;
    Ok(())
}

pub async fn record_failure(pool: &PgPool, destination_id: Uuid) -> Result<()> {
    sqlx::query!(
        r#"
        UPDATE webhook_destinations
        SET consecutive_failures = consecutive_failures + 1, updated_at = NOW()
        WHERE id = $1
        "#,
        destination_id
    )
    .execute(pool)
    .await
    .context("failed to increment destination failure count")?;
    Ok(())
}

pub async fn find_delivery(pool: &PgPool, id: Uuid) -> Result<Option<WebhookDelivery>> {
    let delivery = sqlx::query_as!(
        WebhookDelivery,
        r#"
        SELECT
            id, destination_id, event_id,
            status as "status: DeliveryStatus",
            http_status, duration_ms, error, created_at, updated_at
        FROM webhook_deliveries
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find webhook delivery")?;

    Ok(delivery)
}

pub async fn find_destination(pool: &PgPool, id: Uuid) -> Result<Option<WebhookDestination>> {
    let destination = sqlx::query_as!(
        WebhookDestination,
        r#"
        SELECT
            id, project_id,
            kind as "kind: WebhookKind",
            url, signing_secret, subscribed_event_types, enabled, consecutive_failures,
            created_at, updated_at
        FROM webhook_destinations
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find webhook destination")?;

    Ok(destination)
}
