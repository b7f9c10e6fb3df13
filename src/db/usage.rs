use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::UsageEvent;

pub async fn insert_event(
    pool: &PgPool,
    project_id: Uuid,
    event_type: &str,
    resource_type: &str,
    resource_id: &str,
    metrics: serde_json::Value,
    timestamp: DateTime<Utc>,
) -> Result<UsageEvent> {
    let event = sqlx::query_as!(
        UsageEvent,
        r#"
        INSERT INTO usage_events (project_id, event_type, resource_type, resource_id, metrics, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, project_id, event_type, resource_type, resource_id, metrics, timestamp, processed_at
        "#,
        project_id,
        event_type,
        resource_type,
        resource_id,
        metrics,
        timestamp
    )
    .fetch_one(pool)
    .await
    .context("failed to insert usage event")?;

    Ok(event)
}

pub async fn distinct_projects_in_window(
    pool: &PgPool,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let rows = crate::db::pool::timed(
        "usage::distinct_projects_in_window",
        sqlx::query!(
            r#"
            SELECT DISTINCT project_id
            FROM usage_events
            WHERE timestamp >= $1 AND timestamp < $2
            "#,
            window_start,
            window_end
        )
        .fetch_all(pool),
    )
    .await
    .context("failed to enumerate projects with usage events")?;

    Ok(rows.into_iter().map(|r| r.project_id).collect())
}

pub async fn events_for_project_in_window(
    pool: &PgPool,
    project_id: Uuid,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<UsageEvent>> {
    let events = crate::db::pool::timed(
        "usage::events_for_project_in_window",
        sqlx::query_as!(
            UsageEvent,
            r#"
            SELECT id, project_id, event_type, resource_type, resource_id, metrics, timestamp, processed_at
            FROM usage_events
            WHERE project_id = $1 AND timestamp >= $2 AND timestamp < $3
            ORDER BY timestamp ASC
            "#,
            project_id,
            window_start,
            window_end
        )
        .fetch_all(pool),
    )
    .await
    .context("failed to fetch usage events in window")?;

    Ok(events)
}

pub async fn mark_processed(pool: &PgPool, event_ids: &[Uuid]) -> Result<()> {
    sqlx::query!(
        "UPDATE usage_events SET processed_at = NOW() WHERE id = ANY($1)",
        event_ids
    )
    .execute(pool)
    .await
    .context("failed to mark usage events processed")?;
    Ok(())
}

/// Idempotent upsert by `(project_id, metric_type, hour)` — replay-safe.
pub async fn upsert_hourly(
    pool: &PgPool,
    project_id: Uuid,
    metric_type: &str,
    hour: DateTime<Utc>,
    value: f64,
) -> Result<()> {
    sqlx::query!(
        r#"
        INSERT INTO hourly_usage (project_id, metric_type, hour, value)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (project_id, metric_type, hour)
        DO UPDATE SET value = $4
        "#,
        project_id,
        metric_type,
        hour,
        value
    )
    .execute(pool)
    .await
    .context("failed to upsert hourly usage")?;
    Ok(())
}

pub async fn sum_hourly_in_range(
    pool: &PgPool,
    project_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<(String, f64)>> {
    let rows = crate::db::pool::timed(
        "usage::sum_hourly_in_range",
        sqlx::query!(
            r#"
            SELECT metric_type, SUM(value) as "total!"
            FROM hourly_usage
            WHERE project_id = $1 AND hour >= $2 AND hour < $3
            GROUP BY metric_type
            "#,
            project_id,
            start,
            end
        )
        .fetch_all(pool),
    )
    .await
    .context("failed to summarize usage in range")?;

    Ok(rows.into_iter().map(|r| (r.metric_type, r.total)).collect())
}
