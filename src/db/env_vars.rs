use anyhow::{Context, Result};
use uuid::Uuid;

use crate::db::models::EnvironmentVariable;
use crate::db::pool::timed;

/// Resolve effective variables for a service in an environment: environment-specific
/// rows override global (`environment_id IS NULL`) rows sharing the same key.
///
/// Generic over `sqlx::Executor` so callers can run this against a bare pool
/// or an in-flight transaction, same as `upsert`/`delete` below.
pub async fn list_effective<'a, E>(
    executor: E,
    service_id: Uuid,
    environment_id: Uuid,
) -> Result<Vec<EnvironmentVariable>>
where
    E: sqlx::Executor<'a, Database = sqlx::Postgres>,
{
    let rows = timed(
        "env_vars::list_effective",
        sqlx::query_as!(
            EnvironmentVariable,
            r#"
            SELECT DISTINCT ON (key)
                id, service_id, environment_id, key, value_encrypted, is_secret,
                created_by, created_at, updated_at
            FROM environment_variables
            WHERE service_id = $1 AND (environment_id = $2 OR environment_id IS NULL)
            ORDER BY key, environment_id NULLS LAST
            "#,
            service_id,
            environment_id
        )
        .fetch_all(executor),
    )
    .await
    .context("failed to list effective environment variables")?;

    Ok(rows)
}

/// Insert or update a single row. Generic over `Executor` so the bulk-upsert
/// path in `env_vars::EnvVarService` can call this once per key against the
/// same open transaction instead of against the pool.
pub async fn upsert<'a, E>(
    executor: E,
    service_id: Uuid,
    environment_id: Option<Uuid>,
    key: &str,
    value_encrypted: &str,
    is_secret: bool,
    created_by: Option<Uuid>,
) -> Result<EnvironmentVariable>
where
    E: sqlx::Executor<'a, Database = sqlx::Postgres>,
{
    let row = sqlx::query_as!(
        EnvironmentVariable,
        r#"
        INSERT INTO environment_variables
            (service_id, environment_id, key, value_encrypted, is_secret, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (service_id, (COALESCE(environment_id, '00000000-0000-0000-0000-000000000000'::uuid)), key)
        DO UPDATE SET value_encrypted = $4, is_secret = $5, updated_at = NOW()
        RETURNING
            id, service_id, environment_id, key, value_encrypted, is_secret,
            created_by, created_at, updated_at
        "#,
        service_id,
        environment_id,
        key,
        value_encrypted,
        is_secret,
        created_by
    )
    .fetch_one(executor)
    .await
    .context("failed to upsert environment variable")?;

    Ok(row)
}

pub async fn delete<'a, E>(
    executor: E,
    service_id: Uuid,
    environment_id: Option<Uuid>,
    key: &str,
) -> Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Postgres>,
{
    sqlx::query!(
        r#"
        DELETE FROM environment_variables
        WHERE service_id = $1
          AND key = $3
          AND environment_id IS NOT DISTINCT FROM $2
        "#,
        service_id,
        environment_id,
        key
    )
    .execute(executor)
    .await
    .context("failed to delete environment variable")?;

    Ok(())
}
