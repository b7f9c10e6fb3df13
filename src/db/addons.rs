use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{AddonStatus, AddonType, DatabaseAddon};

pub async fn list_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<DatabaseAddon>> {
    let addons = sqlx::query_as!(
        DatabaseAddon,
        r#"
        SELECT
            id, project_id, environment_id,
            addon_type as "addon_type: AddonType",
            name,
            status as "status: AddonStatus",
            status_message, config,
            k8s_namespace, k8s_resource_name, connection_secret,
            host, port, database_name, username,
            provisioned_at, created_at, updated_at
        FROM database_addons
        WHERE project_id = $1 AND status != 'Deleted'
        ORDER BY created_at DESC
        "#,
        project_id
    )
    .fetch_all(pool)
    .await
    .context("failed to list addons for project")?;

    Ok(addons)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<DatabaseAddon>> {
    let addon = sqlx::query_as!(
        DatabaseAddon,
        r#"
        SELECT
            id, project_id, environment_id,
            addon_type as "addon_type: AddonType",
            name,
            status as "status: AddonStatus",
            status_message, config,
            k8s_namespace, k8s_resource_name, connection_secret,
            host, port, database_name, username,
            provisioned_at, created_at, updated_at
        FROM database_addons
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find addon by id")?;

    Ok(addon)
}

pub async fn find_by_name(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
) -> Result<Option<DatabaseAddon>> {
    let addon = sqlx::query_as!(
        DatabaseAddon,
        r#"
        SELECT
            id, project_id, environment_id,
            addon_type as "addon_type: AddonType",
            name,
            status as "status: AddonStatus",
            status_message, config,
            k8s_namespace, k8s_resource_name, connection_secret,
            host, port, database_name, username,
            provisioned_at, created_at, updated_at
        FROM database_addons
        WHERE project_id = $1 AND name = $2 AND status != 'Deleted'
        "#,
        project_id,
        name
    )
    .fetch_optional(pool)
    .await
    .context("failed to find addon by name")?;

    Ok(addon)
}

pub async fn create(
    pool: &PgPool,
    project_id: Uuid,
    environment_id: Option<Uuid>,
    addon_type: AddonType,
    name: &str,
    config: serde_json::Value,
) -> Result<DatabaseAddon> {
    let addon_type_str = addon_type.to_string();
    let status = AddonStatus::Pending.to_string();

    let addon = sqlx::query_as!(
        DatabaseAddon,
        r#"
        INSERT INTO database_addons (project_id, environment_id, addon_type, name, status, config)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING
            id, project_id, environment_id,
            addon_type as "addon_type: AddonType",
            name,
            status as "status: AddonStatus",
            status_message, config,
            k8s_namespace, k8s_resource_name, connection_secret,
            host, port, database_name, username,
            provisioned_at, created_at, updated_at
        "#,
        project_id,
        environment_id,
        addon_type_str,
        name,
        status,
        config
    )
    .fetch_one(pool)
    .await
    .context("failed to create addon")?;

    Ok(addon)
}

pub async fn mark_provisioning(pool: &PgPool, id: Uuid) -> Result<()> {
    let status = AddonStatus::Provisioning.to_string();
    sqlx::query!(
        "UPDATE database_addons SET status = $2, updated_at = NOW() WHERE id = $1",
        id,
        status
    )
    .execute(pool)
    .await
    .context("failed to mark addon provisioning")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn mark_provisioned(
    pool: &PgPool,
    id: Uuid,
    k8s_namespace: &str,
    k8s_resource_name: &str,
    connection_secret: &str,
) -> Result<()> {
    sqlx::query!(
        r#"
        UPDATE database_addons
        SET k8s_namespace = $2, k8s_resource_name = $3, connection_secret = $4, updated_at = NOW()
        WHERE id = $1
        "#,
        id,
        k8s_namespace,
        k8s_resource_name,
        connection_secret
    )
    .execute(pool)
    .await
    .context("failed to record provisioning result")?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str) -> Result<()> {
    let status = AddonStatus::Failed.to_string();
    sqlx::query!(
        r#"
        UPDATE database_addons
        SET status = $2, status_message = $3, updated_at = NOW()
        WHERE id = $1
        "#,
        id,
        status,
        error
    )
    .execute(pool)
    .await
    .context("failed to mark addon failed")?;
    Ok(())
}

/// Apply the result of a `Provisioner::GetStatus` poll. Does not overwrite any
/// field when the addon is already in a terminal state (guarded by the caller,
/// which only refreshes non-terminal addons, but kept defensive here too).
#[allow(clippy::too_many_arguments)]
pub async fn apply_status_refresh(
    pool: &PgPool,
    id: Uuid,
    status: AddonStatus,
    status_message: Option<&str>,
    host: Option<&str>,
    port: Option<i32>,
    database_name: Option<&str>,
    username: Option<&str>,
    set_provisioned_at: bool,
) -> Result<()> {
    let status_str = status.to_string();
    if set_provisioned_at {
        sqlx::query!(
            r#"
            UPDATE database_addons
            SET status = $2, status_message = $3, host = $4, port = $5,
                database_name = $6, username = $7, provisioned_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
            id,
            status_str,
            status_message,
            host,
            port,
            database_name,
            username
        )
        .execute(pool)
        .await
        .context("failed to apply addon status refresh")?;
    } else {
        sqlx::query!(
            r#"
            UPDATE database_addons
            SET status = $2, status_message = $3, host = $4, port = $5,
                database_name = $6, username = $7, updated_at = NOW()
            WHERE id = $1
            "#,
            id,
            status_str,
            status_message,
            host,
            port,
            database_name,
            username
        )
        .execute(pool)
        .await
        .context("failed to apply addon status refresh")?;
    }
    Ok(())
}

pub async fn mark_deleting(pool: &PgPool, id: Uuid) -> Result<()> {
    let status = AddonStatus::Deleting.to_string();
    sqlx::query!(
        "UPDATE database_addons SET status = $2, updated_at = NOW() WHERE id = $1",
        id,
        status
    )
    .execute(pool)
    .await
    .context("failed to mark addon deleting")?;
    Ok(())
}

pub async fn mark_deleted(pool: &PgPool, id: Uuid) -> Result<()> {
    let status = AddonStatus::Deleted.to_string();
    sqlx::query!(
        "UPDATE database_addons SET status = $2, updated_at = NOW() WHERE id = $1",
        id,
        status
    )
    .execute(pool)
    .await
    .context("failed to mark addon deleted")?;
    Ok(())
}

pub async fn list_non_terminal(pool: &PgPool, limit: i64) -> Result<Vec<DatabaseAddon>> {
    let addons = sqlx::query_as!(
        DatabaseAddon,
        r#"
        SELECT
            id, project_id, environment_id,
            addon_type as "addon_type: AddonType",
            name,
            status as "status: AddonStatus",
            status_message, config,
            k8s_namespace, k8s_resource_name, connection_secret,
            host, port, database_name, username,
            provisioned_at, created_at, updated_at
        FROM database_addons
        WHERE status NOT IN ('Ready', 'Failed', 'Deleted')
        ORDER BY updated_at ASC
        LIMIT $1
        "#,
        limit
    )
    .fetch_all(pool)
    .await
    .context("failed to list non-terminal addons")?;

    Ok(addons)
}
