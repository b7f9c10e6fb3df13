use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{BindingStatus, DatabaseAddonBinding};

pub async fn create(
    pool: &PgPool,
    addon_id: Uuid,
    service_id: Uuid,
    env_var_name: &str,
) -> Result<DatabaseAddonBinding> {
    let status = BindingStatus::Active.to_string();
    let binding = sqlx::query_as!(
        DatabaseAddonBinding,
        r#"
        INSERT INTO database_addon_bindings (addon_id, service_id, env_var_name, status)
        VALUES ($1, $2, $3, $4)
        RETURNING
            id, addon_id, service_id, env_var_name,
            status as "status: BindingStatus",
            created_at, updated_at
        "#,
        addon_id,
        service_id,
        env_var_name,
        status
    )
    .fetch_one(pool)
    .await
    .context("failed to create addon binding")?;

    Ok(binding)
}

pub async fn revoke(pool: &PgPool, id: Uuid) -> Result<()> {
    let status = BindingStatus::Revoked.to_string();
    sqlx::query!(
        "UPDATE database_addon_bindings SET status = $2, updated_at = NOW() WHERE id = $1",
        id,
        status
    )
    .execute(pool)
    .await
    .context("failed to revoke addon binding")?;
    Ok(())
}

pub async fn list_for_addon(pool: &PgPool, addon_id: Uuid) -> Result<Vec<DatabaseAddonBinding>> {
    let bindings = sqlx::query_as!(
        DatabaseAddonBinding,
        r#"
        SELECT
            id, addon_id, service_id, env_var_name,
            status as "status: BindingStatus",
            created_at, updated_at
        FROM database_addon_bindings
        WHERE addon_id = $1
        ORDER BY created_at ASC
        "#,
        addon_id
    )
    .fetch_all(pool)
    .await
    .context("failed to list bindings for addon")?;

    Ok(bindings)
}

/// Active bindings for a service joined with their addon, for env-var injection.
pub async fn list_active_for_service(
    pool: &PgPool,
    service_id: Uuid,
) -> Result<Vec<(DatabaseAddonBinding, crate::db::models::DatabaseAddon)>> {
    use crate::db::models::{AddonStatus, AddonType, DatabaseAddon};

    struct Row {
        binding_id: Uuid,
        addon_id: Uuid,
        service_id: Uuid,
        env_var_name: String,
        binding_created_at: chrono::DateTime<chrono::Utc>,
        binding_updated_at: chrono::DateTime<chrono::Utc>,
        project_id: Uuid,
        environment_id: Option<Uuid>,
        addon_type: AddonType,
        name: String,
        status: AddonStatus,
        status_message: Option<String>,
        config: serde_json::Value,
        k8s_namespace: Option<String>,
        k8s_resource_name: Option<String>,
        connection_secret: Option<String>,
        host: Option<String>,
        port: Option<i32>,
        database_name: Option<String>,
        username: Option<String>,
        provisioned_at: Option<chrono::DateTime<chrono::Utc>>,
        addon_created_at: chrono::DateTime<chrono::Utc>,
        addon_updated_at: chrono::DateTime<chrono::Utc>,
    }

    let rows = sqlx::query_as!(
        Row,
        r#"
        SELECT
            b.id as binding_id, b.addon_id, b.service_id, b.env_var_name,
            b.created_at as binding_created_at, b.updated_at as binding_updated_at,
            a.project_id, a.environment_id,
            a.addon_type as "addon_type: AddonType",
            a.name,
            a.status as "status: AddonStatus",
            a.status_message, a.config,
            a.k8s_namespace, a.k8s_resource_name, a.connection_secret,
            a.host, a.port, a.database_name, a.username,
            a.provisioned_at,
            a.created_at as addon_created_at, a.updated_at as addon_updated_at
        FROM database_addon_bindings b
        JOIN database_addons a ON a.id = b.addon_id
        WHERE b.service_id = $1 AND b.status = 'Active'
        "#,
        service_id
    )
    .fetch_all(pool)
    .await
    .context("failed to list active bindings for service")?;

    Ok(rows
        .into_iter()
        .map(|r| {
            (
                DatabaseAddonBinding {
                    id: r.binding_id,
                    addon_id: r.addon_id,
                    service_id: r.service_id,
                    env_var_name: r.env_var_name,
                    status: BindingStatus::Active,
                    created_at: r.binding_created_at,
                    updated_at: r.binding_updated_at,
                },
                DatabaseAddon {
                    id: r.addon_id,
                    project_id: r.project_id,
                    environment_id: r.environment_id,
                    addon_type: r.addon_type,
                    name: r.name,
                    status: r.status,
                    status_message: r.status_message,
                    config: r.config,
                    k8s_namespace: r.k8s_namespace,
                    k8s_resource_name: r.k8s_resource_name,
                    connection_secret: r.connection_secret,
                    host: r.host,
                    port: r.port,
                    database_name: r.database_name,
                    username: r.username,
                    provisioned_at: r.provisioned_at,
                    created_at: r.addon_created_at,
                    updated_at: r.addon_updated_at,
                },
            )
        })
        .collect())
}
