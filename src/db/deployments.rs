use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Deployment, DeploymentHealth, DeploymentStatus};

pub async fn list_for_environment(pool: &PgPool, environment_id: Uuid) -> Result<Vec<Deployment>> {
    let deployments = sqlx::query_as!(
        Deployment,
        r#"
        SELECT
            id, release_id, environment_id, replicas,
            status as "status: DeploymentStatus",
            health as "health: DeploymentHealth",
            created_at, updated_at
        FROM deployments
        WHERE environment_id = $1
        ORDER BY created_at DESC
        "#,
        environment_id
    )
    .fetch_all(pool)
    .await
    .context("failed to list deployments for environment")?;

    Ok(deployments)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Deployment>> {
    let deployment = sqlx::query_as!(
        Deployment,
        r#"
        SELECT
            id, release_id, environment_id, replicas,
            status as "status: DeploymentStatus",
            health as "health: DeploymentHealth",
            created_at, updated_at
        FROM deployments
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find deployment by id")?;

    Ok(deployment)
}

pub async fn create(
    pool: &PgPool,
    release_id: Uuid,
    environment_id: Uuid,
    replicas: i32,
) -> Result<Deployment> {
    let status = DeploymentStatus::Pending.to_string();
    let health = DeploymentHealth::Unknown.to_string();

    let deployment = sqlx::query_as!(
        Deployment,
        r#"
        INSERT INTO deployments (release_id, environment_id, replicas, status, health)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING
            id, release_id, environment_id, replicas,
            status as "status: DeploymentStatus",
            health as "health: DeploymentHealth",
            created_at, updated_at
        "#,
        release_id,
        environment_id,
        replicas,
        status,
        health
    )
    .fetch_one(pool)
    .await
    .context("failed to create deployment")?;

    Ok(deployment)
}

pub async fn update_status_and_health(
    pool: &PgPool,
    id: Uuid,
    status: DeploymentStatus,
    health: DeploymentHealth,
) -> Result<Deployment> {
    let status_str = status.to_string();
    let health_str = health.to_string();

    let deployment = sqlx::query_as!(
        Deployment,
        r#"
        UPDATE deployments
        SET status = $2, health = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING
            id, release_id, environment_id, replicas,
            status as "status: DeploymentStatus",
            health as "health: DeploymentHealth",
            created_at, updated_at
        "#,
        id,
        status_str,
        health_str
    )
    .fetch_one(pool)
    .await
    .context("failed to update deployment status")?;

    Ok(deployment)
}
