use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::Service;

pub async fn list_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Service>> {
    let services = sqlx::query_as!(
        Service,
        r#"
        SELECT id, project_id, name, git_repo, app_path, auto_deploy, created_at, updated_at
        FROM services
        WHERE project_id = $1
        ORDER BY created_at DESC
        "#,
        project_id
    )
    .fetch_all(pool)
    .await
    .context("failed to list services for project")?;

    Ok(services)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Service>> {
    let service = sqlx::query_as!(
        Service,
        r#"
        SELECT id, project_id, name, git_repo, app_path, auto_deploy, created_at, updated_at
        FROM services
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find service by id")?;

    Ok(service)
}

pub async fn find_by_name(pool: &PgPool, project_id: Uuid, name: &str) -> Result<Option<Service>> {
    let service = sqlx::query_as!(
        Service,
        r#"
        SELECT id, project_id, name, git_repo, app_path, auto_deploy, created_at, updated_at
        FROM services
        WHERE project_id = $1 AND name = $2
        "#,
        project_id,
        name
    )
    .fetch_optional(pool)
    .await
    .context("failed to find service by name")?;

    Ok(service)
}

#[allow(clippy::too_many_arguments)]
pub async fn create(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
    git_repo: &str,
    app_path: &str,
    auto_deploy: bool,
) -> Result<Service> {
    let service = sqlx::query_as!(
        Service,
        r#"
        INSERT INTO services (project_id, name, git_repo, app_path, auto_deploy)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, project_id, name, git_repo, app_path, auto_deploy, created_at, updated_at
        "#,
        project_id,
        name,
        git_repo,
        app_path,
        auto_deploy
    )
    .fetch_one(pool)
    .await
    .context("failed to create service")?;

    Ok(service)
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query!("DELETE FROM services WHERE id = $1", id)
        .execute(pool)
        .await
        .context("failed to delete service")?;

    Ok(())
}
