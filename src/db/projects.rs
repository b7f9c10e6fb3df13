use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::Project;

pub async fn list(pool: &PgPool) -> Result<Vec<Project>> {
    let projects = sqlx::query_as!(
        Project,
        r#"
        SELECT id, name, slug, created_at, updated_at
        FROM projects
        ORDER BY created_at DESC
        "#
    )
    .fetch_all(pool)
    .await
    .context("failed to list projects")?;

    Ok(projects)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as!(
        Project,
        r#"
        SELECT id, name, slug, created_at, updated_at
        FROM projects
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find project by id")?;

    Ok(project)
}

pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Project>> {
    let project = sqlx::query_as!(
        Project,
        r#"
        SELECT id, name, slug, created_at, updated_at
        FROM projects
        WHERE slug = $1
        "#,
        slug
    )
    .fetch_optional(pool)
    .await
    .context("failed to find project by slug")?;

    Ok(project)
}

pub async fn create(pool: &PgPool, name: &str, slug: &str) -> Result<Project> {
    let project = sqlx::query_as!(
        Project,
        r#"
        INSERT INTO projects (name, slug)
        VALUES ($1, $2)
        RETURNING id, name, slug, created_at, updated_at
        "#,
        name,
        slug
    )
    .fetch_one(pool)
    .await
    .context("failed to create project")?;

    Ok(project)
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query!("DELETE FROM projects WHERE id = $1", id)
        .execute(pool)
        .await
        .context("failed to delete project")?;

    Ok(())
}

/// Derive the Kubernetes namespace for a project's addons: `project-<first 8 hex>`.
pub fn namespace_for_project(project_id: Uuid) -> String {
    format!("project-{}", &project_id.simple().to_string()[..8])
}
