use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::Environment;

pub async fn list_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Environment>> {
    let environments = sqlx::query_as!(
        Environment,
        r#"
        SELECT id, project_id, name, is_production, created_at, updated_at
        FROM environments
        WHERE project_id = $1
        ORDER BY created_at ASC
        "#,
        project_id
    )
    .fetch_all(pool)
    .await
    .context("failed to list environments for project")?;

    Ok(environments)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Environment>> {
    let environment = sqlx::query_as!(
        Environment,
        r#"
        SELECT id, project_id, name, is_production, created_at, updated_at
        FROM environments
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find environment by id")?;

    Ok(environment)
}

pub async fn find_by_name(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
) -> Result<Option<Environment>> {
    let environment = sqlx::query_as!(
        Environment,
        r#"
        SELECT id, project_id, name, is_production, created_at, updated_at
        FROM environments
        WHERE project_id = $1 AND name = $2
        "#,
        project_id,
        name
    )
    .fetch_optional(pool)
    .await
    .context("failed to find environment by name")?;

    Ok(environment)
}

pub async fn create(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
    is_production: bool,
) -> Result<Environment> {
    let environment = sqlx::query_as!(
        Environment,
        r#"
        INSERT INTO environments (project_id, name, is_production)
        VALUES ($1, $2, $3)
        RETURNING id, project_id, name, is_production, created_at, updated_at
        "#,
        project_id,
        name,
        is_production
    )
    .fetch_one(pool)
    .await
    .context("failed to create environment")?;

    Ok(environment)
}
