use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Release, ReleaseStatus};

pub async fn list_for_service(pool: &PgPool, service_id: Uuid) -> Result<Vec<Release>> {
    let releases = sqlx::query_as!(
        Release,
        r#"
        SELECT
            id, service_id, version, image_uri, git_sha,
            status as "status: ReleaseStatus",
            created_at, updated_at
        FROM releases
        WHERE service_id = $1
        ORDER BY created_at DESC
        "#,
        service_id
    )
    .fetch_all(pool)
    .await
    .context("failed to list releases for service")?;

    Ok(releases)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Release>> {
    let release = sqlx::query_as!(
        Release,
        r#"
        SELECT
            id, service_id, version, image_uri, git_sha,
            status as "status: ReleaseStatus",
            created_at, updated_at
        FROM releases
        WHERE id = $1
        "#,
        id
    )
    .fetch_optional(pool)
    .await
    .context("failed to find release by id")?;

    Ok(release)
}

pub async fn create(
    pool: &PgPool,
    service_id: Uuid,
    version: &str,
    git_sha: &str,
) -> Result<Release> {
    let status = ReleaseStatus::Building.to_string();
    let release = sqlx::query_as!(
        Release,
        r#"
        INSERT INTO releases (service_id, version, git_sha, status)
        VALUES ($1, $2, $3, $4)
        RETURNING
            id, service_id, version, image_uri, git_sha,
            status as "status: ReleaseStatus",
            created_at, updated_at
        "#,
        service_id,
        version,
        git_sha,
        status
    )
    .fetch_one(pool)
    .await
    .context("failed to create release")?;

    Ok(release)
}

pub async fn mark_ready(pool: &PgPool, id: Uuid, image_uri: &str) -> Result<Release> {
    let status = ReleaseStatus::Ready.to_string();
    let release = sqlx::query_as!(
        Release,
        r#"
        UPDATE releases
        SET status = $2, image_uri = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING
            id, service_id, version, image_uri, git_sha,
            status as "status: ReleaseStatus",
            created_at, updated_at
        "#,
        id,
        status,
        image_uri
    )
    .fetch_one(pool)
    .await
    .context("failed to mark release ready")?;

    Ok(release)
}

pub async fn mark_failed(pool: &PgPool, id: Uuid) -> Result<Release> {
    let status = ReleaseStatus::Failed.to_string();
    let release = sqlx::query_as!(
        Release,
        r#"
        UPDATE releases
        SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING
            id, service_id, version, image_uri, git_sha,
            status as "status: ReleaseStatus",
            created_at, updated_at
        "#,
        id,
        status
    )
    .fetch_one(pool)
    .await
    .context("failed to mark release failed")?;

    Ok(release)
}
