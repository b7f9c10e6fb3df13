use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};

/// Wraps a query future with slow-query logging at the 1s threshold. Used at
/// call sites where a query's cost scales with caller-supplied data (usage
/// aggregation windows, effective-env-var resolution) rather than on every
/// repository function uniformly.
pub async fn timed<F, T>(label: &str, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = fut.await;
    let elapsed = start.elapsed();
    if elapsed > Duration::from_secs(1) {
        tracing::warn!(query = label, elapsed_ms = elapsed.as_millis(), "slow query");
    }
    result
}

/// Background task logging pool saturation every 30s, the same
/// `tokio::time::interval` fixed-cadence loop shape used for the domain
/// verification loop, pointed at the connection pool instead.
pub fn spawn_stats_logger(pool: PgPool) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            tracing::info!(size = pool.size(), idle = pool.num_idle(), "db pool stats");
        }
    });
}

/// Runs `f` against a fresh transaction: commits if `f` resolves `Ok`, rolls
/// back if it resolves `Err`. `f` itself must be generic over
/// `sqlx::Executor` at its call sites so the same repository function can run
/// either against a bare `&PgPool` or the `&mut Transaction` handed to it
/// here — see `db::env_vars` for a repository written that way.
///
/// `f` runs on its own spawned task so a panic inside it cannot unwind this
/// function directly; the pending transaction is moved into that task and is
/// dropped there first if it panics (sqlx rolls back a transaction on drop),
/// and only then is the panic resumed here, so it still propagates to the
/// caller after the rollback has happened.
pub async fn with_transaction<F, T>(pool: &PgPool, f: F) -> Result<T>
where
    F: for<'c> FnOnce(
            &'c mut Transaction<'static, Postgres>,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>
        + Send
        + 'static,
    T: Send + 'static,
{
    let tx = pool.begin().await.context("failed to begin transaction")?;

    let outcome = tokio::spawn(async move {
        let mut tx = tx;
        let result = f(&mut tx).await;
        (tx, result)
    })
    .await;

    match outcome {
        Ok((mut tx, Ok(value))) => {
            tx.commit().await.context("failed to commit transaction")?;
            Ok(value)
        }
        Ok((mut tx, Err(e))) => {
            let _ = tx.rollback().await;
            Err(e)
        }
        Err(join_err) => {
            if join_err.is_panic() {
                std::panic::resume_unwind(join_err.into_panic());
            }
            Err(anyhow::anyhow!("transaction task was cancelled: {join_err}"))
        }
    }
}
