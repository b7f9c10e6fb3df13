use crate::encryption::{local::LocalEncryptionProvider, EncryptionProvider};
use crate::metrics::Metrics;
use crate::settings::{dsn_with_timeouts, EncryptionSettings, Settings};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Shared state handed to every background controller: persistence, the
/// encryption provider used for secret-at-rest values, the metrics registry,
/// and the fully resolved settings.
#[derive(Clone)]
pub struct ControllerState {
    pub db_pool: PgPool,
    pub encryption: Arc<dyn EncryptionProvider>,
    pub metrics: Arc<Metrics>,
    pub settings: Arc<Settings>,
}

impl ControllerState {
    pub async fn new(settings: Settings) -> Result<Self> {
        tracing::info!(
            max_connections = settings.database.max_connections,
            "connecting to PostgreSQL"
        );

        let dsn = dsn_with_timeouts(&settings.database.url);
        let db_pool = PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&dsn)
            .await
            .context("failed to connect to PostgreSQL")?;

        tracing::info!("successfully connected to PostgreSQL");

        Self::run_migrations(&db_pool).await?;

        let encryption: Arc<dyn EncryptionProvider> = match &settings.encryption {
            EncryptionSettings::Local { key } => {
                Arc::new(LocalEncryptionProvider::from_base64_key(key)?)
            }
        };

        let metrics = Arc::new(Metrics::new().context("failed to initialize metrics registry")?);

        Ok(Self {
            db_pool,
            encryption,
            metrics,
            settings: Arc::new(settings),
        })
    }

    async fn run_migrations(pool: &PgPool) -> Result<()> {
        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .context("failed to run migrations")?;
        tracing::info!("migrations completed successfully");
        Ok(())
    }

    /// Spawn a task that logs pool saturation every 30s, matching the
    /// connection-health visibility the teacher's server startup gives the HTTP pool.
    pub fn spawn_pool_monitor(&self) {
        crate::db::pool::spawn_stats_logger(self.db_pool.clone());
    }
}
