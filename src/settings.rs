use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
    pub encryption: EncryptionSettings,
    #[serde(default)]
    pub rotation: RotationSettings,
    #[serde(default)]
    pub provenance: ProvenanceSettings,
    #[serde(default)]
    pub aggregator: AggregatorSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_namespace_format() -> String {
    "project-{project_id}".to_string()
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_idle_in_transaction_timeout_ms() -> u64 {
    60_000
}

/// Kubernetes client configuration.
///
/// `namespace_format` must contain the `{project_id}` placeholder; it is used to
/// derive the per-project namespace addons are provisioned into
/// (`project-<first 8 hex of project id>` by default, see `addons::namespace_for_project`).
#[derive(Debug, Deserialize, Clone)]
pub struct KubernetesSettings {
    #[serde(default)]
    pub kubeconfig: Option<String>,
    #[serde(default = "default_namespace_format")]
    pub namespace_format: String,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            namespace_format: default_namespace_format(),
        }
    }
}

/// Encryption provider configuration for environment-variable secret values.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "provider", rename_all = "kebab-case")]
pub enum EncryptionSettings {
    Local {
        /// Base64-encoded 32-byte AES-256 key.
        key: String,
    },
}

fn default_rotation_workers() -> usize {
    3
}

fn default_rotation_queue_capacity() -> usize {
    100
}

fn default_audit_queue_capacity() -> usize {
    1000
}

fn default_rollout_poll_interval_secs() -> u64 {
    5
}

fn default_rollout_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RotationSettings {
    #[serde(default = "default_rotation_workers")]
    pub worker_count: usize,
    #[serde(default = "default_rotation_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_audit_queue_capacity")]
    pub audit_queue_capacity: usize,
    #[serde(default = "default_rollout_poll_interval_secs")]
    pub rollout_poll_interval_secs: u64,
    #[serde(default = "default_rollout_timeout_secs")]
    pub rollout_timeout_secs: u64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            worker_count: default_rotation_workers(),
            queue_capacity: default_rotation_queue_capacity(),
            audit_queue_capacity: default_audit_queue_capacity(),
            rollout_poll_interval_secs: default_rollout_poll_interval_secs(),
            rollout_timeout_secs: default_rollout_timeout_secs(),
        }
    }
}

fn default_code_host_base_url() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvenanceSettings {
    #[serde(default = "default_code_host_base_url")]
    pub code_host_base_url: String,
    #[serde(default)]
    pub code_host_token: Option<String>,
}

impl Default for ProvenanceSettings {
    fn default() -> Self {
        Self {
            code_host_base_url: default_code_host_base_url(),
            code_host_token: None,
        }
    }
}

fn default_aggregation_timeout_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorSettings {
    #[serde(default = "default_aggregation_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_aggregation_timeout_secs(),
        }
    }
}

fn default_webhook_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationSettings {
    #[serde(default = "default_webhook_timeout_secs")]
    pub delivery_timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("ENCLII_CONFIG_DIR").unwrap_or_else(|_| "/config".into());

        let mut settings: Settings = Config::builder()
            .add_source(File::with_name(&format!("{}/default.toml", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            .add_source(Environment::with_prefix("ENCLII").separator("__"))
            .build()?
            .try_deserialize()?;

        // DATABASE_URL is a common convention and takes precedence over TOML/ENCLII__.
        if let Ok(database_url) = env::var("DATABASE_URL") {
            if !database_url.is_empty() {
                settings.database.url = database_url;
            }
        }

        if settings.database.url.is_empty() {
            return Err(ConfigError::Message(
                "Database URL not configured. Set DATABASE_URL or [database] url in config"
                    .to_string(),
            ));
        }

        Self::validate_format_string(
            &settings.kubernetes.namespace_format,
            "namespace_format",
            "{project_id}",
        )?;

        Ok(settings)
    }

    fn validate_format_string(
        format_str: &str,
        field_name: &str,
        required_placeholder: &str,
    ) -> Result<(), ConfigError> {
        if !format_str.contains(required_placeholder) {
            return Err(ConfigError::Message(format!(
                "Kubernetes configuration error: '{}' must contain '{}' placeholder. Got: '{}'",
                field_name, required_placeholder, format_str
            )));
        }
        Ok(())
    }
}

/// Build a Postgres DSN with the statement/lock/idle-in-transaction timeouts the
/// persistence substrate requires, appended as `options=` query parameters understood
/// by `sqlx::postgres::PgConnectOptions`.
pub fn dsn_with_timeouts(base_url: &str) -> String {
    let options = format!(
        "-c statement_timeout={} -c lock_timeout={} -c idle_in_transaction_session_timeout={}",
        default_statement_timeout_ms(),
        default_lock_timeout_ms(),
        default_idle_in_transaction_timeout_ms(),
    );
    let sep = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{sep}options={}", urlencoding_minimal(&options))
}

/// Minimal percent-encoding for the `options` query parameter (spaces and `=`).
fn urlencoding_minimal(s: &str) -> String {
    s.replace(' ', "%20").replace('=', "%3D")
}
