use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Environment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub is_production: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub git_repo: String,
    pub app_path: String,
    pub auto_deploy: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum ReleaseStatus {
    Building,
    Ready,
    Failed,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseStatus::Building => write!(f, "Building"),
            ReleaseStatus::Ready => write!(f, "Ready"),
            ReleaseStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Release {
    pub id: Uuid,
    pub service_id: Uuid,
    pub version: String,
    pub image_uri: Option<String>,
    pub git_sha: String,
    pub status: ReleaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum DeploymentHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for DeploymentHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentHealth::Unknown => write!(f, "Unknown"),
            DeploymentHealth::Healthy => write!(f, "Healthy"),
            DeploymentHealth::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Running,
    Failed,
    Stopped,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStatus::Pending => write!(f, "Pending"),
            DeploymentStatus::Deploying => write!(f, "Deploying"),
            DeploymentStatus::Running => write!(f, "Running"),
            DeploymentStatus::Failed => write!(f, "Failed"),
            DeploymentStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deployment {
    pub id: Uuid,
    pub release_id: Uuid,
    pub environment_id: Uuid,
    pub replicas: i32,
    pub status: DeploymentStatus,
    pub health: DeploymentHealth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum AddonType {
    Postgres,
    Mysql,
    Redis,
}

impl std::fmt::Display for AddonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddonType::Postgres => write!(f, "postgres"),
            AddonType::Mysql => write!(f, "mysql"),
            AddonType::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum AddonStatus {
    Pending,
    Provisioning,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl AddonStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AddonStatus::Ready | AddonStatus::Failed | AddonStatus::Deleted
        )
    }
}

impl std::fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddonStatus::Pending => write!(f, "Pending"),
            AddonStatus::Provisioning => write!(f, "Provisioning"),
            AddonStatus::Ready => write!(f, "Ready"),
            AddonStatus::Failed => write!(f, "Failed"),
            AddonStatus::Deleting => write!(f, "Deleting"),
            AddonStatus::Deleted => write!(f, "Deleted"),
        }
    }
}

/// Per-type provisioning config. Stored as `jsonb`; `AddonConfig` is the
/// union of fields any addon type may populate, with type-specific defaults
/// applied by `addons::defaults` before the row is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddonConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_gb: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub ha_enabled: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct DatabaseAddon {
    pub id: Uuid,
    pub project_id: Uuid,
    pub environment_id: Option<Uuid>,
    pub addon_type: AddonType,
    pub name: String,
    pub status: AddonStatus,
    pub status_message: Option<String>,
    pub config: serde_json::Value,
    pub k8s_namespace: Option<String>,
    pub k8s_resource_name: Option<String>,
    pub connection_secret: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub database_name: Option<String>,
    pub username: Option<String>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatabaseAddon {
    pub fn parsed_config(&self) -> AddonConfig {
        serde_json::from_value(self.config.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum BindingStatus {
    Active,
    Revoked,
}

impl std::fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingStatus::Active => write!(f, "Active"),
            BindingStatus::Revoked => write!(f, "Revoked"),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DatabaseAddonBinding {
    pub id: Uuid,
    pub addon_id: Uuid,
    pub service_id: Uuid,
    pub env_var_name: String,
    pub status: BindingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct EnvironmentVariable {
    pub id: Uuid,
    pub service_id: Uuid,
    pub environment_id: Option<Uuid>,
    pub key: String,
    pub value_encrypted: String,
    pub is_secret: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum RotationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl std::fmt::Display for RotationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationStatus::Pending => write!(f, "Pending"),
            RotationStatus::InProgress => write!(f, "InProgress"),
            RotationStatus::Completed => write!(f, "Completed"),
            RotationStatus::Failed => write!(f, "Failed"),
            RotationStatus::RolledBack => write!(f, "RolledBack"),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SecretChangeEvent {
    pub id: Uuid,
    pub service_id: Uuid,
    pub environment: String,
    pub secret_name: String,
    pub old_version: Option<String>,
    pub new_version: String,
    pub status: RotationStatus,
    pub rollout_id: Option<String>,
    pub triggered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RotationAuditLog {
    pub id: Uuid,
    pub event_id: Uuid,
    pub service_id: Uuid,
    pub secret_name: String,
    pub old_version: Option<String>,
    pub new_version: String,
    pub status: RotationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub pods_restarted: i32,
    pub rollout_strategy: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageEvent {
    pub id: Uuid,
    pub project_id: Uuid,
    pub event_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub metrics: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl UsageEvent {
    pub fn metrics_map(&self) -> HashMap<String, f64> {
        serde_json::from_value(self.metrics.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct HourlyUsage {
    pub project_id: Uuid,
    pub metric_type: String,
    pub hour: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DailyUsage {
    pub project_id: Uuid,
    pub metric_type: String,
    pub date: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum WebhookKind {
    Slack,
    Discord,
    Telegram,
    Custom,
}

impl std::fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookKind::Slack => write!(f, "slack"),
            WebhookKind::Discord => write!(f, "discord"),
            WebhookKind::Telegram => write!(f, "telegram"),
            WebhookKind::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookDestination {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: WebhookKind,
    pub url: String,
    pub signing_secret: Option<String>,
    pub subscribed_event_types: Vec<String>,
    pub enabled: bool,
    pub consecutive_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "Pending"),
            DeliveryStatus::Success => write!(f, "Success"),
            DeliveryStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ComplianceReceiptRow {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub service_id: Uuid,
    pub environment_id: Uuid,
    pub release_id: Uuid,
    pub policy_compliant: bool,
    pub receipt: serde_json::Value,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub destination_id: Uuid,
    pub event_id: Uuid,
    pub status: DeliveryStatus,
    pub http_status: Option<i32>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
