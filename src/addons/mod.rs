//! Addon provisioning engine: turns a `DatabaseAddon` row into a running
//! Postgres/MySQL/Redis workload on Kubernetes and keeps its status in sync.
//!
//! The engine is split the way `extensions::Extension` is in the teacher: a
//! capability trait (`Provisioner`) with one implementation per addon type,
//! dispatched from a small registry, plus a service layer (`AddonService`)
//! that owns the DB-row state machine and spawns the detached background
//! work the spec requires provisioning to run under.

pub mod mysql;
pub mod postgres;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::{AddonConfig, AddonStatus, AddonType, DatabaseAddon, DatabaseAddonBinding};
use crate::db::{addon_bindings, addons as db_addons};
use crate::errors::{CoreError, CoreResult};
use crate::state::ControllerState;

/// Inputs a provisioner needs to create the cluster-backed resources for an addon.
pub struct ProvisionRequest<'a> {
    pub addon: &'a DatabaseAddon,
    pub namespace: &'a str,
    pub project_id: Uuid,
}

/// Result of a successful `Provisioner::provision` call.
pub struct ProvisionOutcome {
    pub k8s_resource_name: String,
    pub connection_secret: String,
    pub message: String,
}

/// Live status pulled from the cluster, copied onto the addon row by `RefreshStatus`.
pub struct AddonStatusInfo {
    pub status: AddonStatus,
    pub status_message: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub database_name: Option<String>,
    pub username: Option<String>,
    pub ready: bool,
}

pub struct AddonCredentials {
    pub host: String,
    pub port: i32,
    pub database_name: String,
    pub username: String,
    pub password: String,
    pub connection_uri: String,
}

/// Per-addon-type capability set. One implementation per `AddonType` variant;
/// adding a new type means adding a new variant and registry entry, not
/// touching the others.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, req: ProvisionRequest<'_>) -> Result<ProvisionOutcome>;
    async fn deprovision(&self, addon: &DatabaseAddon) -> Result<()>;
    async fn get_status(&self, addon: &DatabaseAddon) -> Result<AddonStatusInfo>;
    async fn get_credentials(&self, addon: &DatabaseAddon) -> Result<AddonCredentials>;
    async fn get_connection_uri(&self, addon: &DatabaseAddon) -> Result<String> {
        Ok(self.get_credentials(addon).await?.connection_uri)
    }
}

/// Dispatches to the provisioner for a given `AddonType`. A thin keyed lookup,
/// not a dynamic plugin system — new types are added here at compile time.
pub struct ProvisionerRegistry {
    postgres: Arc<dyn Provisioner>,
    mysql: Arc<dyn Provisioner>,
    redis: Arc<dyn Provisioner>,
}

impl ProvisionerRegistry {
    pub fn new(k8s: Arc<crate::k8s::K8sClient>) -> Self {
        Self {
            postgres: Arc::new(postgres::PostgresProvisioner::new(k8s.clone())),
            mysql: Arc::new(mysql::MysqlProvisioner::new(k8s.clone())),
            redis: Arc::new(redis::RedisProvisioner::new(k8s)),
        }
    }

    pub fn get(&self, addon_type: AddonType) -> Arc<dyn Provisioner> {
        match addon_type {
            AddonType::Postgres => self.postgres.clone(),
            AddonType::Mysql => self.mysql.clone(),
            AddonType::Redis => self.redis.clone(),
        }
    }
}

/// Target namespace for a project's addons: `project-<first 8 hex of project id>`.
pub fn namespace_for_project(project_id: Uuid) -> String {
    let hex = project_id.simple().to_string();
    format!("project-{}", &hex[..8])
}

/// Fill in per-type defaults for any config field the caller left unset.
/// Applied before the row is persisted so the stored config is always complete.
pub fn apply_defaults(addon_type: AddonType, mut config: AddonConfig) -> AddonConfig {
    match addon_type {
        AddonType::Postgres => {
            config.version.get_or_insert_with(|| "16".to_string());
            config.storage_gb.get_or_insert(10);
            config.cpu.get_or_insert_with(|| "500m".to_string());
            config.memory.get_or_insert_with(|| "512Mi".to_string());
            config.replicas.get_or_insert(1);
        }
        AddonType::Mysql => {
            config.version.get_or_insert_with(|| "8.0".to_string());
            config.storage_gb.get_or_insert(10);
            config.cpu.get_or_insert_with(|| "500m".to_string());
            config.memory.get_or_insert_with(|| "512Mi".to_string());
            config.replicas.get_or_insert(1);
        }
        AddonType::Redis => {
            config.memory.get_or_insert_with(|| "256Mi".to_string());
            config.replicas.get_or_insert(1);
        }
    }
    config
}

/// Service layer over `db::addons` + `Provisioner`. Owns the addon state
/// machine described in the spec's "Creation flow"/"Status refresh"/"Deletion"
/// sections.
pub struct AddonService {
    state: Arc<ControllerState>,
    registry: Arc<ProvisionerRegistry>,
}

impl AddonService {
    pub fn new(state: Arc<ControllerState>, registry: Arc<ProvisionerRegistry>) -> Self {
        Self { state, registry }
    }

    /// `CreateAddon`: validate, check name uniqueness, persist as `pending`,
    /// then spawn the detached background task that actually provisions.
    ///
    /// The spawned task uses `tokio::spawn` with cloned `Arc`s rather than
    /// anything tied to the caller's request-scoped context, so a client
    /// disconnect never aborts provisioning — the same "user-initiated,
    /// long-running side effect must outlive the request" rule the teacher's
    /// deployment controller background loop follows.
    pub async fn create_addon(
        &self,
        project_id: Uuid,
        environment_id: Option<Uuid>,
        addon_type: AddonType,
        name: &str,
        config: AddonConfig,
    ) -> CoreResult<DatabaseAddon> {
        if name.trim().is_empty() {
            return Err(CoreError::validation("addon name must not be empty"));
        }

        if db_addons::find_by_name(&self.state.db_pool, project_id, name)
            .await
            .map_err(|e| CoreError::from_db_error("checking addon name uniqueness", e))?
            .is_some()
        {
            return Err(CoreError::conflict(format!(
                "addon named '{name}' already exists in this project"
            )));
        }

        let config = apply_defaults(addon_type, config);
        let config_json = serde_json::to_value(&config)
            .map_err(|e| CoreError::validation(format!("invalid addon config: {e}")))?;

        let addon = db_addons::create(
            &self.state.db_pool,
            project_id,
            environment_id,
            addon_type,
            name,
            config_json,
        )
        .await
        .map_err(|e| CoreError::from_db_error("creating addon row", e))?;

        db_addons::mark_provisioning(&self.state.db_pool, addon.id)
            .await
            .map_err(|e| CoreError::from_db_error("marking addon provisioning", e))?;

        self.spawn_provision(addon.id, project_id);

        let mut addon = addon;
        addon.status = AddonStatus::Provisioning;
        Ok(addon)
    }

    /// Detached background provisioning task. Deliberately does not take a
    /// cancellation token scoped to the originating request: spawning a plain
    /// `tokio::spawn` task (rather than one tied to a request-scoped handle)
    /// means a client disconnect never aborts provisioning.
    fn spawn_provision(&self, addon_id: Uuid, project_id: Uuid) {
        let pool = self.state.db_pool.clone();
        let registry = self.registry.clone();
        let metrics = self.state.metrics.clone();

        tokio::spawn(async move {
            let addon = match db_addons::find_by_id(&pool, addon_id).await {
                Ok(Some(a)) => a,
                Ok(None) => {
                    error!(%addon_id, "addon disappeared before provisioning started");
                    return;
                }
                Err(e) => {
                    error!(%addon_id, error = %e, "failed to reload addon before provisioning");
                    return;
                }
            };

            let namespace = namespace_for_project(project_id);
            let provisioner = registry.get(addon.addon_type);
            let addon_type = addon.addon_type;

            // Run the actual provisioning call on its own task so a panic
            // inside a provisioner surfaces as a `JoinError` here instead of
            // taking the process down.
            let inner_pool = pool.clone();
            let handle = tokio::spawn(async move {
                let result = provisioner
                    .provision(ProvisionRequest {
                        addon: &addon,
                        namespace: &namespace,
                        project_id,
                    })
                    .await;
                result
                    .map(|outcome| (namespace, outcome))
                    .map_err(|e| e.to_string())
            });

            match handle.await {
                Ok(Ok((namespace, outcome))) => {
                    if let Err(e) = db_addons::mark_provisioned(
                        &inner_pool,
                        addon_id,
                        &namespace,
                        &outcome.k8s_resource_name,
                        &outcome.connection_secret,
                    )
                    .await
                    {
                        error!(%addon_id, error = %e, "failed to record provisioning outcome");
                    }
                    metrics
                        .addon_provision_total
                        .with_label_values(&[&addon_type.to_string(), "success"])
                        .inc();
                    info!(%addon_id, message = %outcome.message, "addon provisioned");
                }
                Ok(Err(err_string)) => {
                    warn!(%addon_id, error = %err_string, "addon provisioning failed");
                    if let Err(e2) = db_addons::mark_failed(&inner_pool, addon_id, &err_string).await
                    {
                        error!(%addon_id, error = %e2, "failed to record provisioning failure");
                    }
                    metrics
                        .addon_provision_total
                        .with_label_values(&[&addon_type.to_string(), "failed"])
                        .inc();
                }
                Err(join_err) => {
                    error!(%addon_id, error = %join_err, "addon provisioning task panicked");
                    let _ = db_addons::mark_failed(
                        &inner_pool,
                        addon_id,
                        "provisioning task panicked",
                    )
                    .await;
                    metrics
                        .addon_provision_total
                        .with_label_values(&[&addon_type.to_string(), "panicked"])
                        .inc();
                }
            }
        });
    }

    pub async fn get_addon(&self, id: Uuid) -> CoreResult<DatabaseAddon> {
        db_addons::find_by_id(&self.state.db_pool, id)
            .await
            .map_err(|e| CoreError::from_db_error("loading addon", e))?
            .ok_or_else(|| CoreError::not_found(format!("addon {id}")))
    }

    pub async fn get_addon_with_bindings(
        &self,
        id: Uuid,
    ) -> CoreResult<(DatabaseAddon, Vec<DatabaseAddonBinding>)> {
        let addon = self.get_addon(id).await?;
        let bindings = addon_bindings::list_for_addon(&self.state.db_pool, id)
            .await
            .map_err(|e| CoreError::from_db_error("loading addon bindings", e))?;
        Ok((addon, bindings))
    }

    pub async fn list_addons(&self, project_id: Uuid) -> CoreResult<Vec<DatabaseAddon>> {
        db_addons::list_for_project(&self.state.db_pool, project_id)
            .await
            .map_err(|e| CoreError::from_db_error("listing addons", e))
    }

    /// Pull-driven reconciliation: no-op on terminal addons, otherwise asks
    /// the provisioner for fresh status and copies it onto the row.
    pub async fn refresh_status(&self, id: Uuid) -> CoreResult<DatabaseAddon> {
        let addon = self.get_addon(id).await?;
        if addon.status.is_terminal() {
            return Ok(addon);
        }

        let provisioner = self.registry.get(addon.addon_type);
        let info = provisioner
            .get_status(&addon)
            .await
            .map_err(|e| CoreError::transient(format!("status refresh failed: {e}")))?;

        let became_ready = info.ready && addon.status != AddonStatus::Ready;

        db_addons::apply_status_refresh(
            &self.state.db_pool,
            id,
            info.status,
            info.status_message.as_deref(),
            info.host.as_deref(),
            info.port,
            info.database_name.as_deref(),
            info.username.as_deref(),
            became_ready,
        )
        .await
        .map_err(|e| CoreError::from_db_error("applying status refresh", e))?;

        self.get_addon(id).await
    }

    /// `DeleteAddon`: mark deleting, deprovision (idempotent against missing
    /// k8s resources), soft-delete on success, surface failure otherwise.
    pub async fn delete_addon(&self, id: Uuid) -> CoreResult<()> {
        let addon = self.get_addon(id).await?;

        db_addons::mark_deleting(&self.state.db_pool, id)
            .await
            .map_err(|e| CoreError::from_db_error("marking addon deleting", e))?;

        let provisioner = self.registry.get(addon.addon_type);
        match provisioner.deprovision(&addon).await {
            Ok(()) => {
                db_addons::mark_deleted(&self.state.db_pool, id)
                    .await
                    .map_err(|e| CoreError::from_db_error("marking addon deleted", e))?;
                Ok(())
            }
            Err(e) => {
                db_addons::mark_failed(&self.state.db_pool, id, &e.to_string())
                    .await
                    .map_err(|e2| CoreError::from_db_error("recording deprovision failure", e2))?;
                Err(CoreError::transient(format!("deprovision failed: {e}")))
            }
        }
    }

    pub async fn get_credentials(&self, id: Uuid) -> CoreResult<AddonCredentials> {
        let addon = self.get_addon(id).await?;
        if addon.status != AddonStatus::Ready {
            return Err(CoreError::validation(format!(
                "addon {id} is not ready (status={})",
                addon.status
            )));
        }
        let provisioner = self.registry.get(addon.addon_type);
        provisioner
            .get_credentials(&addon)
            .await
            .map_err(|e| CoreError::transient(format!("failed to read credentials: {e}")))
    }

    pub async fn create_binding(
        &self,
        addon_id: Uuid,
        service_id: Uuid,
        env_var_name: &str,
    ) -> CoreResult<DatabaseAddonBinding> {
        self.get_addon(addon_id).await?;
        addon_bindings::create(&self.state.db_pool, addon_id, service_id, env_var_name)
            .await
            .map_err(|e| CoreError::from_db_error("creating addon binding", e))
    }

    pub async fn delete_binding(&self, binding_id: Uuid) -> CoreResult<()> {
        addon_bindings::revoke(&self.state.db_pool, binding_id)
            .await
            .map_err(|e| CoreError::from_db_error("revoking addon binding", e))
    }

    pub async fn get_bindings_for_service(
        &self,
        service_id: Uuid,
    ) -> CoreResult<Vec<DatabaseAddonBinding>> {
        let rows = addon_bindings::list_active_for_service(&self.state.db_pool, service_id)
            .await
            .map_err(|e| CoreError::from_db_error("listing service bindings", e))?;
        Ok(rows.into_iter().map(|(b, _)| b).collect())
    }

    /// `GetEnvVarsForService`: one env var per active binding whose addon is
    /// `ready`. Bindings to a non-ready or unknown addon are silently skipped
    /// (logged at warn), matching the spec's binding-injection semantics.
    pub async fn get_env_vars_for_service(
        &self,
        service_id: Uuid,
    ) -> CoreResult<HashMap<String, String>> {
        let rows = addon_bindings::list_active_for_service(&self.state.db_pool, service_id)
            .await
            .map_err(|e| CoreError::from_db_error("listing service bindings", e))?;

        let mut env = HashMap::new();
        for (binding, addon) in rows {
            if addon.status != AddonStatus::Ready {
                warn!(
                    addon_id = %addon.id,
                    env_var = %binding.env_var_name,
                    status = %addon.status,
                    "skipping binding for non-ready addon"
                );
                continue;
            }
            let provisioner = self.registry.get(addon.addon_type);
            match provisioner.get_connection_uri(&addon).await {
                Ok(uri) => {
                    env.insert(binding.env_var_name.clone(), uri);
                }
                Err(e) => {
                    warn!(addon_id = %addon.id, error = %e, "failed to resolve connection uri for binding");
                }
            }
        }
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_uses_first_8_hex_chars() {
        let id = Uuid::parse_str("abcdef12-3456-7890-abcd-ef1234567890").unwrap();
        assert_eq!(namespace_for_project(id), "project-abcdef12");
    }

    #[test]
    fn postgres_defaults_fill_missing_fields_only() {
        let config = AddonConfig {
            storage_gb: Some(20),
            ..Default::default()
        };
        let filled = apply_defaults(AddonType::Postgres, config);
        assert_eq!(filled.storage_gb, Some(20));
        assert_eq!(filled.version.as_deref(), Some("16"));
        assert_eq!(filled.replicas, Some(1));
    }

    #[test]
    fn redis_defaults_do_not_set_storage() {
        let filled = apply_defaults(AddonType::Redis, AddonConfig::default());
        assert_eq!(filled.storage_gb, None);
        assert_eq!(filled.memory.as_deref(), Some("256Mi"));
    }
}
