//! Postgres addon provisioner: backed by the CloudNativePG `Cluster` CRD.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::addons::{
    AddonCredentials, AddonStatusInfo, ProvisionOutcome, ProvisionRequest, Provisioner,
};
use crate::db::models::{AddonStatus, DatabaseAddon};
use crate::k8s::{cnpg, managed_labels, K8sClient};

const DEFAULT_PORT: i32 = 5432;
const HA_INSTANCE_THRESHOLD: i32 = 3;

pub struct PostgresProvisioner {
    k8s: Arc<K8sClient>,
}

impl PostgresProvisioner {
    pub fn new(k8s: Arc<K8sClient>) -> Self {
        Self { k8s }
    }

    fn cluster_name(addon: &DatabaseAddon) -> String {
        format!("pg-{}", addon.name)
    }
}

#[async_trait]
impl Provisioner for PostgresProvisioner {
    async fn provision(&self, req: ProvisionRequest<'_>) -> Result<ProvisionOutcome> {
        self.k8s.ensure_namespace(req.namespace).await?;

        let config = req.addon.parsed_config();
        let mut instances = config.replicas.unwrap_or(1);
        if config.ha_enabled && instances < HA_INSTANCE_THRESHOLD {
            instances = HA_INSTANCE_THRESHOLD;
        }
        let storage_size = format!("{}Gi", config.storage_gb.unwrap_or(10));
        let version = config.version.unwrap_or_else(|| "16".to_string());
        let name = Self::cluster_name(req.addon);
        let labels = managed_labels(req.addon.id, req.project_id, "postgres");

        cnpg::create_cluster(
            &self.k8s.raw(),
            req.namespace,
            &name,
            &labels,
            instances,
            &storage_size,
            &version,
        )
        .await
        .context("failed to create cnpg cluster")?;

        Ok(ProvisionOutcome {
            k8s_resource_name: name.clone(),
            connection_secret: cnpg::app_secret_name(&name),
            message: format!("cnpg cluster {name} created with {instances} instance(s)"),
        })
    }

    async fn deprovision(&self, addon: &DatabaseAddon) -> Result<()> {
        let namespace = addon
            .k8s_namespace
            .as_deref()
            .unwrap_or(&crate::addons::namespace_for_project(addon.project_id));
        let name = addon
            .k8s_resource_name
            .clone()
            .unwrap_or_else(|| Self::cluster_name(addon));
        cnpg::delete_cluster(&self.k8s.raw(), namespace, &name)
            .await
            .context("failed to delete cnpg cluster")
    }

    async fn get_status(&self, addon: &DatabaseAddon) -> Result<AddonStatusInfo> {
        let namespace = addon
            .k8s_namespace
            .as_deref()
            .unwrap_or(&crate::addons::namespace_for_project(addon.project_id));
        let name = addon
            .k8s_resource_name
            .clone()
            .unwrap_or_else(|| Self::cluster_name(addon));

        let cluster = cnpg::get_cluster(&self.k8s.raw(), namespace, &name)
            .await
            .context("failed to fetch cnpg cluster")?;

        let Some(cluster) = cluster else {
            return Ok(AddonStatusInfo {
                status: AddonStatus::Provisioning,
                status_message: Some("cluster not found yet".to_string()),
                host: None,
                port: None,
                database_name: None,
                username: None,
                ready: false,
            });
        };

        let cnpg_status = cnpg::parse_status(&cluster);
        let status = match cnpg_status.phase {
            cnpg::CnpgPhase::Healthy if cnpg_status.is_ready() => AddonStatus::Ready,
            cnpg::CnpgPhase::Failed => AddonStatus::Failed,
            _ => AddonStatus::Provisioning,
        };

        let host = cnpg_status
            .write_service
            .as_ref()
            .map(|svc| format!("{svc}.{namespace}.svc.cluster.local"));

        Ok(AddonStatusInfo {
            ready: status == AddonStatus::Ready,
            status_message: Some(phase_message(&cnpg_status)),
            host,
            port: Some(DEFAULT_PORT),
            database_name: Some("app".to_string()),
            username: Some("app".to_string()),
            status,
        })
    }

    async fn get_credentials(&self, addon: &DatabaseAddon) -> Result<AddonCredentials> {
        let namespace = addon
            .k8s_namespace
            .as_deref()
            .context("addon has no namespace recorded yet")?;
        let secret_name = addon
            .connection_secret
            .clone()
            .unwrap_or_else(|| cnpg::app_secret_name(&Self::cluster_name(addon)));

        let secret = self
            .k8s
            .get_secret(namespace, &secret_name)
            .await?
            .with_context(|| format!("connection secret {secret_name} not found"))?;

        let data = secret.data.unwrap_or_default();
        let get = |key: &str| -> Option<String> {
            data.get(key)
                .map(|b| String::from_utf8_lossy(&b.0).to_string())
        };

        let host = get("host")
            .or_else(|| addon.host.clone())
            .context("secret missing host")?;
        let port: i32 = get("port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let db_name = get("dbname").unwrap_or_else(|| "app".to_string());
        let username = get("username").unwrap_or_else(|| "app".to_string());
        let password = get("password").context("secret missing password")?;
        let uri = get("uri").unwrap_or_else(|| {
            format!("postgresql://{username}:{password}@{host}:{port}/{db_name}?sslmode=require")
        });

        Ok(AddonCredentials {
            host,
            port,
            database_name: db_name,
            username,
            password,
            connection_uri: uri,
        })
    }
}

fn phase_message(status: &cnpg::CnpgStatus) -> String {
    match status.phase {
        cnpg::CnpgPhase::Healthy => "Cluster in healthy state".to_string(),
        cnpg::CnpgPhase::SettingUp => "Setting up primary".to_string(),
        cnpg::CnpgPhase::CreatingReplica => "Creating replica".to_string(),
        cnpg::CnpgPhase::Failed => "Failed".to_string(),
        cnpg::CnpgPhase::Unknown => format!(
            "waiting ({} / {} ready)",
            status.ready_instances, status.instances
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{AddonType, DatabaseAddon};
    use uuid::Uuid;

    fn sample_addon() -> DatabaseAddon {
        DatabaseAddon {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            environment_id: None,
            addon_type: AddonType::Postgres,
            name: "orders".to_string(),
            status: AddonStatus::Provisioning,
            status_message: None,
            config: serde_json::json!({}),
            k8s_namespace: None,
            k8s_resource_name: None,
            connection_secret: None,
            host: None,
            port: None,
            database_name: None,
            username: None,
            provisioned_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn cluster_name_is_pg_prefixed() {
        let addon = sample_addon();
        assert_eq!(PostgresProvisioner::cluster_name(&addon), "pg-orders");
    }
}
