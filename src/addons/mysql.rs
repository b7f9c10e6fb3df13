//! MySQL addon provisioner: a StatefulSet + headless Service + Opaque Secret,
//! since there's no equivalent of CloudNativePG for MySQL in this cluster.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Secret,
    Service, ServicePort, ServiceSpec, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::ByteString;
use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::addons::{
    AddonCredentials, AddonStatusInfo, ProvisionOutcome, ProvisionRequest, Provisioner,
};
use crate::db::models::{AddonStatus, DatabaseAddon};
use crate::k8s::{managed_labels, K8sClient};

const DEFAULT_PORT: i32 = 3306;

pub struct MysqlProvisioner {
    k8s: Arc<K8sClient>,
}

impl MysqlProvisioner {
    pub fn new(k8s: Arc<K8sClient>) -> Self {
        Self { k8s }
    }

    fn resource_name(addon: &DatabaseAddon) -> String {
        format!("mysql-{}", addon.name)
    }

    fn secret_name(addon: &DatabaseAddon) -> String {
        format!("{}-credentials", Self::resource_name(addon))
    }

    /// `base64url`, truncated to 24 chars, CSPRNG-backed.
    fn generate_password() -> String {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        let encoded = URL_SAFE_NO_PAD.encode(bytes);
        encoded[..24.min(encoded.len())].to_string()
    }
}

#[async_trait]
impl Provisioner for MysqlProvisioner {
    async fn provision(&self, req: ProvisionRequest<'_>) -> Result<ProvisionOutcome> {
        self.k8s.ensure_namespace(req.namespace).await?;

        let config = req.addon.parsed_config();
        let name = Self::resource_name(req.addon);
        let secret_name = Self::secret_name(req.addon);
        let labels = managed_labels(req.addon.id, req.project_id, "mysql");
        let storage = format!("{}Gi", config.storage_gb.unwrap_or(10));

        let root_password = Self::generate_password();
        let app_password = Self::generate_password();
        let database_name = "app".to_string();
        let username = "app".to_string();

        let mut secret_data: BTreeMap<String, ByteString> = BTreeMap::new();
        secret_data.insert("root-password".into(), ByteString(root_password.into_bytes()));
        secret_data.insert("username".into(), ByteString(username.clone().into_bytes()));
        secret_data.insert("password".into(), ByteString(app_password.into_bytes()));
        secret_data.insert(
            "database".into(),
            ByteString(database_name.clone().into_bytes()),
        );
        secret_data.insert(
            "host".into(),
            ByteString(format!("{name}.{}.svc.cluster.local", req.namespace).into_bytes()),
        );
        secret_data.insert(
            "port".into(),
            ByteString(DEFAULT_PORT.to_string().into_bytes()),
        );

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                namespace: Some(req.namespace.to_string()),
                labels: Some(labels.clone().into_iter().collect()),
                ..Default::default()
            },
            data: Some(secret_data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        self.k8s.apply_secret(req.namespace, &secret).await?;

        let svc = Service {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(req.namespace.to_string()),
                labels: Some(labels.clone().into_iter().collect()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                selector: Some(labels.clone().into_iter().collect()),
                ports: Some(vec![ServicePort {
                    port: DEFAULT_PORT,
                    name: Some("mysql".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.k8s.apply_service(req.namespace, &svc).await?;

        let probe = Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "mysqladmin".to_string(),
                    "ping".to_string(),
                    "-h".to_string(),
                    "localhost".to_string(),
                ]),
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(10),
            ..Default::default()
        };

        let sts = StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(req.namespace.to_string()),
                labels: Some(labels.clone().into_iter().collect()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                service_name: name.clone(),
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone().into_iter().collect()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels.clone().into_iter().collect()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "mysql".to_string(),
                            image: Some(format!(
                                "mysql:{}",
                                config.version.as_deref().unwrap_or("8.0")
                            )),
                            ports: Some(vec![ContainerPort {
                                container_port: DEFAULT_PORT,
                                name: Some("mysql".to_string()),
                                ..Default::default()
                            }]),
                            env: Some(vec![
                                env_from_secret("MYSQL_ROOT_PASSWORD", &secret_name, "root-password"),
                                env_from_secret("MYSQL_DATABASE", &secret_name, "database"),
                                env_from_secret("MYSQL_USER", &secret_name, "username"),
                                env_from_secret("MYSQL_PASSWORD", &secret_name, "password"),
                            ]),
                            volume_mounts: Some(vec![VolumeMount {
                                name: "data".to_string(),
                                mount_path: "/var/lib/mysql".to_string(),
                                ..Default::default()
                            }]),
                            resources: Some(ResourceRequirements {
                                requests: Some(BTreeMap::from([
                                    (
                                        "cpu".to_string(),
                                        Quantity(config.cpu.clone().unwrap_or_else(|| "500m".into())),
                                    ),
                                    (
                                        "memory".to_string(),
                                        Quantity(
                                            config.memory.clone().unwrap_or_else(|| "512Mi".into()),
                                        ),
                                    ),
                                ])),
                                limits: Some(BTreeMap::from([
                                    (
                                        "cpu".to_string(),
                                        Quantity(config.cpu.clone().unwrap_or_else(|| "500m".into())),
                                    ),
                                    (
                                        "memory".to_string(),
                                        Quantity(
                                            config.memory.clone().unwrap_or_else(|| "512Mi".into()),
                                        ),
                                    ),
                                ])),
                                ..Default::default()
                            }),
                            readiness_probe: Some(probe.clone()),
                            liveness_probe: Some(probe),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(vec![PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some("data".to_string()),
                        ..Default::default()
                    },
                    spec: Some(PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                        resources: Some(ResourceRequirements {
                            requests: Some(BTreeMap::from([(
                                "storage".to_string(),
                                Quantity(storage),
                            )])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.k8s.apply_statefulset(req.namespace, &sts).await?;

        Ok(ProvisionOutcome {
            k8s_resource_name: name.clone(),
            connection_secret: secret_name,
            message: format!("mysql statefulset {name} created"),
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
            .unwrap_or_else(|| Self::resource_name(addon));
        let secret_name = addon
            .connection_secret
            .clone()
            .unwrap_or_else(|| Self::secret_name(addon));

        self.k8s.delete_statefulset(namespace, &name).await?;
        self.k8s.delete_service(namespace, &name).await?;
        self.k8s.delete_secret(namespace, &secret_name).await?;
        // StatefulSets never garbage-collect their PVCs.
        self.k8s
            .delete_pvc(namespace, &format!("data-{name}-0"))
            .await?;
        Ok(())
    }

    async fn get_status(&self, addon: &DatabaseAddon) -> Result<AddonStatusInfo> {
        let namespace = addon
            .k8s_namespace
            .as_deref()
            .unwrap_or(&crate::addons::namespace_for_project(addon.project_id));
        let name = addon
            .k8s_resource_name
            .clone()
            .unwrap_or_else(|| Self::resource_name(addon));

        let info = self
            .k8s
            .get_statefulset_status_info(namespace, &name)
            .await?;
        let ready = info.is_ready();

        Ok(AddonStatusInfo {
            status: if ready {
                AddonStatus::Ready
            } else {
                AddonStatus::Provisioning
            },
            status_message: Some(if ready {
                "mysql statefulset ready".to_string()
            } else {
                "waiting for mysql statefulset".to_string()
            }),
            host: Some(format!("{name}.{namespace}.svc.cluster.local")),
            port: Some(DEFAULT_PORT),
            database_name: Some("app".to_string()),
            username: Some("app".to_string()),
            ready,
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
            .unwrap_or_else(|| Self::secret_name(addon));

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

        let host = get("host").context("secret missing host")?;
        let port: i32 = get("port").and_then(|p| p.parse().ok()).unwrap_or(DEFAULT_PORT);
        let database_name = get("database").unwrap_or_else(|| "app".to_string());
        let username = get("username").unwrap_or_else(|| "app".to_string());
        let password = get("password").context("secret missing password")?;
        let uri = format!("mysql://{username}:{password}@{host}:{port}/{database_name}");

        Ok(AddonCredentials {
            host,
            port,
            database_name,
            username,
            password,
            connection_uri: uri,
        })
    }
}

fn env_from_secret(name: &str, secret_name: &str, key: &str) -> EnvVar {
    use k8s_openapi::api::core::v1::{EnvVarSource, SecretKeySelector};
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_password_is_24_chars() {
        let pw = MysqlProvisioner::generate_password();
        assert_eq!(pw.len(), 24);
    }

    #[test]
    fn generated_passwords_are_random() {
        assert_ne!(
            MysqlProvisioner::generate_password(),
            MysqlProvisioner::generate_password()
        );
    }
}
