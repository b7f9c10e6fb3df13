//! Redis addon provisioner: a StatefulSet + headless Service, no auth by default.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, ResourceRequirements, Service, ServicePort, ServiceSpec, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::addons::{
    AddonCredentials, AddonStatusInfo, ProvisionOutcome, ProvisionRequest, Provisioner,
};
use crate::db::models::{AddonStatus, DatabaseAddon};
use crate::k8s::{managed_labels, K8sClient};

const DEFAULT_PORT: i32 = 6379;

pub struct RedisProvisioner {
    k8s: Arc<K8sClient>,
}

impl RedisProvisioner {
    pub fn new(k8s: Arc<K8sClient>) -> Self {
        Self { k8s }
    }

    fn resource_name(addon: &DatabaseAddon) -> String {
        format!("redis-{}", addon.name)
    }
}

#[async_trait]
impl Provisioner for RedisProvisioner {
    async fn provision(&self, req: ProvisionRequest<'_>) -> Result<ProvisionOutcome> {
        self.k8s.ensure_namespace(req.namespace).await?;

        let config = req.addon.parsed_config();
        let name = Self::resource_name(req.addon);
        let labels = managed_labels(req.addon.id, req.project_id, "redis");
        let replicas = config.replicas.unwrap_or(1);

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
                    name: Some("redis".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.k8s.apply_service(req.namespace, &svc).await?;

        let sts = StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(req.namespace.to_string()),
                labels: Some(labels.clone().into_iter().collect()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                service_name: name.clone(),
                replicas: Some(replicas),
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
                            name: "redis".to_string(),
                            image: Some("redis:7-alpine".to_string()),
                            ports: Some(vec![ContainerPort {
                                container_port: DEFAULT_PORT,
                                name: Some("redis".to_string()),
                                ..Default::default()
                            }]),
                            volume_mounts: Some(vec![VolumeMount {
                                name: "data".to_string(),
                                mount_path: "/data".to_string(),
                                ..Default::default()
                            }]),
                            resources: Some(ResourceRequirements {
                                requests: Some(BTreeMap::from([(
                                    "memory".to_string(),
                                    Quantity(
                                        config.memory.clone().unwrap_or_else(|| "256Mi".into()),
                                    ),
                                )])),
                                ..Default::default()
                            }),
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
                                Quantity("1Gi".to_string()),
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
            connection_secret: String::new(),
            message: format!("redis statefulset {name} created with {replicas} replica(s)"),
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

        self.k8s.delete_statefulset(namespace, &name).await?;
        self.k8s.delete_service(namespace, &name).await?;
        let config = addon.parsed_config();
        let replicas = config.replicas.unwrap_or(1);
        for i in 0..replicas {
            self.k8s
                .delete_pvc(namespace, &format!("data-{name}-{i}"))
                .await?;
        }
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
            status_message: Some(format!(
                "{}/{} replicas ready",
                info.ready_replicas, info.desired_replicas
            )),
            host: Some(format!("{name}.{namespace}.svc.cluster.local")),
            port: Some(DEFAULT_PORT),
            database_name: None,
            username: None,
            ready,
        })
    }

    async fn get_credentials(&self, addon: &DatabaseAddon) -> Result<AddonCredentials> {
        let namespace = addon
            .k8s_namespace
            .as_deref()
            .context("addon has no namespace recorded yet")?;
        let name = addon
            .k8s_resource_name
            .clone()
            .unwrap_or_else(|| Self::resource_name(addon));
        let host = addon
            .host
            .clone()
            .unwrap_or_else(|| format!("{name}.{namespace}.svc.cluster.local"));

        Ok(AddonCredentials {
            host: host.clone(),
            port: DEFAULT_PORT,
            database_name: String::new(),
            username: String::new(),
            password: String::new(),
            connection_uri: format!("redis://{host}:{DEFAULT_PORT}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_is_redis_prefixed() {
        let addon = crate::db::models::DatabaseAddon {
            id: uuid::Uuid::new_v4(),
            project_id: uuid::Uuid::new_v4(),
            environment_id: None,
            addon_type: crate::db::models::AddonType::Redis,
            name: "cache".to_string(),
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
        };
        assert_eq!(RedisProvisioner::resource_name(&addon), "redis-cache");
    }
}
