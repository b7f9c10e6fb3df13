//! Dynamic client for the CloudNativePG `postgresql.cnpg.io/v1 Cluster` CRD.
//!
//! The Postgres addon provisioner talks to this CRD instead of managing
//! StatefulSets directly: CNPG owns the primary/replica topology, failover,
//! and the `<cluster>-app` credentials secret. We don't run live discovery
//! against the apiserver for this one GVK — it's a well-known, stable CRD,
//! so the `ApiResource` is built from a hardcoded GVK/plural instead of
//! `kube::discovery::pinned_kind`.

use anyhow::{Context, Result};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;

pub const GROUP: &str = "postgresql.cnpg.io";
pub const VERSION: &str = "v1";
pub const KIND: &str = "Cluster";
pub const PLURAL: &str = "clusters";

const FIELD_MANAGER: &str = "enclii-controller";

fn api_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(GROUP, VERSION, KIND);
    ApiResource::from_gvk_with_plural(&gvk, PLURAL)
}

fn api(client: Client, namespace: &str) -> Api<DynamicObject> {
    Api::namespaced_with(client, namespace, &api_resource())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CnpgPhase {
    SettingUp,
    CreatingReplica,
    Healthy,
    Failed,
    Unknown,
}

impl CnpgPhase {
    fn from_str(s: &str) -> Self {
        match s {
            "Cluster in healthy state" => CnpgPhase::Healthy,
            "Setting up primary" => CnpgPhase::SettingUp,
            "Creating replica" => CnpgPhase::CreatingReplica,
            "Failed" => CnpgPhase::Failed,
            _ => CnpgPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CnpgStatus {
    pub phase: CnpgPhase,
    pub ready_instances: i64,
    pub instances: i64,
    pub write_service: Option<String>,
}

impl CnpgStatus {
    pub fn is_ready(&self) -> bool {
        self.phase == CnpgPhase::Healthy && self.ready_instances >= self.instances && self.instances > 0
    }
}

/// Create a CNPG `Cluster` for a Postgres addon. `instances` is 1 for a
/// standalone addon and 3 once the binding count crosses the HA threshold.
pub async fn create_cluster(
    client: &Client,
    namespace: &str,
    name: &str,
    labels: &std::collections::BTreeMap<String, String>,
    instances: i32,
    storage_size: &str,
    postgres_version_major: &str,
) -> Result<()> {
    let api = api(client.clone(), namespace);

    let manifest = json!({
        "apiVersion": format!("{GROUP}/{VERSION}"),
        "kind": KIND,
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": labels,
        },
        "spec": {
            "instances": instances,
            "imageName": format!("ghcr.io/cloudnative-pg/postgresql:{postgres_version_major}"),
            "storage": {
                "size": storage_size,
            },
            "bootstrap": {
                "initdb": {
                    "database": "app",
                    "owner": "app",
                }
            },
        }
    });
    let obj: DynamicObject =
        serde_json::from_value(manifest).context("failed to build cluster manifest")?;

    match api.create(&PostParams::default(), &obj).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e).context(format!("failed to create cnpg cluster {namespace}/{name}")),
    }
}

pub async fn get_cluster(client: &Client, namespace: &str, name: &str) -> Result<Option<DynamicObject>> {
    let api = api(client.clone(), namespace);
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(e).context(format!("failed to fetch cnpg cluster {namespace}/{name}")),
    }
}

pub async fn delete_cluster(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api = api(client.clone(), namespace);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e).context(format!("failed to delete cnpg cluster {namespace}/{name}")),
    }
}

/// Scale an existing cluster to `instances`, e.g. the 1 -> 3 HA bump once a
/// second binding is attached.
pub async fn scale_cluster(client: &Client, namespace: &str, name: &str, instances: i32) -> Result<()> {
    let api = api(client.clone(), namespace);
    let patch = json!({ "spec": { "instances": instances } });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Merge(&patch),
    )
    .await
    .context(format!("failed to scale cnpg cluster {namespace}/{name}"))?;
    Ok(())
}

pub fn parse_status(obj: &DynamicObject) -> CnpgStatus {
    let status = obj.data.get("status");

    let phase = status
        .and_then(|s| s.get("phase"))
        .and_then(|p| p.as_str())
        .map(CnpgPhase::from_str)
        .unwrap_or(CnpgPhase::Unknown);

    let ready_instances = status
        .and_then(|s| s.get("readyInstances"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let instances = status
        .and_then(|s| s.get("instances"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let write_service = status
        .and_then(|s| s.get("writeService"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    CnpgStatus {
        phase,
        ready_instances,
        instances,
        write_service,
    }
}

/// The name CNPG gives the auto-generated `app` user credentials secret for
/// a cluster: `<cluster-name>-app`.
pub fn app_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-app")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parsing_matches_known_strings() {
        assert_eq!(CnpgPhase::from_str("Cluster in healthy state"), CnpgPhase::Healthy);
        assert_eq!(CnpgPhase::from_str("Setting up primary"), CnpgPhase::SettingUp);
        assert_eq!(CnpgPhase::from_str("Creating replica"), CnpgPhase::CreatingReplica);
        assert_eq!(CnpgPhase::from_str("Failed"), CnpgPhase::Failed);
        assert_eq!(CnpgPhase::from_str("something else"), CnpgPhase::Unknown);
    }

    #[test]
    fn app_secret_name_follows_cnpg_convention() {
        assert_eq!(app_secret_name("my-db"), "my-db-app");
    }

    #[test]
    fn status_not_ready_when_instances_zero() {
        let status = CnpgStatus {
            phase: CnpgPhase::Healthy,
            ready_instances: 0,
            instances: 0,
            write_service: None,
        };
        assert!(!status.is_ready());
    }
}
