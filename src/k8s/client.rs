use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;

/// Field manager used on every server-side apply the control plane performs,
/// so reconciliations from different addon types don't fight over ownership.
const FIELD_MANAGER: &str = "enclii-controller";

/// Annotation patched onto a Deployment's pod template to force a rolling
/// update without touching the image or env: the same mechanism
/// `kubectl rollout restart` uses.
const ANNOTATION_RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

/// Annotation on the Deployment itself (not the pod template) holding a
/// JSON snapshot of the previous pod template, written by `rolling_restart`
/// just before the patch and consumed by `rollback_deployment`. Platforms
/// exposing a native rollback subresource wouldn't need this; plain
/// `apps/v1` Deployments don't have one anymore, so the previous template is
/// tracked here instead.
const ANNOTATION_PREVIOUS_TEMPLATE: &str = "enclii.dev/previous-pod-template";

#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentStatusInfo {
    pub replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    pub unavailable_replicas: i32,
}

impl DeploymentStatusInfo {
    /// Rollout completion per the 5-minute poll loop's success condition.
    pub fn rollout_complete(&self, desired_replicas: i32) -> bool {
        self.updated_replicas == desired_replicas
            && self.available_replicas == desired_replicas
            && self.unavailable_replicas == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatefulSetStatusInfo {
    pub desired_replicas: i32,
    pub ready_replicas: i32,
}

impl StatefulSetStatusInfo {
    pub fn is_ready(&self) -> bool {
        self.ready_replicas == self.desired_replicas && self.desired_replicas > 0
    }
}

/// Thin layer over a typed `kube::Client` for the core workload kinds
/// (`Deployment`, `StatefulSet`, `Service`, `Secret`, `Namespace`). CRD access
/// (CloudNativePG `Cluster`) lives in `k8s::cnpg` via the dynamic client.
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_kubeconfig(kubeconfig_path: Option<&str>) -> Result<Self> {
        let config = if let Some(_path) = kubeconfig_path {
            kube::Config::from_kubeconfig(&kube::config::KubeConfigOptions::default())
                .await
                .context("failed to load kubeconfig")?
        } else {
            kube::Config::infer()
                .await
                .context("failed to infer kubernetes config (in-cluster or ~/.kube/config)")?
        };
        let client = Client::try_from(config).context("failed to build kube client")?;
        Ok(Self::new(client))
    }

    pub fn raw(&self) -> Client {
        self.client.clone()
    }

    /// Idempotent namespace create: succeeds if the namespace already exists.
    pub async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                match api.create(&PostParams::default(), &ns).await {
                    Ok(_) => Ok(()),
                    // Lost a create race against another caller; the namespace
                    // exists now, which is exactly what we wanted.
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
                    Err(e) => Err(e).context(format!("failed to create namespace {name}")),
                }
            }
            Err(e) => Err(e).context(format!("failed to check namespace {name}")),
        }
    }

    /// Patch the pod template's `restartedAt` annotation to trigger a rolling
    /// update without changing the image or config. Snapshots the current pod
    /// template onto the Deployment first so `rollback_deployment` has
    /// something to restore.
    pub async fn rolling_restart(&self, namespace: &str, deployment: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let current = api
            .get(deployment)
            .await
            .context(format!("failed to fetch deployment {namespace}/{deployment}"))?;

        let template = current
            .spec
            .as_ref()
            .and_then(|s| s.template.clone())
            .unwrap_or_default();
        let template_json =
            serde_json::to_string(&template).context("failed to serialize pod template")?;

        let now = chrono::Utc::now().to_rfc3339();
        let patch = json!({
            "metadata": {
                "annotations": {
                    ANNOTATION_PREVIOUS_TEMPLATE: template_json,
                }
            },
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            ANNOTATION_RESTARTED_AT: now,
                        }
                    }
                }
            }
        });

        api.patch(
            deployment,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .context(format!("failed to patch deployment {namespace}/{deployment}"))?;

        Ok(())
    }

    /// Restore the pod template snapshotted by the most recent `rolling_restart`.
    /// For platforms that never lost native rollback support this would call
    /// the rollback subresource directly; here the previous template is all
    /// we have, so a missing snapshot is a hard error rather than a silent no-op.
    pub async fn rollback_deployment(&self, namespace: &str, deployment: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let current = api
            .get(deployment)
            .await
            .context(format!("failed to fetch deployment {namespace}/{deployment}"))?;

        let snapshot = current
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_PREVIOUS_TEMPLATE))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no previous pod template recorded for {namespace}/{deployment}; cannot roll back"
                )
            })?;

        let previous_template: k8s_openapi::api::core::v1::PodTemplateSpec =
            serde_json::from_str(snapshot).context("failed to parse previous pod template")?;

        let patch = json!({
            "spec": {
                "template": previous_template,
            }
        });

        api.patch(
            deployment,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Merge(&patch),
        )
        .await
        .context(format!(
            "failed to roll back deployment {namespace}/{deployment}"
        ))?;

        Ok(())
    }

    pub async fn get_deployment_status_info(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<DeploymentStatusInfo> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let current = api
            .get(deployment)
            .await
            .context(format!("failed to fetch deployment {namespace}/{deployment}"))?;

        let status = current.status.unwrap_or_default();
        Ok(DeploymentStatusInfo {
            replicas: status.replicas.unwrap_or(0),
            updated_replicas: status.updated_replicas.unwrap_or(0),
            available_replicas: status.available_replicas.unwrap_or(0),
            unavailable_replicas: status.unavailable_replicas.unwrap_or(0),
        })
    }

    pub fn statefulsets(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// StatefulSet-shaped analogue of `get_deployment_status_info`, used by
    /// the MySQL and Redis addon provisioners (both StatefulSet-backed).
    pub async fn get_statefulset_status_info(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSetStatusInfo> {
        let sts = self
            .statefulsets(namespace)
            .get(name)
            .await
            .context(format!("failed to fetch statefulset {namespace}/{name}"))?;
        let spec_replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = sts.status.unwrap_or_default();
        Ok(StatefulSetStatusInfo {
            desired_replicas: spec_replicas,
            ready_replicas: status.ready_replicas.unwrap_or(0),
        })
    }

    pub fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Create-or-replace a Secret, treating `NotFound` on the initial read as
    /// the expected "doesn't exist yet" case rather than an error.
    pub async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let api = self.secrets(namespace);
        let name = secret
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("secret metadata.name required"))?;
        match api.get(&name).await {
            Ok(_) => {
                api.replace(&name, &PostParams::default(), secret)
                    .await
                    .context(format!("failed to replace secret {namespace}/{name}"))?;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                api.create(&PostParams::default(), secret)
                    .await
                    .context(format!("failed to create secret {namespace}/{name}"))?;
            }
            Err(e) => return Err(e).context(format!("failed to check secret {namespace}/{name}")),
        }
        Ok(())
    }

    pub async fn apply_service(&self, namespace: &str, svc: &Service) -> Result<()> {
        let api = self.services(namespace);
        let name = svc
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("service metadata.name required"))?;
        let patch = Patch::Apply(svc);
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
            .await
            .context(format!("failed to apply service {namespace}/{name}"))?;
        Ok(())
    }

    pub async fn apply_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<()> {
        let api = self.statefulsets(namespace);
        let name = sts
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("statefulset metadata.name required"))?;
        let patch = Patch::Apply(sts);
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
            .await
            .context(format!("failed to apply statefulset {namespace}/{name}"))?;
        Ok(())
    }

    /// Returns `Ok(None)` rather than an error when the secret is missing,
    /// matching "deprovision is idempotent: missing resources are not errors".
    pub async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        match self.secrets(namespace).get(name).await {
            Ok(s) => Ok(Some(s)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e).context(format!("failed to fetch secret {namespace}/{name}")),
        }
    }

    pub async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .statefulsets(namespace)
            .delete(name, &Default::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e).context(format!("failed to delete statefulset {namespace}/{name}")),
        }
    }

    pub async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        match self.services(namespace).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e).context(format!("failed to delete service {namespace}/{name}")),
        }
    }

    pub async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        match self.secrets(namespace).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e).context(format!("failed to delete secret {namespace}/{name}")),
        }
    }

    /// StatefulSets don't garbage-collect their PVCs; addon deprovisioning
    /// does it explicitly. Missing PVC is not an error.
    pub async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        use k8s_openapi::api::core::v1::PersistentVolumeClaim;
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e).context(format!("failed to delete pvc {namespace}/{name}")),
        }
    }
}
