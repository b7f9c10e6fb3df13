pub mod addons;
pub mod db;
pub mod encryption;
pub mod env_vars;
pub mod errors;
pub mod k8s;
pub mod metrics;
pub mod notifications;
pub mod provenance;
pub mod rotation;
pub mod settings;
pub mod state;
pub mod usage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use addons::{AddonService, ProvisionerRegistry};
use env_vars::EnvVarService;
use k8s::K8sClient;
use notifications::NotificationFanout;
use provenance::{codehost::GitHubCodeHostClient, ProvenanceGate};
use rotation::RotationController;
use settings::Settings;
use state::ControllerState;
use usage::UsageAggregator;

/// Every background subsystem and service handle the process needs, wired
/// from a single `Settings` + `ControllerState`. There is no HTTP layer here;
/// that is an externally-owned adapter that consumes these service handles.
pub struct Engines {
    pub state: Arc<ControllerState>,
    pub addons: Arc<AddonService>,
    pub env_vars: Arc<EnvVarService>,
    pub rotation: Arc<RotationController>,
    pub provenance: Arc<ProvenanceGate>,
    pub usage: Arc<UsageAggregator>,
    pub notifications: Arc<NotificationFanout>,
    usage_scheduler: tokio::task::JoinHandle<()>,
}

impl Engines {
    /// Connects to Postgres, runs migrations, builds the Kubernetes client,
    /// and starts every background controller. Mirrors the teacher's
    /// `run_server`/`run_*_controller_loop` split, minus the HTTP router:
    /// this crate only owns controllers and service methods.
    pub async fn start(settings: Settings) -> Result<Self> {
        // Install default CryptoProvider for rustls (required for kube-rs HTTPS connections).
        rustls::crypto::ring::default_provider()
            .install_default()
            .ok();

        let rotation_settings = settings.rotation.clone();
        let provenance_settings = settings.provenance.clone();

        let state = Arc::new(ControllerState::new(settings).await?);
        state.spawn_pool_monitor();

        info!("connecting to kubernetes cluster");
        let k8s = Arc::new(
            K8sClient::from_kubeconfig(state.settings.kubernetes.kubeconfig.as_deref())
                .await
                .context("failed to build kubernetes client")?,
        );

        let provisioner_registry = Arc::new(ProvisionerRegistry::new(k8s.clone()));
        let addons = Arc::new(AddonService::new(state.clone(), provisioner_registry));
        let env_vars = Arc::new(EnvVarService::new(state.clone()));

        info!(
            worker_count = rotation_settings.worker_count,
            "starting secret rotation controller"
        );
        let rotation = RotationController::start(state.clone(), k8s.clone(), rotation_settings);

        let codehost = Arc::new(GitHubCodeHostClient::new(
            provenance_settings.code_host_base_url.clone(),
            provenance_settings.code_host_token.clone(),
        ));
        let provenance = Arc::new(ProvenanceGate::new(state.clone(), codehost));

        let usage = Arc::new(UsageAggregator::new(state.clone()));
        info!("starting hourly usage aggregation scheduler");
        let usage_scheduler = Arc::clone(&usage).spawn_scheduler();

        let notifications = Arc::new(NotificationFanout::new(state.clone()));

        Ok(Self {
            state,
            addons,
            env_vars,
            rotation,
            provenance,
            usage,
            notifications,
            usage_scheduler,
        })
    }

    /// Signals every background controller to stop and waits for the usage
    /// scheduler to observe cancellation. Workers mid-rollout or mid-delivery
    /// finish their current unit of work; nothing is force-killed.
    pub async fn shutdown(self) {
        info!("shutting down control plane engines");
        self.rotation.shutdown();
        self.usage_scheduler.abort();
        let _ = self.usage_scheduler.await;
    }
}

#[cfg(test)]
mod lib_tests {
    // Wiring is exercised end-to-end only against a real Postgres + cluster,
    // which is outside the scope of a unit test; per-subsystem logic is
    // covered in each module's own `#[cfg(test)]` blocks.
}
