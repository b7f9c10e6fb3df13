//! Secret-rotation controller: a bounded-concurrency worker pool that
//! performs zero-downtime credential rollouts against running workloads,
//! with rollout monitoring and automatic rollback on timeout or error.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::{RotationAuditLog, RotationStatus, SecretChangeEvent};
use crate::db::{rotation as db_rotation, services as db_services};
use crate::errors::{CoreError, CoreResult};
use crate::k8s::K8sClient;
use crate::settings::RotationSettings;
use crate::state::ControllerState;

/// Namespace a rotation targets for a given project: `enclii-<project_id>`,
/// distinct from the addon engine's truncated `project-<hex8>` form — the
/// rotation controller acts on the service's own deployment, not an addon.
pub fn namespace_for_project(project_id: Uuid) -> String {
    format!("enclii-{project_id}")
}

/// A unit of audit-log work a worker hands off to the audit pipeline instead
/// of writing inline, so a slow DB write never blocks the rollout poll loop.
enum AuditTask {
    Finalize {
        id: Uuid,
        status: RotationStatus,
        pods_restarted: i32,
        error: Option<String>,
        completed_at: chrono::DateTime<chrono::Utc>,
        duration_ms: i64,
    },
}

/// Bounded primary channel with a fallback at half capacity, per the spec's
/// "audit-log pipeline" shedding policy: overflow of both increments a
/// dropped counter and logs at most once per minute.
struct AuditPipeline {
    primary: mpsc::Sender<AuditTask>,
    fallback: mpsc::Sender<AuditTask>,
    dropped: AtomicU64,
    last_warn: Mutex<Option<Instant>>,
    metrics: Arc<crate::metrics::Metrics>,
}

impl AuditPipeline {
    fn new(
        pool: sqlx::PgPool,
        capacity: usize,
        metrics: Arc<crate::metrics::Metrics>,
    ) -> Arc<Self> {
        let (primary_tx, mut primary_rx) = mpsc::channel::<AuditTask>(capacity);
        let fallback_capacity = (capacity / 2).max(1);
        let (fallback_tx, mut fallback_rx) = mpsc::channel::<AuditTask>(fallback_capacity);

        let drain_pool = pool.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(task) = primary_rx.recv() => {
                        Self::apply(&drain_pool, task).await;
                    }
                    Some(task) = fallback_rx.recv() => {
                        Self::apply(&drain_pool, task).await;
                    }
                    else => break,
                }
            }
        });

        Arc::new(Self {
            primary: primary_tx,
            fallback: fallback_tx,
            dropped: AtomicU64::new(0),
            last_warn: Mutex::new(None),
            metrics,
        })
    }

    async fn apply(pool: &sqlx::PgPool, task: AuditTask) {
        let AuditTask::Finalize {
            id,
            status,
            pods_restarted,
            error,
            completed_at,
            duration_ms,
        } = task;
        if let Err(e) = db_rotation::finalize_audit_row(
            pool,
            id,
            status,
            pods_restarted,
            error.as_deref(),
            completed_at,
            duration_ms,
        )
        .await
        {
            error!(audit_id = %id, error = %e, "failed to finalize rotation audit row");
        }
    }

    async fn enqueue(&self, task: AuditTask) {
        let task = match self.primary.try_send(task) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(task)) => task,
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.fallback.try_send(task) {
            self.record_dropped("rotation-audit").await;
        }
    }

    async fn record_dropped(&self, pipeline: &str) {
        let count = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics
            .audit_dropped_total
            .with_label_values(&[pipeline])
            .inc();
        let mut last_warn = self.last_warn.lock().await;
        let should_warn = last_warn
            .map(|t| t.elapsed() >= Duration::from_secs(60))
            .unwrap_or(true);
        if should_warn {
            warn!(pipeline, dropped_total = count, "audit pipeline overflow, dropping record");
            *last_warn = Some(Instant::now());
        }
    }
}

pub struct RotationController {
    state: Arc<ControllerState>,
    k8s: Arc<K8sClient>,
    settings: RotationSettings,
    queue_tx: mpsc::Sender<SecretChangeEvent>,
    audit: Arc<AuditPipeline>,
    cancel: CancellationToken,
}

impl RotationController {
    /// Spawns `settings.worker_count` workers draining a shared bounded
    /// queue. The queue and audit pipeline are the only mutable state workers
    /// share; everything else about a single rotation is self-contained.
    pub fn start(
        state: Arc<ControllerState>,
        k8s: Arc<K8sClient>,
        settings: RotationSettings,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<SecretChangeEvent>(settings.queue_capacity);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let audit = AuditPipeline::new(
            state.db_pool.clone(),
            settings.audit_queue_capacity,
            state.metrics.clone(),
        );
        let cancel = CancellationToken::new();

        let controller = Arc::new(Self {
            state,
            k8s,
            settings,
            queue_tx,
            audit,
            cancel,
        });

        for worker_id in 0..controller.settings.worker_count {
            let controller = controller.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move {
                controller.run_worker(worker_id, queue_rx).await;
            });
        }

        controller
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// `EnqueueRotation`: persist the event row, then hand it to the queue.
    /// Enqueue is non-blocking; a full queue fails fast rather than
    /// backpressuring the caller.
    pub async fn enqueue_rotation(
        &self,
        service_id: Uuid,
        environment: &str,
        secret_name: &str,
        old_version: Option<&str>,
        new_version: &str,
        triggered_by: Option<Uuid>,
    ) -> CoreResult<SecretChangeEvent> {
        let event = db_rotation::create_event(
            &self.state.db_pool,
            service_id,
            environment,
            secret_name,
            old_version,
            new_version,
            triggered_by,
        )
        .await
        .map_err(|e| CoreError::from_db_error("creating secret change event", e))?;

        self.queue_tx.try_send(event.clone()).map_err(|_| {
            CoreError::transient(format!(
                "rotation queue full (capacity={}): QueueFull",
                self.settings.queue_capacity
            ))
        })?;

        Ok(event)
    }

    pub async fn get_rotation_history(
        &self,
        service_id: Uuid,
        limit: i64,
    ) -> CoreResult<Vec<RotationAuditLog>> {
        db_rotation::history_for_service(&self.state.db_pool, service_id, limit)
            .await
            .map_err(|e| CoreError::from_db_error("loading rotation history", e))
    }

    async fn run_worker(
        &self,
        worker_id: usize,
        queue_rx: Arc<Mutex<mpsc::Receiver<SecretChangeEvent>>>,
    ) {
        loop {
            let event = {
                let mut rx = queue_rx.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    ev = rx.recv() => ev,
                }
            };
            let Some(event) = event else {
                info!(worker_id, "rotation worker shutting down");
                return;
            };

            if let Err(e) = self.process_event(&event).await {
                error!(event_id = %event.id, worker_id, error = %e, "rotation event processing failed");
            }
        }
    }

    /// The per-event algorithm from the spec: audit row -> rolling restart ->
    /// poll to convergence -> rollback on timeout/error -> finalize.
    async fn process_event(&self, event: &SecretChangeEvent) -> Result<()> {
        let service = db_services::find_by_id(&self.state.db_pool, event.service_id)
            .await?
            .context("service not found for rotation event")?;

        let namespace = namespace_for_project(service.project_id);
        let deployment = service.name.clone();

        let audit_row = db_rotation::create_audit_row(
            &self.state.db_pool,
            event.id,
            event.service_id,
            &event.secret_name,
            event.old_version.as_deref(),
            &event.new_version,
            "rolling",
        )
        .await?;

        let rollout_id = format!("{}-{}", deployment, chrono::Utc::now().timestamp());
        db_rotation::mark_event_status(
            &self.state.db_pool,
            event.id,
            RotationStatus::InProgress,
            Some(&rollout_id),
        )
        .await?;

        let started = Instant::now();

        if let Err(e) = self.k8s.rolling_restart(&namespace, &deployment).await {
            return self
                .finalize_with_rollback(event, &audit_row.id, &namespace, &deployment, started, 0, &e.to_string())
                .await;
        }

        let poll_interval = Duration::from_secs(self.settings.rollout_poll_interval_secs);
        let timeout = Duration::from_secs(self.settings.rollout_timeout_secs);
        let deadline = Instant::now() + timeout;

        loop {
            tokio::time::sleep(poll_interval).await;

            let info = match self.k8s.get_deployment_status_info(&namespace, &deployment).await {
                Ok(info) => info,
                Err(e) => {
                    return self
                        .finalize_with_rollback(
                            event,
                            &audit_row.id,
                            &namespace,
                            &deployment,
                            started,
                            0,
                            &format!("status poll failed: {e}"),
                        )
                        .await;
                }
            };

            if info.rollout_complete(info.replicas) {
                let duration = started.elapsed();
                db_rotation::mark_event_status(
                    &self.state.db_pool,
                    event.id,
                    RotationStatus::Completed,
                    None,
                )
                .await?;
                self.audit
                    .enqueue(AuditTask::Finalize {
                        id: audit_row.id,
                        status: RotationStatus::Completed,
                        pods_restarted: info.replicas,
                        error: None,
                        completed_at: chrono::Utc::now(),
                        duration_ms: duration.as_millis() as i64,
                    })
                    .await;
                self.state
                    .metrics
                    .rotation_total
                    .with_label_values(&["completed"])
                    .inc();
                self.state
                    .metrics
                    .rotation_duration_seconds
                    .with_label_values(&["completed"])
                    .observe(duration.as_secs_f64());
                return Ok(());
            }

            if Instant::now() >= deadline {
                return self
                    .finalize_with_rollback(
                        event,
                        &audit_row.id,
                        &namespace,
                        &deployment,
                        started,
                        0,
                        "rollout timeout: replicas did not converge within the allotted window",
                    )
                    .await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize_with_rollback(
        &self,
        event: &SecretChangeEvent,
        audit_id: &Uuid,
        namespace: &str,
        deployment: &str,
        started: Instant,
        pods_restarted: i32,
        reason: &str,
    ) -> Result<()> {
        warn!(event_id = %event.id, reason, "rotation rolling back");
        let rollback_result = self.k8s.rollback_deployment(namespace, deployment).await;
        let duration = started.elapsed();

        let (status, error_message, metric_label) = match rollback_result {
            Ok(()) => (
                RotationStatus::RolledBack,
                Some(reason.to_string()),
                "rolled_back",
            ),
            Err(rollback_err) => (
                RotationStatus::Failed,
                Some(format!("{reason}; rollback also failed: {rollback_err}")),
                "failed",
            ),
        };

        db_rotation::mark_event_status(&self.state.db_pool, event.id, status, None).await?;
        self.audit
            .enqueue(AuditTask::Finalize {
                id: *audit_id,
                status,
                pods_restarted,
                error: error_message,
                completed_at: chrono::Utc::now(),
                duration_ms: duration.as_millis() as i64,
            })
            .await;
        self.state
            .metrics
            .rotation_total
            .with_label_values(&[metric_label])
            .inc();
        self.state
            .metrics
            .rotation_duration_seconds
            .with_label_values(&[metric_label])
            .observe(duration.as_secs_f64());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_uses_full_project_id() {
        let id = Uuid::nil();
        assert_eq!(
            namespace_for_project(id),
            "enclii-00000000-0000-0000-0000-000000000000"
        );
    }
}
