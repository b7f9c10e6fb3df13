//! Usage aggregator: replays the resource-lifecycle event log into
//! per-project, per-hour billable metrics.

pub mod pricing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::UsageEvent;
use crate::db::usage as db_usage;
use crate::errors::{CoreError, CoreResult};
use crate::state::ControllerState;

const METRIC_COMPUTE_GB_HOURS: &str = "compute_gb_hours";
const METRIC_BUILD_MINUTES: &str = "build_minutes";
const METRIC_STORAGE_GB_HOURS: &str = "storage_gb_hours";
const METRIC_BANDWIDTH_GB: &str = "bandwidth_gb";
const METRIC_CUSTOM_DOMAINS: &str = "custom_domains";

/// State of a deployment interval still open within the current window.
struct ActiveDeployment {
    start: DateTime<Utc>,
    replicas: f64,
    cpu_millicores: f64,
    memory_mb: f64,
}

impl ActiveDeployment {
    fn from_metrics(start: DateTime<Utc>, metrics: &HashMap<String, f64>) -> Self {
        Self {
            start,
            replicas: metrics.get("replicas").copied().unwrap_or(1.0),
            cpu_millicores: metrics.get("cpu_millicores").copied().unwrap_or(0.0),
            memory_mb: metrics.get("memory_mb").copied().unwrap_or(0.0),
        }
    }

    /// GB-equivalent compute for the interval `[start, end)`.
    fn gb_hours(&self, end: DateTime<Utc>) -> f64 {
        let hours = (end - self.start).num_milliseconds() as f64 / 3_600_000.0;
        if hours <= 0.0 {
            return 0.0;
        }
        let gb_equivalent = (self.memory_mb / 1024.0).max(self.cpu_millicores / 1000.0) * self.replicas;
        gb_equivalent * hours
    }
}

#[derive(Debug, Default, Clone)]
struct WindowTotals {
    compute_gb_hours: f64,
    build_minutes: f64,
    storage_gb_hours: f64,
    bandwidth_gb: f64,
    custom_domains_delta: f64,
}

pub struct UsageAggregator {
    state: Arc<ControllerState>,
}

impl UsageAggregator {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    /// `RecordEvent`: append a single usage event to the log.
    pub async fn record_event(
        &self,
        project_id: Uuid,
        event_type: &str,
        resource_type: &str,
        resource_id: &str,
        metrics: HashMap<String, f64>,
        timestamp: DateTime<Utc>,
    ) -> CoreResult<UsageEvent> {
        let metrics_json = serde_json::to_value(&metrics)
            .map_err(|e| CoreError::validation(format!("invalid metrics payload: {e}")))?;

        db_usage::insert_event(
            &self.state.db_pool,
            project_id,
            event_type,
            resource_type,
            resource_id,
            metrics_json,
            timestamp,
        )
        .await
        .map_err(|e| CoreError::from_db_error("recording usage event", e))
    }

    /// `RecordEventBatch`: append several events; each insert is independent,
    /// so a single malformed event does not block the rest of the batch.
    pub async fn record_event_batch(
        &self,
        project_id: Uuid,
        events: Vec<(String, String, String, HashMap<String, f64>, DateTime<Utc>)>,
    ) -> CoreResult<Vec<UsageEvent>> {
        let mut recorded = Vec::with_capacity(events.len());
        for (event_type, resource_type, resource_id, metrics, timestamp) in events {
            match self
                .record_event(project_id, &event_type, &resource_type, &resource_id, metrics, timestamp)
                .await
            {
                Ok(event) => recorded.push(event),
                Err(e) => warn!(%project_id, event_type, error = %e, "dropping malformed usage event in batch"),
            }
        }
        Ok(recorded)
    }

    /// `Run(hour)`: aggregate the window `[H, H+1)` for every project with
    /// events in it.
    pub async fn run(&self, hour: DateTime<Utc>) -> CoreResult<()> {
        let started = Instant::now();
        let window_start = truncate_to_hour(hour);
        let window_end = window_start + ChronoDuration::hours(1);

        let timeout = std::time::Duration::from_secs(self.state.settings.aggregator.run_timeout_secs);
        let result = tokio::time::timeout(timeout, self.run_window(window_start, window_end)).await;

        let outcome = match &result {
            Ok(Ok(())) => "success",
            Ok(Err(_)) => "failed",
            Err(_) => "timeout",
        };
        self.state
            .metrics
            .aggregation_runs_total
            .with_label_values(&[outcome])
            .inc();
        self.state
            .metrics
            .aggregation_duration_seconds
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(inner) => inner,
            Err(_) => Err(CoreError::timeout(format!(
                "hourly aggregation for {window_start} exceeded {}s",
                self.state.settings.aggregator.run_timeout_secs
            ))),
        }
    }

    /// `RunForRange`: backfill every truncated hour in `[start, end)`.
    pub async fn run_for_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<()> {
        let mut cursor = truncate_to_hour(start);
        let end = truncate_to_hour(end);
        while cursor < end {
            self.run(cursor).await?;
            cursor += ChronoDuration::hours(1);
        }
        Ok(())
    }

    async fn run_window(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> CoreResult<()> {
        let project_ids = db_usage::distinct_projects_in_window(&self.state.db_pool, window_start, window_end)
            .await
            .map_err(|e| CoreError::from_db_error("enumerating projects with usage events", e))?;

        for project_id in project_ids {
            if let Err(e) = self.aggregate_project(project_id, window_start, window_end).await {
                error!(%project_id, %window_start, error = %e, "hourly aggregation failed for project");
                return Err(e);
            }
        }

        Ok(())
    }

    async fn aggregate_project(
        &self,
        project_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> CoreResult<()> {
        let events = db_usage::events_for_project_in_window(
            &self.state.db_pool,
            project_id,
            window_start,
            window_end,
        )
        .await
        .map_err(|e| CoreError::from_db_error("loading usage events for window", e))?;

        let mut active: HashMap<String, ActiveDeployment> = HashMap::new();
        let mut totals = WindowTotals::default();
        let mut event_ids = Vec::with_capacity(events.len());

        for event in &events {
            event_ids.push(event.id);
            let metrics = event.metrics_map();

            match event.event_type.as_str() {
                "deployment.started" => {
                    active.insert(
                        event.resource_id.clone(),
                        ActiveDeployment::from_metrics(event.timestamp, &metrics),
                    );
                }
                "deployment.scaled" => {
                    if let Some(prior) = active.remove(&event.resource_id) {
                        totals.compute_gb_hours += prior.gb_hours(event.timestamp);
                    }
                    active.insert(
                        event.resource_id.clone(),
                        ActiveDeployment::from_metrics(event.timestamp, &metrics),
                    );
                }
                "deployment.stopped" => {
                    if let Some(prior) = active.remove(&event.resource_id) {
                        totals.compute_gb_hours += prior.gb_hours(event.timestamp);
                    }
                }
                "build.completed" => {
                    totals.build_minutes += metrics.get("duration_seconds").copied().unwrap_or(0.0) / 60.0;
                }
                // Simplification carried from the source system: a single
                // volume event contributes one hour of storage at its size,
                // rather than tracking actual volume lifetime.
                "volume.created" | "volume.resized" => {
                    totals.storage_gb_hours += metrics.get("size_gb").copied().unwrap_or(0.0);
                }
                "bandwidth.usage" => {
                    totals.bandwidth_gb += metrics.get("egress_gb").copied().unwrap_or(0.0);
                }
                "domain.added" => totals.custom_domains_delta += 1.0,
                "domain.removed" => totals.custom_domains_delta -= 1.0,
                other => warn!(%project_id, event_type = other, "unrecognized usage event type, skipping"),
            }
        }

        // Window end: close every state still open.
        for (_, state) in active.drain() {
            totals.compute_gb_hours += state.gb_hours(window_end);
        }

        for (metric, value) in [
            (METRIC_COMPUTE_GB_HOURS, totals.compute_gb_hours),
            (METRIC_BUILD_MINUTES, totals.build_minutes),
            (METRIC_STORAGE_GB_HOURS, totals.storage_gb_hours),
            (METRIC_BANDWIDTH_GB, totals.bandwidth_gb),
            (METRIC_CUSTOM_DOMAINS, totals.custom_domains_delta),
        ] {
            db_usage::upsert_hourly(&self.state.db_pool, project_id, metric, window_start, value)
                .await
                .map_err(|e| CoreError::from_db_error("upserting hourly usage", e))?;
        }

        if !event_ids.is_empty() {
            db_usage::mark_processed(&self.state.db_pool, &event_ids)
                .await
                .map_err(|e| CoreError::from_db_error("marking usage events processed", e))?;
        }

        info!(%project_id, %window_start, compute_gb_hours = totals.compute_gb_hours, "hourly usage aggregated");

        Ok(())
    }

    /// `CalculateUsageSummary`: sum every metric over `[start, end)`.
    pub async fn calculate_usage_summary(
        &self,
        project_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<HashMap<String, f64>> {
        let rows = db_usage::sum_hourly_in_range(&self.state.db_pool, project_id, start, end)
            .await
            .map_err(|e| CoreError::from_db_error("summarizing usage in range", e))?;
        Ok(rows.into_iter().collect())
    }

    /// Spawns the `HH:00:05` hourly scheduler, aggregating the hour that just
    /// closed. Runs until the process exits; errors are logged, not fatal.
    pub fn spawn_scheduler(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let sleep_for = time_until_next_tick(Utc::now());
                tokio::time::sleep(sleep_for).await;

                let previous_hour = truncate_to_hour(Utc::now()) - ChronoDuration::hours(1);
                if let Err(e) = self.run(previous_hour).await {
                    error!(%previous_hour, error = %e, "scheduled hourly aggregation run failed");
                }
            }
        })
    }
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Next `HH:00:05` boundary after `now`.
fn time_until_next_tick(now: DateTime<Utc>) -> std::time::Duration {
    let next_hour = truncate_to_hour(now) + ChronoDuration::hours(1) + ChronoDuration::seconds(5);
    let delta = next_hour - now;
    delta.to_std().unwrap_or(std::time::Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gb_hours_for_scale_scenario_matches_spec_example() {
        let h = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let started = ActiveDeployment {
            start: h,
            replicas: 2.0,
            cpu_millicores: 500.0,
            memory_mb: 1024.0,
        };
        let at_scale = h + ChronoDuration::minutes(30);
        let first_half = started.gb_hours(at_scale);

        let scaled = ActiveDeployment {
            start: at_scale,
            replicas: 4.0,
            cpu_millicores: 500.0,
            memory_mb: 1024.0,
        };
        let window_end = h + ChronoDuration::hours(1);
        let second_half = scaled.gb_hours(window_end);

        assert!((first_half - 1.0).abs() < 1e-9);
        assert!((second_half - 2.0).abs() < 1e-9);
        assert!((first_half + second_half - 3.0).abs() < 1e-9);
    }

    #[test]
    fn truncate_to_hour_drops_minutes_and_seconds() {
        let t = DateTime::parse_from_rfc3339("2026-01-01T13:47:09Z").unwrap().with_timezone(&Utc);
        let truncated = truncate_to_hour(t);
        assert_eq!(truncated.minute(), 0);
        assert_eq!(truncated.second(), 0);
    }
}
