use prometheus::{HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

/// Process-wide metrics registry shared by every subsystem, gathered the way
/// `molnett-neon-operator`'s cluster controller exposes its metric families
/// (`registry.gather()` -> `Vec<prometheus::proto::MetricFamily>`).
pub struct Metrics {
    pub registry: Registry,
    pub addon_provision_total: IntCounterVec,
    pub addon_status: IntGauge,
    pub rotation_total: IntCounterVec,
    pub rotation_duration_seconds: HistogramVec,
    pub provenance_decisions_total: IntCounterVec,
    pub aggregation_runs_total: IntCounterVec,
    pub aggregation_duration_seconds: HistogramVec,
    pub notification_deliveries_total: IntCounterVec,
    pub audit_dropped_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let addon_provision_total = IntCounterVec::new(
            Opts::new(
                "enclii_addon_provision_total",
                "Addon provisioning attempts by type and outcome",
            ),
            &["addon_type", "outcome"],
        )?;
        let addon_status = IntGauge::new(
            "enclii_addon_ready_count",
            "Number of addons currently in the ready state",
        )?;
        let rotation_total = IntCounterVec::new(
            Opts::new(
                "enclii_rotation_total",
                "Secret rotation events by terminal status",
            ),
            &["status"],
        )?;
        let rotation_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "enclii_rotation_duration_seconds",
                "Duration of secret rotation rollouts",
            ),
            &["status"],
        )?;
        let provenance_decisions_total = IntCounterVec::new(
            Opts::new(
                "enclii_provenance_decisions_total",
                "Provenance gate decisions by environment and approval outcome",
            ),
            &["environment", "approved"],
        )?;
        let aggregation_runs_total = IntCounterVec::new(
            Opts::new(
                "enclii_aggregation_runs_total",
                "Hourly usage aggregation runs by outcome",
            ),
            &["outcome"],
        )?;
        let aggregation_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "enclii_aggregation_duration_seconds",
                "Duration of a single hourly aggregation run",
            ),
            &["outcome"],
        )?;
        let notification_deliveries_total = IntCounterVec::new(
            Opts::new(
                "enclii_notification_deliveries_total",
                "Webhook delivery attempts by destination kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let audit_dropped_total = IntCounterVec::new(
            Opts::new(
                "enclii_audit_dropped_total",
                "Audit records dropped because both the primary and fallback queues were full",
            ),
            &["pipeline"],
        )?;

        registry.register(Box::new(addon_provision_total.clone()))?;
        registry.register(Box::new(addon_status.clone()))?;
        registry.register(Box::new(rotation_total.clone()))?;
        registry.register(Box::new(rotation_duration_seconds.clone()))?;
        registry.register(Box::new(provenance_decisions_total.clone()))?;
        registry.register(Box::new(aggregation_runs_total.clone()))?;
        registry.register(Box::new(aggregation_duration_seconds.clone()))?;
        registry.register(Box::new(notification_deliveries_total.clone()))?;
        registry.register(Box::new(audit_dropped_total.clone()))?;

        Ok(Self {
            registry,
            addon_provision_total,
            addon_status,
            rotation_total,
            rotation_duration_seconds,
            provenance_decisions_total,
            aggregation_runs_total,
            aggregation_duration_seconds,
            notification_deliveries_total,
            audit_dropped_total,
        })
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}
