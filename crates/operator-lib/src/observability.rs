//! Observability infrastructure for the VPA operator
//!
//! Provides:
//! - Prometheus metrics (cycle latency, actions applied, objects observed)
//! - Structured JSON logging with tracing

use crate::models::WorkloadKind;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OperatorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct OperatorMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles_total: IntCounterVec,
    vpas_created: IntCounter,
    vpas_deleted: IntCounter,
    action_errors: IntCounterVec,
    workloads_observed: IntGaugeVec,
    vpas_observed: IntGauge,
    last_success_timestamp: IntGauge,
}

impl OperatorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "vpa_operator_cycle_duration_seconds",
                "Time spent on one fetch-plan-apply reconciliation cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles_total: register_int_counter_vec!(
                "vpa_operator_cycles_total",
                "Reconciliation cycles by result",
                &["result"]
            )
            .expect("Failed to register cycles_total"),

            vpas_created: register_int_counter!(
                "vpa_operator_vpas_created_total",
                "Total number of VPAs created"
            )
            .expect("Failed to register vpas_created"),

            vpas_deleted: register_int_counter!(
                "vpa_operator_vpas_deleted_total",
                "Total number of VPAs deleted"
            )
            .expect("Failed to register vpas_deleted"),

            action_errors: register_int_counter_vec!(
                "vpa_operator_action_errors_total",
                "Total number of failed create/delete calls",
                &["action"]
            )
            .expect("Failed to register action_errors"),

            workloads_observed: register_int_gauge_vec!(
                "vpa_operator_workloads_observed",
                "Workload controllers seen in the last snapshot",
                &["kind"]
            )
            .expect("Failed to register workloads_observed"),

            vpas_observed: register_int_gauge!(
                "vpa_operator_vpas_observed",
                "VPAs seen in the last snapshot"
            )
            .expect("Failed to register vpas_observed"),

            last_success_timestamp: register_int_gauge!(
                "vpa_operator_last_success_timestamp_seconds",
                "Unix time of the last cycle that completed without a fetch error"
            )
            .expect("Failed to register last_success_timestamp"),
        }
    }
}

/// Operator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OperatorMetrics {
    _private: (),
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OperatorMetricsInner {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new)
    }

    /// Everything in the default registry, in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    /// Count a finished cycle; `result` is "success" or "fetch_error"
    pub fn inc_cycles(&self, result: &str) {
        self.inner().cycles_total.with_label_values(&[result]).inc();
    }

    pub fn add_vpas_created(&self, count: u64) {
        self.inner().vpas_created.inc_by(count);
    }

    pub fn add_vpas_deleted(&self, count: u64) {
        self.inner().vpas_deleted.inc_by(count);
    }

    /// Count a failed action; `action` is "create" or "delete"
    pub fn inc_action_errors(&self, action: &str) {
        self.inner().action_errors.with_label_values(&[action]).inc();
    }

    pub fn set_workloads_observed(&self, kind: WorkloadKind, count: i64) {
        self.inner()
            .workloads_observed
            .with_label_values(&[kind.as_str()])
            .set(count);
    }

    pub fn set_vpas_observed(&self, count: i64) {
        self.inner().vpas_observed.set(count);
    }

    pub fn set_last_success(&self, unix_secs: i64) {
        self.inner().last_success_timestamp.set(unix_secs);
    }
}

/// Structured logger for operator events
///
/// Provides consistent JSON-formatted logging for every VPA created or
/// deleted and for cycle-level outcomes.
#[derive(Clone)]
pub struct StructuredLogger {
    operator: String,
}

impl StructuredLogger {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
        }
    }

    pub fn log_vpa_created(&self, name: &str, namespace: &str, kind: &str) {
        info!(
            event = "vpa_created",
            operator = %self.operator,
            vpa = %name,
            namespace = %namespace,
            kind = %kind,
            "Created VPA"
        );
    }

    pub fn log_vpa_create_failed(&self, name: &str, namespace: &str, kind: &str, error: &str) {
        warn!(
            event = "vpa_create_failed",
            operator = %self.operator,
            vpa = %name,
            namespace = %namespace,
            kind = %kind,
            error = %error,
            "Failed to create VPA"
        );
    }

    pub fn log_vpa_deleted(&self, name: &str, namespace: &str, kind: &str) {
        info!(
            event = "vpa_deleted",
            operator = %self.operator,
            vpa = %name,
            namespace = %namespace,
            kind = %kind,
            "Deleted orphaned VPA"
        );
    }

    pub fn log_vpa_delete_failed(&self, name: &str, namespace: &str, kind: &str, error: &str) {
        warn!(
            event = "vpa_delete_failed",
            operator = %self.operator,
            vpa = %name,
            namespace = %namespace,
            kind = %kind,
            error = %error,
            "Failed to delete VPA"
        );
    }

    pub fn log_fetch_failed(&self, resource: &str, error: &str) {
        error!(
            event = "fetch_failed",
            operator = %self.operator,
            resource = %resource,
            error = %error,
            "Failed to list resources, skipping cycle"
        );
    }

    pub fn log_cycle_complete(
        &self,
        workloads: usize,
        vpas: usize,
        created: usize,
        deleted: usize,
        failures: usize,
        duration_ms: u64,
    ) {
        info!(
            event = "cycle_completed",
            operator = %self.operator,
            workloads = workloads,
            vpas = vpas,
            created = created,
            deleted = deleted,
            failures = failures,
            duration_ms = duration_ms,
            "Completed scanning for changes"
        );
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64, dry_run: bool) {
        info!(
            event = "operator_started",
            operator = %self.operator,
            version = %version,
            interval_secs = interval_secs,
            dry_run = dry_run,
            "VPA operator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "operator_shutdown",
            operator = %self.operator,
            reason = %reason,
            "VPA operator shutting down"
        );
    }
}
