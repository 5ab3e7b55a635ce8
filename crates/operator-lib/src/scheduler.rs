//! Periodic reconciliation loop
//!
//! Runs a cycle immediately on start and then once per interval until
//! shutdown. A failed cycle is logged and recorded, never fatal: the next
//! tick re-derives everything from fresh snapshots.

use crate::catalog::{VpaCatalog, WorkloadCatalog};
use crate::cycle::{run_once, ActionKind, CycleReport};
use crate::executor::ActionExecutor;
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::reconciler::Reconciler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Default reconciliation interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Consecutive failed cycles before the reconciler reports unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub interval: Duration,
    pub failure_threshold: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// Outcome history shared with the HTTP status endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<CycleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub cycles_run: u64,
}

/// Shared handle on the latest [`CycleStatus`]
pub type SharedCycleStatus = Arc<RwLock<CycleStatus>>;

/// Missing collaborator when building a [`ReconcileLoop`]
#[derive(Debug, Error)]
#[error("{0} is required")]
pub struct BuildError(&'static str);

/// Reconciliation loop that periodically runs one cycle
pub struct ReconcileLoop {
    workloads: Arc<dyn WorkloadCatalog>,
    vpas: Arc<dyn VpaCatalog>,
    executor: Arc<dyn ActionExecutor>,
    reconciler: Reconciler,
    config: LoopConfig,
    health: HealthRegistry,
    metrics: OperatorMetrics,
    logger: StructuredLogger,
    status: SharedCycleStatus,
}

impl ReconcileLoop {
    /// Shared status handle, for the HTTP layer
    pub fn status(&self) -> SharedCycleStatus {
        self.status.clone()
    }

    /// Run until a shutdown signal is received
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting reconciliation loop"
        );

        // The first tick completes immediately, so a cycle runs on start.
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation loop");
                    break;
                }
            }
        }
    }

    /// Run one cycle and record its outcome
    pub async fn tick(&self) {
        info!("Scanning for changes");

        let result = run_once(
            self.workloads.as_ref(),
            self.vpas.as_ref(),
            self.executor.as_ref(),
            &self.reconciler,
            &self.logger,
        )
        .await;

        match result {
            Ok(report) => self.record_success(report).await,
            Err(e) => self.record_failure(e.to_string()).await,
        }
    }

    async fn record_success(&self, report: CycleReport) {
        self.metrics
            .observe_cycle_duration(report.duration_ms as f64 / 1000.0);
        self.metrics.inc_cycles("success");
        let (created, deleted) = report.applied_counts();
        self.metrics.add_vpas_created(created as u64);
        self.metrics.add_vpas_deleted(deleted as u64);
        for _ in 0..report.failures_of(ActionKind::Create) {
            self.metrics.inc_action_errors(ActionKind::Create.as_str());
        }
        for _ in 0..report.failures_of(ActionKind::Delete) {
            self.metrics.inc_action_errors(ActionKind::Delete.as_str());
        }
        for (kind, count) in &report.workloads_by_kind {
            self.metrics.set_workloads_observed(*kind, *count as i64);
        }
        self.metrics.set_vpas_observed(report.vpas_observed as i64);
        self.metrics.set_last_success(report.started_at.timestamp());

        self.health.set_healthy(components::KUBE_API).await;
        self.health
            .update(
                components::RECONCILER,
                ComponentHealth::after_completed_cycle(report.failures.len()),
            )
            .await;

        let mut status = self.status.write().await;
        status.last_report = Some(report);
        status.consecutive_failures = 0;
        status.cycles_run += 1;
    }

    async fn record_failure(&self, error: String) {
        self.metrics.inc_cycles("fetch_error");

        let failures = {
            let mut status = self.status.write().await;
            status.consecutive_failures += 1;
            status.cycles_run += 1;
            status.last_error = Some(error.clone());
            status.last_error_at = Some(Utc::now());
            status.consecutive_failures
        };

        warn!(
            error = %error,
            consecutive_failures = failures,
            "Reconciliation cycle failed, retrying at next interval"
        );

        self.health
            .set_degraded(components::KUBE_API, error.as_str())
            .await;
        self.health
            .update(
                components::RECONCILER,
                ComponentHealth::after_failed_cycle(
                    failures,
                    self.config.failure_threshold,
                    &error,
                ),
            )
            .await;
    }
}

/// Builder for creating the reconciliation loop
pub struct ReconcileLoopBuilder {
    workloads: Option<Arc<dyn WorkloadCatalog>>,
    vpas: Option<Arc<dyn VpaCatalog>>,
    executor: Option<Arc<dyn ActionExecutor>>,
    reconciler: Reconciler,
    config: LoopConfig,
    health: Option<HealthRegistry>,
    metrics: Option<OperatorMetrics>,
    logger: Option<StructuredLogger>,
}

impl ReconcileLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            workloads: None,
            vpas: None,
            executor: None,
            reconciler: Reconciler::default(),
            config: LoopConfig::default(),
            health: None,
            metrics: None,
            logger: None,
        }
    }

    pub fn workloads(mut self, catalog: Arc<dyn WorkloadCatalog>) -> Self {
        self.workloads = Some(catalog);
        self
    }

    pub fn vpas(mut self, catalog: Arc<dyn VpaCatalog>) -> Self {
        self.vpas = Some(catalog);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: OperatorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<ReconcileLoop, BuildError> {
        Ok(ReconcileLoop {
            workloads: self.workloads.ok_or(BuildError("Workload catalog"))?,
            vpas: self.vpas.ok_or(BuildError("VPA catalog"))?,
            executor: self.executor.ok_or(BuildError("Action executor"))?,
            reconciler: self.reconciler,
            config: self.config,
            health: self.health.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new(crate::models::MANAGER_NAME)),
            status: SharedCycleStatus::default(),
        })
    }
}

impl Default for ReconcileLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
