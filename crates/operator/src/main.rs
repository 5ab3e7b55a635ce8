//! VPA operator
//!
//! Keeps one observation-only VerticalPodAutoscaler per Deployment,
//! StatefulSet and DaemonSet in the cluster, and removes VPAs whose
//! workload is gone.

use anyhow::{Context, Result};
use operator_lib::{
    cluster::{connect, KubeActionExecutor, KubeVpaCatalog, KubeWorkloadCatalog},
    health::{components, HealthRegistry},
    observability::{OperatorMetrics, StructuredLogger},
    ActionExecutor, DryRunExecutor, ReconcileLoopBuilder, Reconciler,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::OperatorConfig::load()?;
    info!(
        interval_secs = config.interval_secs,
        exempt_prefixes = ?config.exempt_prefixes,
        exempt_managers = ?config.exempt_managers,
        "Operator configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::RECONCILER).await;
    health_registry.register(components::KUBE_API).await;

    let metrics = OperatorMetrics::new();

    let logger = StructuredLogger::new(&config.operator_name);
    logger.log_startup(OPERATOR_VERSION, config.interval_secs, config.dry_run);

    // Without a client there is nothing to reconcile
    let client = connect(config.kubeconfig.as_deref())
        .await
        .context("Failed to connect to kubernetes cluster")?;

    let executor: Arc<dyn ActionExecutor> = if config.dry_run {
        Arc::new(DryRunExecutor)
    } else {
        Arc::new(KubeActionExecutor::new(client.clone()))
    };

    let reconcile_loop = ReconcileLoopBuilder::new()
        .workloads(Arc::new(KubeWorkloadCatalog::new(client.clone())))
        .vpas(Arc::new(KubeVpaCatalog::new(client)))
        .executor(executor)
        .reconciler(Reconciler::new(config.exemptions()))
        .interval(config.interval())
        .failure_threshold(config.failure_threshold)
        .health(health_registry.clone())
        .metrics(metrics.clone())
        .logger(logger.clone())
        .build()?;

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        reconcile_loop.status(),
    ));

    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(reconcile_loop.run(shutdown_rx));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    loop_handle.await?;
    api_handle.abort();

    info!("Shutting down");
    Ok(())
}
