//! Probe, metrics and status endpoints served next to the reconciliation loop

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use operator_lib::{HealthRegistry, OperatorMetrics, SharedCycleStatus};
use std::sync::Arc;
use tracing::{info, warn};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handles shared with every request
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: OperatorMetrics,
    pub status: SharedCycleStatus,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: OperatorMetrics,
        status: SharedCycleStatus,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            status,
        }
    }
}

fn probe_code(passing: bool) -> StatusCode {
    if passing {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness: fails only once the reconciler is unhealthy, a degraded
/// operator keeps retrying on its own
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    (probe_code(health.status.is_operational()), Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    (probe_code(readiness.ready), Json(readiness))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            text,
        ),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

/// Last completed cycle and the current failure streak
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status.read().await.clone())
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Serving probes, metrics and status");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use operator_lib::health::components;
    use operator_lib::{
        DryRunExecutor, FetchError, ReconcileLoop, ReconcileLoopBuilder, VpaCatalog, VpaRecord,
        WorkloadCatalog, WorkloadKind, WorkloadRef,
    };
    use tower::ServiceExt;

    /// One deployment without a VPA, and one VPA without a workload
    struct StaticCluster {
        reachable: bool,
    }

    #[async_trait]
    impl WorkloadCatalog for StaticCluster {
        async fn list(&self, kind: WorkloadKind) -> Result<Vec<WorkloadRef>, FetchError> {
            if !self.reachable {
                return Err(FetchError::new(kind.plural(), "connection refused"));
            }
            Ok(match kind {
                WorkloadKind::Deployment => vec![WorkloadRef::new(kind, "web", "shop")],
                _ => vec![],
            })
        }
    }

    #[async_trait]
    impl VpaCatalog for StaticCluster {
        async fn list(&self) -> Result<Vec<VpaRecord>, FetchError> {
            Ok(vec![VpaRecord::new("retired", "shop", "Deployment", "retired")])
        }
    }

    async fn operator(reachable: bool) -> (Router, ReconcileLoop, Arc<AppState>) {
        let health = HealthRegistry::new();
        health.register(components::RECONCILER).await;
        health.register(components::KUBE_API).await;

        let cluster = Arc::new(StaticCluster { reachable });
        let reconcile_loop = ReconcileLoopBuilder::new()
            .workloads(cluster.clone())
            .vpas(cluster)
            .executor(Arc::new(DryRunExecutor))
            .failure_threshold(1)
            .health(health.clone())
            .build()
            .unwrap();

        let state = Arc::new(AppState::new(
            health,
            OperatorMetrics::new(),
            reconcile_loop.status(),
        ));
        (create_router(state.clone()), reconcile_loop, state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_probes_before_first_cycle() {
        let (app, _loop, _state) = operator(true).await;

        let (code, health) = get_json(app.clone(), "/healthz").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(health["status"], "healthy");

        let (code, readiness) = get_json(app, "/readyz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(readiness["reason"], "operator is starting");
    }

    #[tokio::test]
    async fn test_status_reports_planned_actions() {
        let (app, reconcile_loop, state) = operator(true).await;
        state.health_registry.set_ready(true).await;

        reconcile_loop.tick().await;

        let (code, body) = get_json(app.clone(), "/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["cycles_run"], 1);
        assert_eq!(body["last_report"]["workloads_observed"], 1);
        assert_eq!(body["last_report"]["created"][0]["name"], "web");
        assert_eq!(body["last_report"]["deleted"][0]["name"], "retired");
        assert_eq!(body["last_report"]["dry_run"], true);

        let (code, _) = get_json(app, "/readyz").await;
        assert_eq!(code, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_failed_cycles_fail_liveness() {
        let (app, reconcile_loop, state) = operator(false).await;
        state.health_registry.set_ready(true).await;

        reconcile_loop.tick().await;

        let (code, health) = get_json(app.clone(), "/healthz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health["components"]["kube_api"]["status"], "degraded");
        assert_eq!(health["components"]["reconciler"]["status"], "unhealthy");

        let (code, readiness) = get_json(app.clone(), "/readyz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(readiness["reason"], "unhealthy: reconciler");

        let (_, status) = get_json(app, "/status").await;
        assert_eq!(status["consecutive_failures"], 1);
        assert!(status.get("last_report").is_none());
        assert!(status["last_error"]
            .as_str()
            .unwrap()
            .contains("failed to fetch deployments"));
    }

    #[tokio::test]
    async fn test_degraded_operator_stays_live() {
        let (app, _loop, state) = operator(true).await;
        state
            .health_registry
            .set_degraded(components::RECONCILER, "1 actions failed in last cycle")
            .await;

        let (code, health) = get_json(app, "/healthz").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(health["status"], "degraded");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, _loop, state) = operator(true).await;
        state.metrics.inc_cycles("success");

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PROMETHEUS_CONTENT_TYPE
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("vpa_operator_cycles_total"));
    }
}
