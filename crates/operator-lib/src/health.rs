//! Liveness and readiness state of the operator
//!
//! The reconciliation loop reports into a [`HealthRegistry`]; the HTTP
//! layer turns it into `/healthz` and `/readyz` answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health of one component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Cycles are failing but the operator is still worth keeping alive
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Unhealthy => "unhealthy",
        }
    }

    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Reconciler health after a cycle that fetched both snapshots.
    ///
    /// Failed actions are retried by the next cycle, so they only degrade.
    pub fn after_completed_cycle(failed_actions: usize) -> Self {
        if failed_actions == 0 {
            Self::healthy()
        } else {
            Self::degraded(format!("{} actions failed in last cycle", failed_actions))
        }
    }

    /// Reconciler health after a cycle aborted by a fetch error.
    ///
    /// Unhealthy once `consecutive_failures` reaches `threshold`, so that the
    /// liveness probe restarts an operator that stopped making progress.
    pub fn after_failed_cycle(consecutive_failures: u32, threshold: u32, error: &str) -> Self {
        if consecutive_failures >= threshold {
            Self::unhealthy(format!(
                "{} consecutive failed cycles: {}",
                consecutive_failures, error
            ))
        } else {
            Self::degraded(error)
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components; healthy when there are none
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    /// The periodic fetch-plan-apply loop
    pub const RECONCILER: &str = "reconciler";
    /// Connectivity to the Kubernetes API server
    pub const KUBE_API: &str = "kube_api";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a component, starting out healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Flip once the loop and the API server are running
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("operator is starting".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, health)| !health.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn operator_registry() -> HealthRegistry {
        let registry = HealthRegistry::new();
        registry.register(components::RECONCILER).await;
        registry.register(components::KUBE_API).await;
        registry
    }

    #[test]
    fn test_status_ordering() {
        assert!(ComponentStatus::Healthy < ComponentStatus::Degraded);
        assert!(ComponentStatus::Degraded < ComponentStatus::Unhealthy);
        assert!(ComponentStatus::Degraded.is_operational());
        assert!(!ComponentStatus::Unhealthy.is_operational());
    }

    #[test]
    fn test_after_completed_cycle() {
        assert_eq!(
            ComponentHealth::after_completed_cycle(0).status,
            ComponentStatus::Healthy
        );

        let health = ComponentHealth::after_completed_cycle(2);
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.message.as_deref(),
            Some("2 actions failed in last cycle")
        );
    }

    #[test]
    fn test_after_failed_cycle_threshold() {
        let below = ComponentHealth::after_failed_cycle(2, 3, "failed to fetch deployments");
        assert_eq!(below.status, ComponentStatus::Degraded);
        assert_eq!(below.message.as_deref(), Some("failed to fetch deployments"));

        let at = ComponentHealth::after_failed_cycle(3, 3, "failed to fetch deployments");
        assert_eq!(at.status, ComponentStatus::Unhealthy);
        assert_eq!(
            at.message.as_deref(),
            Some("3 consecutive failed cycles: failed to fetch deployments")
        );
    }

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let health = HealthRegistry::new().health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = operator_registry().await;

        registry
            .set_degraded(components::KUBE_API, "failed to fetch deployments")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::RECONCILER, "3 consecutive failed cycles")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.set_healthy(components::RECONCILER).await;
        registry.set_healthy(components::KUBE_API).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_not_ready_while_starting() {
        let registry = operator_registry().await;

        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("operator is starting"));
    }

    #[tokio::test]
    async fn test_ready_while_degraded() {
        let registry = operator_registry().await;
        registry.set_ready(true).await;
        registry.set_degraded(components::KUBE_API, "slow").await;

        let readiness = registry.readiness().await;

        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
    }

    #[tokio::test]
    async fn test_not_ready_names_unhealthy_components() {
        let registry = operator_registry().await;
        registry.set_ready(true).await;
        registry
            .set_unhealthy(components::RECONCILER, "3 consecutive failed cycles")
            .await;

        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("unhealthy: reconciler"));
    }

    #[test]
    fn test_health_response_json_shape() {
        let mut by_name = BTreeMap::new();
        by_name.insert(
            components::RECONCILER.to_string(),
            ComponentHealth::degraded("1 actions failed in last cycle"),
        );
        let response = HealthResponse {
            status: HealthResponse::compute_status(&by_name),
            components: by_name,
        };

        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["reconciler"]["status"], "degraded");
        assert!(json["components"]["reconciler"]["last_check"].is_string());
    }
}
