//! Application of planned actions against the cluster

use crate::error::ApplyError;
use crate::models::ManagedVpaSpec;
use async_trait::async_trait;
use tracing::info;

/// Applies create and delete actions, one call per action
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Create the VPA; returns the (name, namespace) the API server reports
    async fn create(&self, spec: &ManagedVpaSpec) -> Result<(String, String), ApplyError>;

    /// Delete the named VPA
    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ApplyError>;

    /// True when actions are only logged, never sent to the cluster
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Executor that only logs what it would do
#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn create(&self, spec: &ManagedVpaSpec) -> Result<(String, String), ApplyError> {
        info!(
            vpa = %spec.name,
            namespace = %spec.namespace,
            kind = %spec.target_ref.kind,
            dry_run = true,
            "Would create VPA"
        );
        Ok((spec.name.clone(), spec.namespace.clone()))
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ApplyError> {
        info!(vpa = %name, namespace = %namespace, dry_run = true, "Would delete VPA");
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}
