//! Library for the VPA operator
//!
//! This crate provides the core functionality for:
//! - Planning which VerticalPodAutoscalers to create and delete
//! - Listing workloads and VPAs from the cluster
//! - Applying planned actions, best-effort
//! - Running reconciliation cycles on a fixed interval
//! - Health checks and observability

pub mod catalog;
pub mod cluster;
pub mod cycle;
pub mod error;
pub mod executor;
pub mod health;
pub mod models;
pub mod observability;
pub mod reconciler;
pub mod scheduler;

pub use catalog::{Snapshot, VpaCatalog, WorkloadCatalog};
pub use cycle::{run_once, ActionFailure, ActionKind, AppliedAction, CycleReport};
pub use error::{ApplyError, ConnectError, FetchError};
pub use executor::{ActionExecutor, DryRunExecutor};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OperatorMetrics, StructuredLogger};
pub use reconciler::{
    matches_for_create, matches_for_delete, ExemptionPolicy, ExemptionRules, ManagedByExemption,
    NamePrefixExemption, Reconciler,
};
pub use scheduler::{CycleStatus, ReconcileLoop, ReconcileLoopBuilder, SharedCycleStatus};
