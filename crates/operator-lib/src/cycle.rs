//! One reconciliation cycle: fetch, plan, apply

use crate::catalog::{Snapshot, VpaCatalog, WorkloadCatalog};
use crate::error::FetchError;
use crate::executor::ActionExecutor;
use crate::models::{ManagedVpaSpec, VpaRecord, WorkloadKind};
use crate::observability::StructuredLogger;
use crate::reconciler::Reconciler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Kind of action that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Delete => "delete",
        }
    }
}

/// A VPA that was created or deleted during the cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedAction {
    pub name: String,
    pub namespace: String,
    pub kind: String,
}

/// An action that failed; retried implicitly by the next cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub action: ActionKind,
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub error: String,
}

/// Outcome of a cycle that got past the fetch stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub workloads_observed: usize,
    pub workloads_by_kind: BTreeMap<WorkloadKind, usize>,
    pub vpas_observed: usize,
    pub created: Vec<AppliedAction>,
    pub deleted: Vec<AppliedAction>,
    pub failures: Vec<ActionFailure>,
    /// Actions were only logged; `created` and `deleted` list what would have happened
    #[serde(default)]
    pub dry_run: bool,
}

impl CycleReport {
    /// (created, deleted) counts that actually reached the cluster
    pub fn applied_counts(&self) -> (usize, usize) {
        if self.dry_run {
            (0, 0)
        } else {
            (self.created.len(), self.deleted.len())
        }
    }

    pub fn failures_of(&self, action: ActionKind) -> usize {
        self.failures.iter().filter(|f| f.action == action).count()
    }
}

/// Run one full cycle.
///
/// A failed listing aborts before anything is planned or applied. Once the
/// plan exists every action is attempted: creates first, then deletes, and
/// a failed action is logged and recorded without stopping the others.
pub async fn run_once(
    workloads: &dyn WorkloadCatalog,
    vpas: &dyn VpaCatalog,
    executor: &dyn ActionExecutor,
    reconciler: &Reconciler,
    logger: &StructuredLogger,
) -> Result<CycleReport, FetchError> {
    let started_at = Utc::now();
    let start = Instant::now();

    let snapshot = match Snapshot::take(workloads, vpas).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            logger.log_fetch_failed(&e.resource, &e.source.to_string());
            return Err(e);
        }
    };

    let plan = reconciler.plan(&snapshot.workloads, &snapshot.vpas);

    let mut created = Vec::new();
    let mut deleted = Vec::new();
    let mut failures = Vec::new();

    for spec in plan.create_specs() {
        match apply_create(executor, &spec, logger).await {
            Ok(action) => created.push(action),
            Err(failure) => failures.push(failure),
        }
    }

    for vpa in &plan.to_delete {
        match apply_delete(executor, vpa, logger).await {
            Ok(action) => deleted.push(action),
            Err(failure) => failures.push(failure),
        }
    }

    let report = CycleReport {
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
        workloads_observed: snapshot.workloads.len(),
        workloads_by_kind: WorkloadKind::ALL
            .iter()
            .map(|kind| (*kind, snapshot.count_of(*kind)))
            .collect(),
        vpas_observed: snapshot.vpas.len(),
        created,
        deleted,
        failures,
        dry_run: executor.is_dry_run(),
    };

    logger.log_cycle_complete(
        report.workloads_observed,
        report.vpas_observed,
        report.created.len(),
        report.deleted.len(),
        report.failures.len(),
        report.duration_ms,
    );

    Ok(report)
}

async fn apply_create(
    executor: &dyn ActionExecutor,
    spec: &ManagedVpaSpec,
    logger: &StructuredLogger,
) -> Result<AppliedAction, ActionFailure> {
    let kind = spec.target_ref.kind.clone();

    match executor.create(spec).await {
        Ok((name, namespace)) => {
            logger.log_vpa_created(&name, &namespace, &kind);
            Ok(AppliedAction {
                name,
                namespace,
                kind,
            })
        }
        Err(e) => {
            let error = e.to_string();
            logger.log_vpa_create_failed(&spec.name, &spec.namespace, &kind, &error);
            Err(ActionFailure {
                action: ActionKind::Create,
                name: spec.name.clone(),
                namespace: spec.namespace.clone(),
                kind,
                error,
            })
        }
    }
}

async fn apply_delete(
    executor: &dyn ActionExecutor,
    vpa: &VpaRecord,
    logger: &StructuredLogger,
) -> Result<AppliedAction, ActionFailure> {
    match executor.delete(&vpa.name, &vpa.namespace).await {
        Ok(()) => {
            logger.log_vpa_deleted(&vpa.name, &vpa.namespace, &vpa.target_kind);
            Ok(AppliedAction {
                name: vpa.name.clone(),
                namespace: vpa.namespace.clone(),
                kind: vpa.target_kind.clone(),
            })
        }
        Err(e) => {
            let error = e.to_string();
            logger.log_vpa_delete_failed(&vpa.name, &vpa.namespace, &vpa.target_kind, &error);
            Err(ActionFailure {
                action: ActionKind::Delete,
                name: vpa.name.clone(),
                namespace: vpa.namespace.clone(),
                kind: vpa.target_kind.clone(),
                error,
            })
        }
    }
}
