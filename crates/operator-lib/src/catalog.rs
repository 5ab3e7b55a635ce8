//! Snapshot sources for workloads and VPAs

use crate::error::FetchError;
use crate::models::{VpaRecord, WorkloadKind, WorkloadRef};
use async_trait::async_trait;

/// Lists workload controllers of one kind across all namespaces
#[async_trait]
pub trait WorkloadCatalog: Send + Sync {
    async fn list(&self, kind: WorkloadKind) -> Result<Vec<WorkloadRef>, FetchError>;
}

/// Lists VerticalPodAutoscalers across all namespaces
#[async_trait]
pub trait VpaCatalog: Send + Sync {
    async fn list(&self) -> Result<Vec<VpaRecord>, FetchError>;
}

/// One consistent view of the cluster, taken at the start of a cycle
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub workloads: Vec<WorkloadRef>,
    pub vpas: Vec<VpaRecord>,
}

impl Snapshot {
    /// Fetch VPAs, then every workload kind in [`WorkloadKind::ALL`] order.
    ///
    /// The first failure aborts the snapshot so that no plan is ever computed
    /// from partial data.
    pub async fn take(
        workloads: &dyn WorkloadCatalog,
        vpas: &dyn VpaCatalog,
    ) -> Result<Self, FetchError> {
        let vpas = vpas.list().await?;

        let mut all_workloads = Vec::new();
        for kind in WorkloadKind::ALL {
            all_workloads.extend(workloads.list(kind).await?);
        }

        Ok(Self {
            workloads: all_workloads,
            vpas,
        })
    }

    /// Number of workloads of the given kind in this snapshot
    pub fn count_of(&self, kind: WorkloadKind) -> usize {
        self.workloads.iter().filter(|w| w.kind == kind).count()
    }
}
