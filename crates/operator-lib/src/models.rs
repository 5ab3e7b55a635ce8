//! Core data models for the VPA operator

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// API group/version of the VerticalPodAutoscaler CRD
pub const VPA_API_VERSION: &str = "autoscaling.k8s.io/v1";

/// Kind of the VerticalPodAutoscaler CRD
pub const VPA_KIND: &str = "VerticalPodAutoscaler";

/// Update mode of every VPA this operator creates (recommendation only)
pub const UPDATE_MODE_OFF: &str = "Off";

/// Label recording which controller owns a VPA
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on VPAs created by this operator
pub const MANAGER_NAME: &str = "vpa-operator";

/// Workload controller kinds that receive a VPA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    /// All kinds, in the order they are listed and matched
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
    ];

    /// Kubernetes kind literal, as written in a targetRef
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }

    /// API version of the workload resource
    pub fn api_version(&self) -> &'static str {
        "apps/v1"
    }

    /// Lowercase plural resource name, used for logs and metric labels
    pub fn plural(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployments",
            WorkloadKind::StatefulSet => "statefulsets",
            WorkloadKind::DaemonSet => "daemonsets",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One workload controller observed in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

impl WorkloadRef {
    pub fn new(kind: WorkloadKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// One VerticalPodAutoscaler observed in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VpaRecord {
    pub name: String,
    pub namespace: String,
    /// Kind from `spec.targetRef`; empty when the VPA has no target reference
    pub target_kind: String,
    pub target_name: String,
    /// Value of the `app.kubernetes.io/managed-by` label, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<String>,
}

impl VpaRecord {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        target_kind: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            target_kind: target_kind.into(),
            target_name: target_name.into(),
            managed_by: None,
        }
    }

    pub fn with_managed_by(mut self, manager: impl Into<String>) -> Self {
        self.managed_by = Some(manager.into());
        self
    }
}

/// Cross-version reference to the workload a VPA observes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// Desired shape of a VPA created by this operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedVpaSpec {
    pub name: String,
    pub namespace: String,
    pub target_ref: TargetRef,
    pub update_mode: String,
}

impl ManagedVpaSpec {
    /// Observation-only VPA named after, and targeting, the workload
    pub fn for_workload(workload: &WorkloadRef) -> Self {
        Self {
            name: workload.name.clone(),
            namespace: workload.namespace.clone(),
            target_ref: TargetRef {
                api_version: workload.kind.api_version().to_string(),
                kind: workload.kind.as_str().to_string(),
                name: workload.name.clone(),
            },
            update_mode: UPDATE_MODE_OFF.to_string(),
        }
    }

    /// Full `VerticalPodAutoscaler` object, ready to be posted to the API server
    pub fn manifest(&self) -> serde_json::Value {
        json!({
            "apiVersion": VPA_API_VERSION,
            "kind": VPA_KIND,
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "labels": {
                    MANAGED_BY_LABEL: MANAGER_NAME,
                },
            },
            "spec": {
                "targetRef": {
                    "apiVersion": self.target_ref.api_version,
                    "kind": self.target_ref.kind,
                    "name": self.target_ref.name,
                },
                "updatePolicy": {
                    "updateMode": self.update_mode,
                },
            },
        })
    }
}

impl From<&WorkloadRef> for ManagedVpaSpec {
    fn from(workload: &WorkloadRef) -> Self {
        Self::for_workload(workload)
    }
}

/// Actions derived from one pair of catalog snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    /// Workloads with no VPA of the same name and namespace
    pub to_create: Vec<WorkloadRef>,
    /// VPAs with no matching workload that are not exempt
    pub to_delete: Vec<VpaRecord>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }

    /// VPA specs to create, in plan order
    pub fn create_specs(&self) -> impl Iterator<Item = ManagedVpaSpec> + '_ {
        self.to_create.iter().map(ManagedVpaSpec::for_workload)
    }
}
