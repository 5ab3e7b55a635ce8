//! Reconciliation planning
//!
//! Pure decision logic: given a snapshot of workloads and a snapshot of
//! VPAs, compute which VPAs have to be created and which have to be deleted.
//!
//! Creation and deletion deliberately use different match keys. A workload
//! is considered covered by any VPA with the same name and namespace,
//! whatever it targets. A VPA is only kept when a workload with the same
//! name, namespace *and* kind exists. Deleting is the destructive side, so
//! both keys are exposed ([`matches_for_create`], [`matches_for_delete`])
//! and tested on their own.

use crate::models::{ReconciliationPlan, VpaRecord, WorkloadKind, WorkloadRef};
use std::collections::HashSet;

/// Name prefix of VPAs owned by Goldilocks
pub const DEFAULT_EXEMPT_PREFIX: &str = "goldilocks";

/// Does `vpa` suppress creating a VPA for `workload`? (name + namespace)
pub fn matches_for_create(workload: &WorkloadRef, vpa: &VpaRecord) -> bool {
    workload.name == vpa.name && workload.namespace == vpa.namespace
}

/// Does `workload` keep `vpa` alive? (name + namespace + target kind)
pub fn matches_for_delete(workload: &WorkloadRef, vpa: &VpaRecord) -> bool {
    matches_for_create(workload, vpa) && workload.kind.as_str() == vpa.target_kind
}

/// Decides whether a VPA belongs to another controller and must never be deleted
pub trait ExemptionPolicy: Send + Sync {
    fn is_exempt(&self, vpa: &VpaRecord) -> bool;
}

/// Exempts VPAs whose name starts with one of a set of prefixes.
///
/// [`DEFAULT_EXEMPT_PREFIX`] is always part of the set; configured
/// prefixes extend it and can never remove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePrefixExemption {
    prefixes: Vec<String>,
}

impl NamePrefixExemption {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes = vec![DEFAULT_EXEMPT_PREFIX.to_string()];
        for prefix in extra.into_iter().map(Into::into) {
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for NamePrefixExemption {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl ExemptionPolicy for NamePrefixExemption {
    fn is_exempt(&self, vpa: &VpaRecord) -> bool {
        // An empty prefix would exempt everything; ignore it.
        self.prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && vpa.name.starts_with(prefix.as_str()))
    }
}

/// Exempts VPAs labelled `app.kubernetes.io/managed-by` with a foreign controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedByExemption {
    managers: Vec<String>,
}

impl ManagedByExemption {
    pub fn new<I, S>(managers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            managers: managers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn managers(&self) -> &[String] {
        &self.managers
    }
}

impl ExemptionPolicy for ManagedByExemption {
    fn is_exempt(&self, vpa: &VpaRecord) -> bool {
        vpa.managed_by
            .as_deref()
            .map(|manager| self.managers.iter().any(|m| m == manager))
            .unwrap_or(false)
    }
}

/// Exemption rules applied by the operator: a VPA is exempt if any rule says so
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExemptionRules {
    pub prefixes: NamePrefixExemption,
    pub managed_by: ManagedByExemption,
}

impl ExemptionRules {
    pub fn new(prefixes: NamePrefixExemption, managed_by: ManagedByExemption) -> Self {
        Self {
            prefixes,
            managed_by,
        }
    }
}

impl ExemptionPolicy for ExemptionRules {
    fn is_exempt(&self, vpa: &VpaRecord) -> bool {
        self.prefixes.is_exempt(vpa) || self.managed_by.is_exempt(vpa)
    }
}

/// Computes reconciliation plans from catalog snapshots
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    exemptions: ExemptionRules,
}

impl Reconciler {
    pub fn new(exemptions: ExemptionRules) -> Self {
        Self { exemptions }
    }

    pub fn exemptions(&self) -> &ExemptionRules {
        &self.exemptions
    }

    /// Derive the create and delete actions for one snapshot pair.
    ///
    /// `to_create` keeps the order of `workloads`, `to_delete` the order of
    /// `vpas`. Never fails: odd values such as empty namespaces are compared
    /// like any other string.
    pub fn plan(&self, workloads: &[WorkloadRef], vpas: &[VpaRecord]) -> ReconciliationPlan {
        let index = SnapshotIndex::build(workloads, vpas);

        let to_create = workloads
            .iter()
            .filter(|w| !index.has_vpa_named(&w.namespace, &w.name))
            .cloned()
            .collect();

        let to_delete = vpas
            .iter()
            .filter(|v| !index.has_workload_for(v) && !self.exemptions.is_exempt(v))
            .cloned()
            .collect();

        ReconciliationPlan {
            to_create,
            to_delete,
        }
    }
}

/// Hashed lookups over one snapshot pair, keyed the same way as the match functions
struct SnapshotIndex<'a> {
    /// (namespace, name) of every VPA
    vpas: HashSet<(&'a str, &'a str)>,
    /// (kind, namespace, name) of every workload
    workloads: HashSet<(WorkloadKind, &'a str, &'a str)>,
}

impl<'a> SnapshotIndex<'a> {
    fn build(workloads: &'a [WorkloadRef], vpas: &'a [VpaRecord]) -> Self {
        Self {
            vpas: vpas
                .iter()
                .map(|v| (v.namespace.as_str(), v.name.as_str()))
                .collect(),
            workloads: workloads
                .iter()
                .map(|w| (w.kind, w.namespace.as_str(), w.name.as_str()))
                .collect(),
        }
    }

    fn has_vpa_named(&self, namespace: &str, name: &str) -> bool {
        self.vpas.contains(&(namespace, name))
    }

    /// Deployments first, then StatefulSets, then DaemonSets; first hit wins.
    fn has_workload_for(&self, vpa: &VpaRecord) -> bool {
        WorkloadKind::ALL.iter().any(|kind| {
            kind.as_str() == vpa.target_kind
                && self
                    .workloads
                    .contains(&(*kind, vpa.namespace.as_str(), vpa.name.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(name: &str, namespace: &str) -> WorkloadRef {
        WorkloadRef::new(WorkloadKind::Deployment, name, namespace)
    }

    fn statefulset(name: &str, namespace: &str) -> WorkloadRef {
        WorkloadRef::new(WorkloadKind::StatefulSet, name, namespace)
    }

    fn daemonset(name: &str, namespace: &str) -> WorkloadRef {
        WorkloadRef::new(WorkloadKind::DaemonSet, name, namespace)
    }

    fn vpa(name: &str, namespace: &str, kind: &str) -> VpaRecord {
        VpaRecord::new(name, namespace, kind, name)
    }

    /// Reference plan computed pairwise with the public match functions
    fn brute_force_plan(
        exemptions: &ExemptionRules,
        workloads: &[WorkloadRef],
        vpas: &[VpaRecord],
    ) -> ReconciliationPlan {
        ReconciliationPlan {
            to_create: workloads
                .iter()
                .filter(|w| !vpas.iter().any(|v| matches_for_create(w, v)))
                .cloned()
                .collect(),
            to_delete: vpas
                .iter()
                .filter(|v| {
                    !workloads.iter().any(|w| matches_for_delete(w, v))
                        && !exemptions.is_exempt(v)
                })
                .cloned()
                .collect(),
        }
    }

    #[test]
    fn test_empty_input() {
        let plan = Reconciler::default().plan(&[], &[]);
        assert!(plan.to_create.is_empty());
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_end_to_end_scenario() {
        let workloads = vec![deployment("web", "default"), statefulset("db", "default")];
        let vpas = vec![vpa("old", "default", "Deployment")];

        let plan = Reconciler::default().plan(&workloads, &vpas);

        assert_eq!(plan.to_create, workloads);
        let specs: Vec<_> = plan.create_specs().collect();
        assert_eq!(specs[0].name, "web");
        assert_eq!(specs[0].target_ref.kind, "Deployment");
        assert_eq!(specs[1].name, "db");
        assert_eq!(specs[1].target_ref.kind, "StatefulSet");
        assert_eq!(plan.to_delete, vpas);
    }

    #[test]
    fn test_kind_sensitive_deletion() {
        let workloads = vec![deployment("api", "ns")];
        let vpas = vec![vpa("api", "ns", "StatefulSet")];

        let plan = Reconciler::default().plan(&workloads, &vpas);

        assert_eq!(plan.to_delete, vpas);
    }

    #[test]
    fn test_kind_insensitive_creation() {
        let workloads = vec![deployment("api", "ns")];
        let vpas = vec![vpa("api", "ns", "StatefulSet")];

        let plan = Reconciler::default().plan(&workloads, &vpas);

        assert!(plan.to_create.is_empty());
    }

    #[test]
    fn test_match_functions_asymmetry() {
        let w = deployment("api", "ns");
        let same_kind = vpa("api", "ns", "Deployment");
        let other_kind = vpa("api", "ns", "StatefulSet");
        let other_ns = vpa("api", "other", "Deployment");

        assert!(matches_for_create(&w, &same_kind));
        assert!(matches_for_create(&w, &other_kind));
        assert!(!matches_for_create(&w, &other_ns));

        assert!(matches_for_delete(&w, &same_kind));
        assert!(!matches_for_delete(&w, &other_kind));
        assert!(!matches_for_delete(&w, &other_ns));
    }

    #[test]
    fn test_matched_vpas_are_kept() {
        let workloads = vec![
            deployment("web", "default"),
            statefulset("db", "data"),
            daemonset("agent", "kube-system"),
        ];
        let vpas = vec![
            vpa("web", "default", "Deployment"),
            vpa("db", "data", "StatefulSet"),
            vpa("agent", "kube-system", "DaemonSet"),
        ];

        let plan = Reconciler::default().plan(&workloads, &vpas);

        assert!(plan.is_empty());
    }

    #[test]
    fn test_goldilocks_vpas_never_deleted() {
        let vpas = vec![
            vpa("goldilocks-web", "default", "Deployment"),
            vpa("goldilocks", "other", ""),
            vpa("web-goldilocks", "default", "Deployment"),
        ];

        let plan = Reconciler::default().plan(&[], &vpas);

        assert_eq!(plan.to_delete, vec![vpa("web-goldilocks", "default", "Deployment")]);
    }

    #[test]
    fn test_exemption_holds_regardless_of_workloads() {
        let vpas = vec![vpa("goldilocks-api", "ns", "StatefulSet")];
        let workload_sets = vec![
            vec![],
            vec![deployment("goldilocks-api", "ns")],
            vec![statefulset("goldilocks-api", "elsewhere")],
        ];

        for workloads in workload_sets {
            let plan = Reconciler::default().plan(&workloads, &vpas);
            assert!(plan.to_delete.is_empty());
        }
    }

    #[test]
    fn test_no_duplicate_creation() {
        let workloads = vec![deployment("web", "default"), deployment("api", "default")];
        let vpas = vec![vpa("web", "default", "Deployment")];

        let plan = Reconciler::default().plan(&workloads, &vpas);

        assert_eq!(plan.to_create, vec![deployment("api", "default")]);
    }

    #[test]
    fn test_namespace_is_part_of_both_keys() {
        let workloads = vec![deployment("web", "team-a")];
        let vpas = vec![vpa("web", "team-b", "Deployment")];

        let plan = Reconciler::default().plan(&workloads, &vpas);

        assert_eq!(plan.to_create, workloads);
        assert_eq!(plan.to_delete, vpas);
    }

    #[test]
    fn test_vpa_without_target_kind_is_deleted() {
        let workloads = vec![deployment("web", "default")];
        let vpas = vec![vpa("web", "default", "")];

        let plan = Reconciler::default().plan(&workloads, &vpas);

        assert!(plan.to_create.is_empty());
        assert_eq!(plan.to_delete, vpas);
    }

    #[test]
    fn test_empty_namespace_is_ordinary_value() {
        let workloads = vec![deployment("web", "")];
        let vpas = vec![vpa("web", "", "Deployment"), vpa("cache", "", "Deployment")];

        let plan = Reconciler::default().plan(&workloads, &vpas);

        assert!(plan.to_create.is_empty());
        assert_eq!(plan.to_delete, vec![vpa("cache", "", "Deployment")]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let workloads = vec![
            daemonset("agent", "kube-system"),
            deployment("web", "default"),
            statefulset("db", "default"),
        ];
        let vpas = vec![
            vpa("stale-b", "default", "Deployment"),
            vpa("stale-a", "default", "DaemonSet"),
        ];

        let reconciler = Reconciler::default();
        let first = reconciler.plan(&workloads, &vpas);
        let second = reconciler.plan(&workloads, &vpas);

        assert_eq!(first, second);
        assert_eq!(first.to_create, workloads);
        assert_eq!(first.to_delete, vpas);
    }

    #[test]
    fn test_index_agrees_with_match_functions() {
        let workloads = vec![
            deployment("api", "ns"),
            statefulset("api", "ns"),
            daemonset("log", "ns"),
            deployment("web", ""),
            statefulset("queue", "jobs"),
        ];
        let vpas = vec![
            vpa("api", "ns", "StatefulSet"),
            vpa("log", "ns", "Deployment"),
            vpa("web", "", "Deployment"),
            vpa("goldilocks-queue", "jobs", "StatefulSet"),
            vpa("queue", "jobs", "DaemonSet"),
            vpa("gone", "ns", "Deployment"),
        ];

        let reconciler = Reconciler::default();
        let plan = reconciler.plan(&workloads, &vpas);

        assert_eq!(plan, brute_force_plan(reconciler.exemptions(), &workloads, &vpas));
    }

    #[test]
    fn test_managed_by_exemption() {
        let rules = ExemptionRules::new(
            NamePrefixExemption::default(),
            ManagedByExemption::new(["kubecost"]),
        );
        let vpas = vec![
            vpa("web", "default", "Deployment").with_managed_by("kubecost"),
            vpa("api", "default", "Deployment").with_managed_by("vpa-operator"),
            vpa("db", "default", "StatefulSet"),
        ];

        let plan = Reconciler::new(rules).plan(&[], &vpas);

        let deleted: Vec<&str> = plan.to_delete.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(deleted, vec!["api", "db"]);
    }

    #[test]
    fn test_custom_prefixes_extend_default() {
        let rules = ExemptionRules::new(
            NamePrefixExemption::new(["keep-", ""]),
            ManagedByExemption::default(),
        );
        let vpas = vec![
            vpa("keep-me", "ns", "Deployment"),
            vpa("goldilocks-x", "ns", "Deployment"),
            vpa("orphan", "ns", "Deployment"),
        ];

        let plan = Reconciler::new(rules).plan(&[], &vpas);

        assert_eq!(plan.to_delete, vec![vpa("orphan", "ns", "Deployment")]);
    }

    #[test]
    fn test_default_prefix_cannot_be_configured_away() {
        let rules = NamePrefixExemption::new(["keep-", "goldilocks", "keep-"]);

        assert_eq!(rules.prefixes(), ["goldilocks", "keep-"]);
        assert_eq!(NamePrefixExemption::default().prefixes(), ["goldilocks"]);
        assert!(rules.is_exempt(&vpa("goldilocks-web", "ns", "Deployment")));
    }

    #[test]
    fn test_plan_applied_reaches_fixed_point() {
        let workloads = vec![
            deployment("web", "default"),
            statefulset("db", "default"),
            daemonset("agent", "kube-system"),
        ];
        let mut vpas = vec![
            vpa("old", "default", "Deployment"),
            vpa("goldilocks-web", "default", "Deployment"),
        ];

        let reconciler = Reconciler::default();
        let plan = reconciler.plan(&workloads, &vpas);
        apply(&plan, &mut vpas);

        assert!(reconciler.plan(&workloads, &vpas).is_empty());
    }

    #[test]
    fn test_kind_mismatch_converges_over_two_cycles() {
        let workloads = vec![statefulset("db", "default")];
        let mut vpas = vec![vpa("db", "default", "Deployment")];
        let reconciler = Reconciler::default();

        // The stale VPA hides the workload from the create side until it is gone.
        let first = reconciler.plan(&workloads, &vpas);
        assert!(first.to_create.is_empty());
        assert_eq!(first.to_delete.len(), 1);
        apply(&first, &mut vpas);

        let second = reconciler.plan(&workloads, &vpas);
        assert_eq!(second.to_create, workloads);
        assert!(second.to_delete.is_empty());
        apply(&second, &mut vpas);

        assert!(reconciler.plan(&workloads, &vpas).is_empty());
        assert_eq!(vpas, vec![vpa("db", "default", "StatefulSet")]);
    }

    fn apply(plan: &ReconciliationPlan, vpas: &mut Vec<VpaRecord>) {
        vpas.retain(|v| !plan.to_delete.contains(v));
        for spec in plan.create_specs() {
            vpas.push(VpaRecord::new(
                spec.name,
                spec.namespace,
                spec.target_ref.kind,
                spec.target_ref.name,
            ));
        }
    }
}
