//! Reconciliation plan preview

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use colored::Colorize;
use operator_lib::{
    cluster::{connect, KubeVpaCatalog, KubeWorkloadCatalog},
    matches_for_delete, ExemptionPolicy, ExemptionRules, Reconciler, ReconciliationPlan, Snapshot,
    VpaRecord, WorkloadKind, WorkloadRef,
};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct PlanRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    workloads_observed: usize,
    vpas_observed: usize,
    to_create: &'a [WorkloadRef],
    to_delete: &'a [VpaRecord],
    kept_by_exemption: &'a [VpaRecord],
}

/// Fetch a live snapshot and print what one cycle would do, without applying it
pub async fn show_plan(
    kubeconfig: Option<&str>,
    namespace: Option<&str>,
    exemptions: ExemptionRules,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let client = connect(kubeconfig.map(Path::new))
        .await
        .context("Failed to connect to kubernetes cluster")?;

    let snapshot = Snapshot::take(
        &KubeWorkloadCatalog::new(client.clone()),
        &KubeVpaCatalog::new(client),
    )
    .await?;
    let snapshot = scope_to_namespace(snapshot, namespace);

    let reconciler = Reconciler::new(exemptions);
    let plan = reconciler.plan(&snapshot.workloads, &snapshot.vpas);
    let kept = kept_by_exemption(&snapshot, &reconciler);

    match format {
        OutputFormat::Json => output::print_json(&PlanOutput {
            namespace,
            workloads_observed: snapshot.workloads.len(),
            vpas_observed: snapshot.vpas.len(),
            to_create: &plan.to_create,
            to_delete: &plan.to_delete,
            kept_by_exemption: &kept,
        })?,
        OutputFormat::Table => {
            output::print_header("Reconciliation Plan");
            if let Some(ns) = namespace {
                println!("Namespace: {}", ns.cyan());
            }

            if verbose {
                for kind in WorkloadKind::ALL {
                    output::print_info(&format!(
                        "{} {}(s) observed",
                        snapshot.count_of(kind),
                        kind
                    ));
                }
                output::print_info(&format!("{} VPA(s) observed", snapshot.vpas.len()));
            }

            if plan.is_empty() {
                output::print_success("VPAs are in sync with workloads, nothing to do");
            } else {
                let rows: Vec<PlanRow> = plan_rows(&plan)
                    .into_iter()
                    .map(|row| PlanRow {
                        action: output::color_action(&row.action),
                        ..row
                    })
                    .collect();
                output::print_table(&rows, "No actions planned");
                println!(
                    "\n{} to create, {} to delete",
                    plan.to_create.len().to_string().green(),
                    plan.to_delete.len().to_string().red()
                );
            }

            if !kept.is_empty() {
                output::print_warning(&format!(
                    "{} VPA(s) without a workload kept by exemption rules",
                    kept.len()
                ));
                if verbose {
                    let rows: Vec<PlanRow> = kept
                        .iter()
                        .map(|vpa| PlanRow {
                            action: "keep".to_string(),
                            namespace: vpa.namespace.clone(),
                            name: vpa.name.clone(),
                            kind: vpa.target_kind.clone(),
                        })
                        .collect();
                    output::print_table(&rows, "");
                }
            }
        }
    }

    Ok(())
}

/// Restrict a snapshot to one namespace. Match keys always include the
/// namespace, so the scoped plan equals the cluster-wide plan filtered.
fn scope_to_namespace(snapshot: Snapshot, namespace: Option<&str>) -> Snapshot {
    let Some(ns) = namespace else {
        return snapshot;
    };

    Snapshot {
        workloads: snapshot
            .workloads
            .into_iter()
            .filter(|w| w.namespace == ns)
            .collect(),
        vpas: snapshot.vpas.into_iter().filter(|v| v.namespace == ns).collect(),
    }
}

/// Orphaned VPAs that only survive because an exemption rule covers them
fn kept_by_exemption(snapshot: &Snapshot, reconciler: &Reconciler) -> Vec<VpaRecord> {
    snapshot
        .vpas
        .iter()
        .filter(|vpa| reconciler.exemptions().is_exempt(vpa))
        .filter(|vpa| !snapshot.workloads.iter().any(|w| matches_for_delete(w, vpa)))
        .cloned()
        .collect()
}

/// Creates first, then deletes, each sorted by namespace and name
fn plan_rows(plan: &ReconciliationPlan) -> Vec<PlanRow> {
    let mut creates: Vec<PlanRow> = plan
        .to_create
        .iter()
        .map(|w| PlanRow {
            action: "create".to_string(),
            namespace: w.namespace.clone(),
            name: w.name.clone(),
            kind: w.kind.to_string(),
        })
        .collect();
    let mut deletes: Vec<PlanRow> = plan
        .to_delete
        .iter()
        .map(|v| PlanRow {
            action: "delete".to_string(),
            namespace: v.namespace.clone(),
            name: v.name.clone(),
            kind: v.target_kind.clone(),
        })
        .collect();

    let by_location =
        |a: &PlanRow, b: &PlanRow| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name));
    creates.sort_by(by_location);
    deletes.sort_by(by_location);
    creates.extend(deletes);
    creates
}
