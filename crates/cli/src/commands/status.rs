//! Operator status and health queries

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use colored::Colorize;
use operator_lib::{CycleReport, CycleStatus, HealthResponse, ReadinessResponse};
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Result")]
    result: String,
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Last Check")]
    last_check: String,
}

#[derive(Serialize)]
struct HealthOutput {
    health: HealthResponse,
    readiness: ReadinessResponse,
}

/// Show the outcome of the operator's most recent cycles
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: CycleStatus = client.get("status").await?;

    match format {
        OutputFormat::Json => output::print_json(&status)?,
        OutputFormat::Table => {
            output::print_header("Operator Status");
            println!("Cycles run:           {}", status.cycles_run);
            let failures = status.consecutive_failures.to_string();
            println!(
                "Consecutive failures: {}",
                if status.consecutive_failures > 0 {
                    failures.red()
                } else {
                    failures.green()
                }
            );

            if let Some(error) = &status.last_error {
                let at = status
                    .last_error_at
                    .as_ref()
                    .map(output::format_timestamp)
                    .unwrap_or_else(|| "unknown time".to_string());
                output::print_error(&format!("Last failed cycle at {}: {}", at, error));
            }

            match &status.last_report {
                Some(report) => print_report(report),
                None => output::print_warning("No cycle has completed yet"),
            }
        }
    }

    Ok(())
}

fn print_report(report: &CycleReport) {
    output::print_header("Last Completed Cycle");
    println!("Started:   {}", output::format_timestamp(&report.started_at));
    println!("Duration:  {}", output::format_duration_ms(report.duration_ms));
    let by_kind: Vec<String> = report
        .workloads_by_kind
        .iter()
        .map(|(kind, count)| format!("{} {}", count, kind))
        .collect();
    if by_kind.is_empty() {
        println!("Workloads: {}", report.workloads_observed);
    } else {
        println!(
            "Workloads: {} ({})",
            report.workloads_observed,
            by_kind.join(", ")
        );
    }
    println!("VPAs:      {}", report.vpas_observed);
    if report.dry_run {
        println!("Mode:      {}", "dry run, nothing was applied".yellow());
    }

    let rows = action_rows(report);
    println!();
    output::print_table(&rows, "No VPAs created or deleted");

    if report.dry_run {
        output::print_info(&format!(
            "would create {}, would delete {}",
            report.created.len(),
            report.deleted.len()
        ));
    } else if report.failures.is_empty() {
        output::print_success(&format!(
            "{} created, {} deleted",
            report.created.len(),
            report.deleted.len()
        ));
    } else {
        output::print_warning(&format!(
            "{} created, {} deleted, {} failed; failed actions are retried next cycle",
            report.created.len(),
            report.deleted.len(),
            report.failures.len()
        ));
    }
}

fn action_rows(report: &CycleReport) -> Vec<ActionRow> {
    let outcome = if report.dry_run { "dry run" } else { "success" };
    let applied = |action: &str, a: &operator_lib::AppliedAction| ActionRow {
        action: output::color_action(action),
        namespace: a.namespace.clone(),
        name: a.name.clone(),
        kind: a.kind.clone(),
        result: output::color_status(outcome),
    };

    report
        .created
        .iter()
        .map(|a| applied("create", a))
        .chain(report.deleted.iter().map(|a| applied("delete", a)))
        .chain(report.failures.iter().map(|f| ActionRow {
            action: output::color_action(f.action.as_str()),
            namespace: f.namespace.clone(),
            name: f.name.clone(),
            kind: f.kind.clone(),
            result: format!("{}: {}", output::color_status("failed"), f.error),
        }))
        .collect()
}

/// Show liveness and readiness as reported by the operator's probes
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthResponse) = client.get_health("healthz").await?;
    let (_, readiness): (_, ReadinessResponse) = client.get_health("readyz").await?;

    match format {
        OutputFormat::Json => output::print_json(&HealthOutput { health, readiness })?,
        OutputFormat::Table => {
            output::print_header("Operator Health");
            println!(
                "Status: {}",
                output::color_status(health.status.as_str())
            );
            let ready = if readiness.ready { "ready" } else { "not ready" };
            match &readiness.reason {
                Some(reason) => println!("Ready:  {} ({})", output::color_status(ready), reason),
                None => println!("Ready:  {}", output::color_status(ready)),
            }
            println!();
            output::print_table(&component_rows(&health), "No components registered");
        }
    }

    Ok(())
}

fn component_rows(health: &HealthResponse) -> Vec<ComponentRow> {
    health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            component: name.clone(),
            status: output::color_status(component.status.as_str()),
            message: component.message.clone().unwrap_or_default(),
            last_check: output::format_timestamp(&component.last_check),
        })
        .collect()
}
