//! VPA operator CLI
//!
//! Previews the reconciliation plan against a live cluster and queries a
//! running operator for its health and last cycle.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{plan, status};
use operator_lib::{ExemptionRules, ManagedByExemption, NamePrefixExemption};

/// VPA operator CLI
#[derive(Parser)]
#[command(name = "vpactl")]
#[command(author, version, about = "CLI for the VPA operator", long_about = None)]
pub struct Cli {
    /// Operator API endpoint (can also be set via VPACTL_API_URL env var)
    #[arg(long, env = "VPACTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Kubeconfig file, or a list of files joined by the path separator
    /// (defaults to in-cluster config, then KUBECONFIG / ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the VPAs the operator would create and delete, without applying anything
    Plan {
        /// Only show actions in this namespace
        #[arg(long, short)]
        namespace: Option<String>,

        /// Extra VPA name prefixes that are never deleted ("goldilocks" always is)
        #[arg(long = "exempt-prefix")]
        exempt_prefixes: Vec<String>,

        /// managed-by label values whose VPAs are never deleted
        #[arg(long = "exempt-manager")]
        exempt_managers: Vec<String>,
    },

    /// Show the outcome of the operator's last reconciliation cycle
    Status,

    /// Show operator health and readiness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            namespace,
            exempt_prefixes,
            exempt_managers,
        } => {
            let exemptions = ExemptionRules::new(
                NamePrefixExemption::new(exempt_prefixes),
                ManagedByExemption::new(exempt_managers),
            );
            plan::show_plan(
                cli.kubeconfig.as_deref(),
                namespace.as_deref(),
                exemptions,
                cli.format,
                cli.verbose,
            )
            .await?;
        }
        Commands::Status => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::show_status(&client, cli.format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
