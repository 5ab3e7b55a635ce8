//! Operator configuration

use anyhow::{ensure, Context, Result};
use operator_lib::{ExemptionRules, ManagedByExemption, NamePrefixExemption, MANAGER_NAME};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix, e.g. `VPA_OPERATOR_INTERVAL_SECS`
const ENV_PREFIX: &str = "VPA_OPERATOR";

/// Operator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Name reported in structured logs
    #[serde(default = "default_operator_name")]
    pub operator_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between reconciliation cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Extra name prefixes whose VPAs are never deleted, on top of the
    /// always-exempt `goldilocks`
    #[serde(default)]
    pub exempt_prefixes: Vec<String>,

    /// VPAs labelled managed-by one of these are never deleted
    #[serde(default)]
    pub exempt_managers: Vec<String>,

    /// Log planned actions without applying them
    #[serde(default)]
    pub dry_run: bool,

    /// Explicit kubeconfig, or a path-separator list of them; in-cluster config is used when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Consecutive failed cycles before /healthz reports unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_operator_name() -> String {
    MANAGER_NAME.to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    3
}

impl OperatorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("exempt_prefixes")
                    .with_list_parse_key("exempt_managers"),
            )
            .build()?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already assembled configuration
    pub fn from_config(config: config::Config) -> Result<Self> {
        let parsed: Self = config
            .try_deserialize()
            .context("Invalid operator configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.interval_secs > 0, "interval_secs must be greater than zero");
        ensure!(
            self.failure_threshold > 0,
            "failure_threshold must be greater than zero"
        );
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Exemption rules for the reconciler
    pub fn exemptions(&self) -> ExemptionRules {
        ExemptionRules::new(
            NamePrefixExemption::new(self.exempt_prefixes.iter().map(|p| p.trim().to_string())),
            ManagedByExemption::new(self.exempt_managers.iter().map(|m| m.trim().to_string())),
        )
    }
}
