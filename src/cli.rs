//! CLI definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::Parser;
use warden_core::{OrchestratorConfig, Result};

/// Warden - workload fleet control plane
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Discover, launch, monitor and heal a fleet of local workloads")]
#[command(
    long_about = "Warden scans a catalog of workload manifests, launches them in dependency order, polls their health endpoints and restarts, backs off or quarantines failing workloads. A REST API and WebSocket stream expose its state."
)]
pub struct Cli {
    /// Workload catalog directory
    #[arg(long, env = "WARDEN_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// API listen host
    #[arg(long, env = "ORCHESTRATOR_HOST")]
    pub host: Option<String>,

    /// API listen port
    #[arg(long, env = "ORCHESTRATOR_PORT")]
    pub port: Option<u16>,

    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Boot even when the dependency graph has a cycle
    #[arg(long, default_value_t = false)]
    pub allow_cyclic_boot: bool,
}

impl Cli {
    /// Defaults, overridden by the config file, overridden by flags and
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn load_config(&self) -> Result<OrchestratorConfig> {
        let config = match &self.config {
            Some(path) => OrchestratorConfig::from_file(path)?,
            None => OrchestratorConfig::default(),
        };
        Ok(self.apply(config))
    }

    /// Apply command-line overrides to `config`.
    #[must_use]
    pub fn apply(&self, mut config: OrchestratorConfig) -> OrchestratorConfig {
        if let Some(catalog) = &self.catalog {
            config.discovery.catalog_dir.clone_from(catalog);
        }
        if let Some(host) = &self.host {
            config.api.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if self.allow_cyclic_boot {
            config.launch.allow_cyclic_boot = true;
        }
        config
    }
}
