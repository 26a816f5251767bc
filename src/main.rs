//! # Warden
//!
//! Entry point of the control plane.
//!
//! ## Boot sequence
//!
//! 1. **Configuration** - defaults, then the TOML file, then flags and env
//! 2. **Discovery** - scan the catalog and build the dependency graph
//! 3. **Launch** - start workloads phase by phase
//! 4. **Monitoring and healing** - poll health, remediate failures
//! 5. **API** - serve REST and the event stream, then mark ready
//!
//! ## Shutdown
//!
//! SIGTERM/SIGINT stop the API, the monitor and the healing listener, then
//! terminate every workload within the configured grace period.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use orchestrator::{MasterOrchestrator, ShutdownSignal, install_signal_handlers};
use warden::cli::Cli;
use warden::init_tracing;
use warden_web::{AppState, run_server};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    let config = cli.load_config().context("Failed to load configuration")?;
    init_tracing(&config.log_level);

    info!(
        catalog = %config.discovery.catalog_dir.display(),
        api = %config.api.bind_address(),
        "Warden starting"
    );

    let orchestrator = Arc::new(
        MasterOrchestrator::with_defaults(config.clone())
            .context("Failed to build the orchestrator")?,
    );
    let coordinator = orchestrator.shutdown_coordinator();
    let signals = install_signal_handlers(Arc::clone(&coordinator));

    let launch = match orchestrator.boot().await {
        Ok(launch) => launch,
        Err(e) => {
            error!(error = %e, "Boot failed");
            orchestrator
                .graceful_shutdown(ShutdownSignal::Programmatic)
                .await;
            signals.abort();
            return Err(e).context("Boot failed");
        }
    };
    if launch.success {
        info!(
            launched = launch.launched.len(),
            duration_ms = launch.duration_ms,
            "All workloads launched"
        );
    } else {
        warn!(
            launched = launch.launched.len(),
            failed = ?launch.failed,
            skipped = ?launch.skipped,
            "Some workloads did not launch"
        );
    }

    let api_shutdown = {
        let coordinator = Arc::clone(&coordinator);
        async move {
            coordinator.wait_for_shutdown().await;
        }
    };
    let mut server = tokio::spawn(run_server(
        AppState::new(Arc::clone(&orchestrator), config.api.clone()),
        api_shutdown,
    ));

    orchestrator.mark_ready();
    info!(
        startup_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Warden is running. Press Ctrl+C to stop."
    );

    let server_result = tokio::select! {
        signal = coordinator.wait_for_shutdown() => {
            info!(signal = %signal, "Shutdown requested");
            None
        }
        result = &mut server => Some(result),
    };

    let stats = orchestrator
        .graceful_shutdown(ShutdownSignal::Programmatic)
        .await;
    signals.abort();

    let server_result = match server_result {
        Some(result) => result,
        None => server.await,
    };
    info!(
        signalled = stats.processes_signalled,
        exited = stats.exited_gracefully,
        killed = stats.killed,
        duration_ms = stats.total_duration_ms,
        "Warden stopped"
    );

    match server_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e).context("Control-plane API failed"),
        Err(e) => Err(e).context("Control-plane API task panicked"),
    }
}
