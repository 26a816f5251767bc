//! Graceful shutdown handling for the orchestrator.
//!
//! Maps SIGTERM/SIGINT to a single shutdown request, tracks the shutdown
//! phase and terminates every tracked workload process within a grace
//! window, killing whatever is still alive afterwards.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};
use warden_core::WorkloadStatus;

use crate::launch::StopSignal;
use crate::registry::Registry;

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownSignal {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Programmatic shutdown requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Shutdown progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    /// Normal operation, no shutdown initiated
    Running,
    /// Shutdown requested
    Initiating,
    /// Stopping the health monitor
    StoppingMonitor,
    /// Stopping the healing listener
    StoppingHealing,
    /// Terminating workload processes
    TerminatingProcesses,
    /// Cleanup complete
    Complete,
}

/// Statistics about the shutdown process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownStats {
    /// What triggered the shutdown
    pub signal: Option<ShutdownSignal>,
    /// Processes sent a terminate signal
    pub processes_signalled: usize,
    /// Processes that exited within the grace period
    pub exited_gracefully: usize,
    /// Processes killed after the grace period
    pub killed: usize,
    /// Total shutdown duration in milliseconds
    pub total_duration_ms: u64,
}

/// Shutdown coordinator for graceful system shutdown
#[derive(Debug)]
pub struct ShutdownCoordinator {
    phase: RwLock<ShutdownPhase>,
    shutdown_initiated: AtomicBool,
    signal: Mutex<Option<ShutdownSignal>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(grace_period: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            phase: RwLock::new(ShutdownPhase::Running),
            shutdown_initiated: AtomicBool::new(false),
            signal: Mutex::new(None),
            shutdown_tx,
            grace_period,
        }
    }

    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub async fn phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    pub(crate) async fn set_phase(&self, phase: ShutdownPhase) {
        debug!(phase = ?phase, "Shutdown phase");
        *self.phase.write().await = phase;
    }

    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Signal that started the shutdown, if any.
    #[must_use]
    pub fn signal(&self) -> Option<ShutdownSignal> {
        *self.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Request shutdown. Returns `false` for duplicate requests, which are
    /// ignored.
    pub async fn initiate_shutdown(&self, signal: ShutdownSignal) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(signal = %signal, "Shutdown already in progress, ignoring duplicate signal");
            return false;
        }

        info!(signal = %signal, "Initiating graceful shutdown");
        *self.signal.lock().unwrap_or_else(PoisonError::into_inner) = Some(signal);
        self.set_phase(ShutdownPhase::Initiating).await;

        if let Err(e) = self.shutdown_tx.send(signal) {
            // No subscribers is not an error
            debug!("No active subscribers for shutdown signal: {}", e);
        }
        true
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) -> ShutdownSignal {
        let mut receiver = self.subscribe();
        if let Some(signal) = self.signal() {
            return signal;
        }
        loop {
            match receiver.recv().await {
                Ok(signal) => return signal,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Some(signal) = self.signal() {
                        return signal;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return ShutdownSignal::Programmatic,
            }
        }
    }

    /// Terminate every tracked process, wait up to the grace period, then
    /// kill the stragglers.
    pub async fn stop_processes(&self, registry: &Registry) -> ShutdownStats {
        let start = Instant::now();
        let mut stats = ShutdownStats {
            signal: self.signal(),
            ..ShutdownStats::default()
        };

        let mut tracked = Vec::new();
        for name in registry.names().await {
            match registry.clear_process(&name).await {
                Ok(Some(process)) => tracked.push((name, process)),
                Ok(None) => {}
                Err(e) => warn!(workload = %name, error = %e, "Workload vanished during shutdown"),
            }
        }

        for (name, process) in &tracked {
            if let Err(e) = process.signal(StopSignal::Terminate) {
                warn!(workload = %name, error = %e, "Failed to send terminate");
            }
        }
        stats.processes_signalled = tracked.len();
        info!(
            processes = tracked.len(),
            grace_ms = self.grace_period.as_millis(),
            "Waiting for workload processes to exit"
        );

        let exits = join_all(
            tracked
                .iter()
                .map(|(_, process)| process.wait_for_exit(self.grace_period)),
        )
        .await;

        for ((name, process), exit) in tracked.iter().zip(exits) {
            if exit.is_some() {
                stats.exited_gracefully += 1;
            } else {
                warn!(workload = %name, "Process still running after grace period, killing");
                if let Err(e) = process.signal(StopSignal::Kill) {
                    error!(workload = %name, error = %e, "Failed to kill process");
                }
                stats.killed += 1;
            }
            if registry.status(name).await != Some(WorkloadStatus::Quarantined) {
                if let Err(e) = registry.update_status(name, WorkloadStatus::Stopped).await {
                    debug!(workload = %name, error = %e, "Could not mark workload stopped");
                }
            }
        }

        stats.total_duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            exited = stats.exited_gracefully,
            killed = stats.killed,
            duration_ms = stats.total_duration_ms,
            "Workload processes stopped"
        );
        stats
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT)
pub fn install_signal_handlers(
    coordinator: Arc<ShutdownCoordinator>,
) -> tokio::task::JoinHandle<()> {
    info!("Installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigterm).await;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigint).await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            // Only Ctrl+C is available off Unix
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }

            info!("Received Ctrl+C");
            coordinator.initiate_shutdown(ShutdownSignal::Sigint).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcess;
    use warden_core::{Result, WorkloadMetadata};

    fn coordinator() -> ShutdownCoordinator {
        ShutdownCoordinator::new(Duration::from_millis(30))
    }

    #[tokio::test]
    async fn test_coordinator_creation() {
        let coordinator = coordinator();
        assert_eq!(coordinator.phase().await, ShutdownPhase::Running);
        assert!(!coordinator.is_shutdown_initiated());
        assert!(coordinator.signal().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_shutdown_ignored() {
        let coordinator = coordinator();

        assert!(coordinator.initiate_shutdown(ShutdownSignal::Programmatic).await);
        assert!(!coordinator.initiate_shutdown(ShutdownSignal::Sigterm).await);

        assert_eq!(coordinator.signal(), Some(ShutdownSignal::Programmatic));
        assert_eq!(coordinator.phase().await, ShutdownPhase::Initiating);
    }

    #[tokio::test]
    async fn test_subscribe_to_shutdown() {
        let coordinator = coordinator();
        let mut receiver = coordinator.subscribe();

        coordinator.initiate_shutdown(ShutdownSignal::Sigint).await;

        assert_eq!(receiver.recv().await.ok(), Some(ShutdownSignal::Sigint));
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_before_and_after_request() {
        let coordinator = Arc::new(coordinator());
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for_shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        coordinator.initiate_shutdown(ShutdownSignal::Sigterm).await;

        assert_eq!(waiter.await.ok(), Some(ShutdownSignal::Sigterm));
        assert_eq!(coordinator.wait_for_shutdown().await, ShutdownSignal::Sigterm);
    }

    #[tokio::test]
    async fn given_tracked_processes_when_stopped_then_stubborn_ones_are_killed() -> Result<()> {
        // GIVEN: One cooperative and one stubborn process
        let registry = Registry::default();
        registry.register(WorkloadMetadata::new("polite", 4000)).await?;
        registry.register(WorkloadMetadata::new("stubborn", 4001)).await?;
        registry.register(WorkloadMetadata::new("idle", 4002)).await?;
        let polite = FakeProcess::new(1);
        let stubborn = FakeProcess::new(2);
        stubborn.ignore_terminate();
        registry.update_process("polite", polite.clone()).await?;
        registry.update_process("stubborn", stubborn.clone()).await?;
        registry.update_status("polite", WorkloadStatus::Healthy).await?;

        // WHEN: Processes are stopped
        let stats = coordinator().stop_processes(&registry).await;

        // THEN: Both were signalled, the stubborn one was killed
        assert_eq!(stats.processes_signalled, 2);
        assert_eq!(stats.exited_gracefully, 1);
        assert_eq!(stats.killed, 1);
        assert_eq!(polite.signals(), vec![StopSignal::Terminate]);
        assert_eq!(stubborn.signals(), vec![StopSignal::Terminate, StopSignal::Kill]);
        assert_eq!(registry.status("polite").await, Some(WorkloadStatus::Stopped));
        assert!(registry.process("stubborn").await.is_none());
        Ok(())
    }

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(format!("{}", ShutdownSignal::Sigterm), "SIGTERM");
        assert_eq!(format!("{}", ShutdownSignal::Sigint), "SIGINT");
        assert_eq!(format!("{}", ShutdownSignal::Programmatic), "PROGRAMMATIC");
    }
}
