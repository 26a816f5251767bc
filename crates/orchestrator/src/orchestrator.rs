//! Master orchestrator.
//!
//! Builds every component once, wires them together through `Arc` handles
//! and drives the boot sequence: discover, build and validate the graph,
//! launch, monitor, heal. Also the entry point for everything the API does.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use warden_core::{
    Error, HealingEvent, OrchestratorConfig, Result, ValidationResult, WorkloadStatus,
};
use warden_events::EventBus;

use crate::dag::{DependencyResolver, GraphSnapshot};
use crate::discovery::{DiscoveryReport, WorkloadDiscovery};
use crate::healing::{CircuitSnapshot, HealingStats, SelfHealingEngine};
use crate::health::{HealthChecker, HealthMonitor, HealthProbe, HealthReporter, SystemHealth};
use crate::launch::{ChildProcessSpawner, LaunchResult, PhasedLauncher, ProcessSpawner};
use crate::registry::{Registry, RegistryEntry};
use crate::shutdown::{ShutdownCoordinator, ShutdownPhase, ShutdownSignal, ShutdownStats};

/// Healing events included in a status snapshot.
pub const STATUS_HEALING_EVENTS: usize = 20;

/// Lifecycle state of the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Initializing,
    Discovering,
    Launching,
    Monitoring,
    Healing,
    Ready,
    ShuttingDown,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initializing => "initializing",
            Self::Discovering => "discovering",
            Self::Launching => "launching",
            Self::Monitoring => "monitoring",
            Self::Healing => "healing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(label)
    }
}

/// Full status snapshot served by the API.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub health: SystemHealth,
    pub launch_result: Option<LaunchResult>,
    pub discovery: Option<DiscoveryReport>,
    pub recent_healing: Vec<HealingEvent>,
    pub start_time: DateTime<Utc>,
    pub uptime_ms: u64,
}

pub struct MasterOrchestrator {
    config: OrchestratorConfig,
    registry: Arc<Registry>,
    discovery: WorkloadDiscovery,
    resolver: Arc<DependencyResolver>,
    launcher: Arc<PhasedLauncher>,
    monitor: Arc<HealthMonitor>,
    reporter: HealthReporter,
    healing: Arc<SelfHealingEngine>,
    bus: EventBus,
    shutdown: Arc<ShutdownCoordinator>,
    shutdown_started: AtomicBool,
    state: RwLock<OrchestratorState>,
    launch_result: RwLock<Option<LaunchResult>>,
    discovery_report: RwLock<Option<DiscoveryReport>>,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl fmt::Debug for MasterOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterOrchestrator")
            .field("state", &self.state())
            .field("catalog", &self.discovery.catalog_dir())
            .finish_non_exhaustive()
    }
}

impl MasterOrchestrator {
    /// Wire every component around the given process spawner and probe.
    pub fn new(
        config: OrchestratorConfig,
        spawner: Arc<dyn ProcessSpawner>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let registry = Arc::new(Registry::new(config.health.history_limit));
        let bus = EventBus::new(config.events);
        let resolver = Arc::new(DependencyResolver::new());
        let launcher = Arc::new(PhasedLauncher::new(
            Arc::clone(&registry),
            Arc::clone(&resolver),
            spawner,
            Arc::clone(&probe),
            bus.clone(),
            config.launch.clone(),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            bus.clone(),
            probe,
            config.health.clone(),
        ));
        let healing = Arc::new(SelfHealingEngine::new(
            Arc::clone(&registry),
            Arc::clone(&launcher),
            bus.clone(),
            config.healing.clone(),
        ));

        Self {
            discovery: WorkloadDiscovery::new(config.discovery.clone()),
            reporter: HealthReporter::new(Arc::clone(&registry)),
            shutdown: Arc::new(ShutdownCoordinator::new(config.shutdown.grace_period())),
            shutdown_started: AtomicBool::new(false),
            state: RwLock::new(OrchestratorState::Initializing),
            launch_result: RwLock::new(None),
            discovery_report: RwLock::new(None),
            start_time: Utc::now(),
            started: Instant::now(),
            config,
            registry,
            resolver,
            launcher,
            monitor,
            healing,
            bus,
        }
    }

    /// Real processes and HTTP health probes.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_defaults(config: OrchestratorConfig) -> Result<Self> {
        let checker = HealthChecker::new(&config.health)?;
        Ok(Self::new(config, Arc::new(ChildProcessSpawner), Arc::new(checker)))
    }

    /// Discover workloads, build the dependency graph and validate it.
    ///
    /// # Errors
    ///
    /// - the catalog directory cannot be read
    /// - `InvalidGraph` if the graph has a cycle and `allow_cyclic_boot` is off
    pub async fn initialize(&self) -> Result<DiscoveryReport> {
        self.set_state(OrchestratorState::Discovering);
        let report = self.discovery.discover(&self.registry).await?;
        store(&self.discovery_report, Some(report.clone()));

        self.rebuild_graph().await?;
        Ok(report)
    }

    /// Re-read the catalog and rebuild the graph.
    ///
    /// # Errors
    ///
    /// Same as [`Self::initialize`].
    pub async fn rescan(&self) -> Result<DiscoveryReport> {
        let report = self.discovery.rescan(&self.registry).await?;
        store(&self.discovery_report, Some(report.clone()));
        self.rebuild_graph().await?;
        Ok(report)
    }

    /// Launch every phase. Launch failures are reported, not returned.
    pub async fn launch(&self) -> LaunchResult {
        self.set_state(OrchestratorState::Launching);
        let result = self.launcher.launch_all_phases().await;
        if !result.success {
            warn!(failed = ?result.failed, skipped = ?result.skipped, "Boot launch incomplete");
        }
        store(&self.launch_result, Some(result.clone()));
        result
    }

    pub fn start_monitoring(&self) -> bool {
        self.set_state(OrchestratorState::Monitoring);
        self.monitor.start()
    }

    /// Start consuming failure events.
    ///
    /// # Errors
    ///
    /// Returns `SubscriberLimit` if the event bus is full.
    pub fn activate_healing(&self) -> Result<bool> {
        self.set_state(OrchestratorState::Healing);
        self.healing.start()
    }

    pub fn mark_ready(&self) {
        self.set_state(OrchestratorState::Ready);
        info!(
            workloads = self.launch_result().map_or(0, |r| r.total_services),
            uptime_ms = self.uptime_ms(),
            "Orchestrator ready"
        );
    }

    /// Initialize, launch, start monitoring and activate healing.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails or healing cannot subscribe.
    pub async fn boot(&self) -> Result<LaunchResult> {
        info!(catalog = %self.discovery.catalog_dir().display(), "Booting orchestrator");
        self.initialize().await?;
        let result = self.launch().await;
        self.start_monitoring();
        self.activate_healing()?;
        Ok(result)
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            state: self.state(),
            health: self.health_status().await,
            launch_result: self.launch_result(),
            discovery: self
                .discovery_report
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            recent_healing: self.healing.history().recent(STATUS_HEALING_EVENTS),
            start_time: self.start_time,
            uptime_ms: self.uptime_ms(),
        }
    }

    pub async fn health_status(&self) -> SystemHealth {
        self.reporter.system_health().await
    }

    pub async fn health_report(&self) -> String {
        self.reporter.report().await
    }

    pub async fn services(&self) -> Vec<RegistryEntry> {
        self.registry.all().await
    }

    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn service(&self, name: &str) -> Result<RegistryEntry> {
        self.registry
            .get(name)
            .await
            .ok_or_else(|| Error::workload_not_found(name))
    }

    #[must_use]
    pub fn dependency_graph(&self) -> GraphSnapshot {
        self.resolver.graph().snapshot()
    }

    /// Launch phase computed by the graph.
    #[must_use]
    pub fn phase_of(&self, name: &str) -> Option<usize> {
        self.resolver.graph().phase_of(name)
    }

    #[must_use]
    pub fn dependency_dot(&self) -> String {
        self.resolver.graph().to_dot()
    }

    #[must_use]
    pub fn dependency_validation(&self) -> ValidationResult {
        self.resolver.validate()
    }

    /// The last `limit` healing events, oldest first.
    #[must_use]
    pub fn healing_history(&self, limit: usize) -> Vec<HealingEvent> {
        self.healing.history().recent(limit)
    }

    #[must_use]
    pub fn healing_stats(&self) -> HealingStats {
        self.healing.history().stats()
    }

    #[must_use]
    pub fn circuit_breakers(&self) -> Vec<CircuitSnapshot> {
        self.healing.breakers().all()
    }

    /// Stop any running process and launch the workload again.
    ///
    /// # Errors
    ///
    /// - `WorkloadNotFound` for unknown workloads
    /// - `Quarantined` while the workload is quarantined
    /// - `HealingInProgress` while the healing engine holds the workload
    /// - any launch error
    pub async fn restart_service(&self, name: &str) -> Result<()> {
        info!(workload = %name, "Manual restart requested");
        self.healing.manual_restart(name).await
    }

    /// Clear restart counters and the circuit, and lift quarantine.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn reset_service(&self, name: &str) -> Result<()> {
        info!(workload = %name, "Manual reset requested");
        self.healing.reset(name).await
    }

    /// Stop monitoring and healing, then terminate every workload process.
    ///
    /// Only the first call runs the sequence; later calls return the
    /// signal-only stats.
    pub async fn graceful_shutdown(&self, signal: ShutdownSignal) -> ShutdownStats {
        self.shutdown.initiate_shutdown(signal).await;
        if self
            .shutdown_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return ShutdownStats {
                signal: self.shutdown.signal(),
                ..ShutdownStats::default()
            };
        }

        self.set_state(OrchestratorState::ShuttingDown);
        info!(signal = ?self.shutdown.signal(), "Shutting down orchestrator");

        self.shutdown.set_phase(ShutdownPhase::StoppingMonitor).await;
        self.monitor.stop().await;

        self.shutdown.set_phase(ShutdownPhase::StoppingHealing).await;
        self.healing.stop().await;

        self.shutdown
            .set_phase(ShutdownPhase::TerminatingProcesses)
            .await;
        let stats = self.shutdown.stop_processes(&self.registry).await;

        self.shutdown.set_phase(ShutdownPhase::Complete).await;
        info!(
            exited = stats.exited_gracefully,
            killed = stats.killed,
            "Orchestrator shut down"
        );
        stats
    }

    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn launch_result(&self) -> Option<LaunchResult> {
        self.launch_result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub const fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    #[must_use]
    pub const fn healing(&self) -> &Arc<SelfHealingEngine> {
        &self.healing
    }

    #[must_use]
    pub const fn launcher(&self) -> &Arc<PhasedLauncher> {
        &self.launcher
    }

    #[must_use]
    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[must_use]
    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    async fn rebuild_graph(&self) -> Result<()> {
        let graph = self.resolver.rebuild(&self.registry.metadata().await);
        let validation = graph.validate();
        for warning in &validation.warnings {
            info!(warning = %warning, "Dependency graph warning");
        }

        if graph.is_cyclic() {
            if self.config.launch.allow_cyclic_boot {
                warn!(errors = ?validation.errors, "Dependency cycle detected, booting anyway");
            } else {
                error!(errors = ?validation.errors, "Dependency cycle detected, refusing to boot");
                return Err(Error::InvalidGraph {
                    errors: validation.errors,
                });
            }
        } else if !validation.valid {
            warn!(errors = ?validation.errors, "Dependency graph has unknown dependencies");
        }
        Ok(())
    }

    fn set_state(&self, state: OrchestratorState) {
        let previous = std::mem::replace(
            &mut *self.state.write().unwrap_or_else(PoisonError::into_inner),
            state,
        );
        if previous != state {
            info!(from = %previous, to = %state, "Orchestrator state changed");
        }
    }
}

fn store<T>(slot: &RwLock<Option<T>>, value: Option<T>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = value;
}
