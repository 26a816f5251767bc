//! # Orchestrator
//!
//! Control plane for a fleet of local workloads: discovery, dependency
//! ordering, phased launch, health monitoring and self-healing.
//!
//! [`MasterOrchestrator`] owns one instance of every component and is the
//! entry point used by the binary and the HTTP API.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub use warden_core::{Error, Result};

/// Dependency graph and resolver
pub mod dag;

/// Catalog scanning
pub mod discovery;

/// Restart ladder, circuit breakers and healing history
pub mod healing;

/// Health probes, monitor and reporter
pub mod health;

/// Validation, sequencing and process launch
pub mod launch;

pub mod orchestrator;

/// Runtime state of every workload
pub mod registry;

/// Signal handling and ordered teardown
pub mod shutdown;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dag::{DependencyGraph, DependencyResolver, GraphSnapshot};
pub use discovery::{DiscoveryReport, WorkloadDiscovery};
pub use healing::{
    CircuitBreakerRegistry, CircuitSnapshot, HealingHistory, HealingOutcome, HealingStats,
    RestartProtocolHandler, SelfHealingEngine,
};
pub use health::{HealthChecker, HealthMonitor, HealthProbe, HealthReporter, SystemHealth};
pub use launch::{
    ChildProcessSpawner, LaunchResult, LaunchSequencer, LaunchValidator, PhaseResult,
    PhasedLauncher, ProcessSpawner,
};
pub use orchestrator::{MasterOrchestrator, OrchestratorState, OrchestratorStatus};
pub use registry::{Registry, RegistryEntry, RegistryStats};
pub use shutdown::{
    ShutdownCoordinator, ShutdownPhase, ShutdownSignal, ShutdownStats, install_signal_handlers,
};
