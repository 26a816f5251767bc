//! Core types for Warden.
//!
//! - **error / result**: the shared error type and result alias
//! - **workload**: metadata, status and priority of managed workloads
//! - **health**: probe results
//! - **healing**: circuit states, restart strategies and healing events
//! - **config**: TOML-backed orchestrator configuration

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod error;
pub mod healing;
pub mod health;
pub mod result;
pub mod workload;

pub use config::{
    ApiConfig, CircuitBreakerConfig, DiscoveryConfig, EventBusConfig, HealingConfig,
    HealthConfig, LaunchConfig, OrchestratorConfig, ShutdownConfig,
};
pub use error::Error;
pub use healing::{CircuitState, HealingAction, HealingEvent, RestartProtocol, RestartStrategy};
pub use health::{DependencyStatus, HealthCheckResult, MemoryStats};
pub use result::{Result, ResultExt};
pub use workload::{
    ExecutionKind, Priority, ValidationResult, WorkloadMetadata, WorkloadMetrics, WorkloadStatus,
};
