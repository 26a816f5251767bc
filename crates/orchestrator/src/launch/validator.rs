//! Launch validation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use warden_core::{Error, Result, ValidationResult, WorkloadStatus};

use crate::dag::DependencyResolver;
use crate::registry::Registry;

/// Checks whether workloads and phases may launch.
#[derive(Debug, Clone)]
pub struct LaunchValidator {
    registry: Arc<Registry>,
    resolver: Arc<DependencyResolver>,
    poll_interval: Duration,
}

impl LaunchValidator {
    #[must_use]
    pub const fn new(
        registry: Arc<Registry>,
        resolver: Arc<DependencyResolver>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            resolver,
            poll_interval,
        }
    }

    /// Whether a workload may be launched now.
    ///
    /// Fails for unknown or quarantined workloads, unregistered or unhealthy
    /// dependencies and a missing entry point. An already running process
    /// is only a warning.
    pub async fn validate_service_launch(&self, name: &str) -> ValidationResult {
        let Some(entry) = self.registry.get(name).await else {
            return ValidationResult::new(vec![format!("workload {name} is not registered")], vec![]);
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if entry.status == WorkloadStatus::Quarantined {
            errors.push(format!("workload {name} is quarantined"));
        }

        for dependency in &entry.metadata.dependencies {
            match self.registry.status(dependency).await {
                None => errors.push(format!("dependency {dependency} is not registered")),
                Some(WorkloadStatus::Healthy) => {}
                Some(status) => {
                    errors.push(format!("dependency {dependency} is not healthy ({status})"));
                }
            }
        }

        if entry.metadata.entry_point.is_none() {
            errors.push(format!("workload {name} has no entry point"));
        }

        if entry.is_running() {
            warnings.push(format!("workload {name} is already running"));
        }

        ValidationResult::new(errors, warnings)
    }

    /// Whether every workload of the previous phase is healthy.
    pub async fn validate_phase_ready(&self, phase: usize) -> ValidationResult {
        if phase == 0 {
            return ValidationResult::new(Vec::new(), Vec::new());
        }

        let graph = self.resolver.graph();
        let Some(previous) = graph.phases().get(&(phase - 1)) else {
            return ValidationResult::new(Vec::new(), Vec::new());
        };

        let mut errors = Vec::new();
        for name in previous {
            match self.registry.status(name).await {
                Some(WorkloadStatus::Healthy) => {}
                Some(status) => errors.push(format!(
                    "phase {} workload {name} is not healthy ({status})",
                    phase - 1
                )),
                None => errors.push(format!("phase {} workload {name} is not registered", phase - 1)),
            }
        }
        ValidationResult::new(errors, vec![])
    }

    /// Wait until the workload reports healthy.
    ///
    /// # Errors
    ///
    /// Returns `StartupFailed` once the workload is unhealthy, stopped or
    /// quarantined, or when `timeout` elapses first.
    pub async fn validate_launch_success(&self, name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.registry.status(name).await {
                None => return Err(Error::workload_not_found(name)),
                Some(WorkloadStatus::Healthy) => {
                    debug!(workload = %name, "Workload reported healthy");
                    return Ok(());
                }
                Some(
                    status @ (WorkloadStatus::Unhealthy
                    | WorkloadStatus::Stopped
                    | WorkloadStatus::Quarantined),
                ) => {
                    return Err(Error::startup_failed(name, format!("status became {status}")));
                }
                Some(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::startup_failed(
                    name,
                    format!("not healthy within {}ms", timeout.as_millis()),
                ));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
