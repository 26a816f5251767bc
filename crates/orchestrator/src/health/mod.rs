//! Health probing.
//!
//! - [`checker`]: one-shot HTTP probe of a workload
//! - [`monitor`]: periodic polling of every live workload
//! - [`reporter`]: aggregate system health
//!
//! The launcher's startup prober and the monitor both funnel results through
//! [`record_probe`], so a status change is applied and announced in one place.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod checker;
pub mod monitor;
pub mod reporter;

use async_trait::async_trait;
use tracing::{info, warn};
use warden_core::{HealthCheckResult, ResultExt, WorkloadStatus};
use warden_events::{EventBus, OrchestratorEvent};

use crate::registry::Registry;

pub use checker::HealthChecker;
pub use monitor::HealthMonitor;
pub use reporter::{HealthReporter, OverallHealth, SystemHealth};

/// Everything a probe needs to reach a workload and its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub name: String,
    pub port: u16,
    /// Declared dependencies with their port when registered.
    pub dependencies: Vec<(String, Option<u16>)>,
}

impl ProbeTarget {
    /// Resolve the target for a registered workload.
    pub async fn resolve(registry: &Registry, name: &str) -> Option<Self> {
        let metadata = registry.metadata().await;
        let workload = metadata.get(name)?;
        let dependencies = workload
            .dependencies
            .iter()
            .map(|dependency| {
                let port = metadata.get(dependency).map(|m| m.port);
                (dependency.clone(), port)
            })
            .collect();

        Some(Self {
            name: workload.name.clone(),
            port: workload.port,
            dependencies,
        })
    }
}

/// Produces a health result for a workload. Never fails: unreachable
/// workloads yield a `timeout` or `unhealthy` result.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> HealthCheckResult;
}

/// Store a probe result and announce a status change.
///
/// Publishes `HealthUpdate` when the status changed and, if the new status
/// is a failure, a `Failure` event for the healing engine. Returns the
/// previous status when a change was applied.
pub async fn record_probe(
    registry: &Registry,
    bus: &EventBus,
    result: HealthCheckResult,
) -> Option<WorkloadStatus> {
    let workload = result.workload.clone();
    let status = result.status;
    let reason = result
        .error
        .clone()
        .unwrap_or_else(|| format!("health check reported {status}"));

    let previous = registry
        .apply_probe(result.clone())
        .await
        .into_option_logged("Dropping health result for unknown workload")
        .flatten()?;

    if status.is_failure() {
        warn!(workload = %workload, from = %previous, to = %status, reason = %reason, "Workload health changed");
    } else {
        info!(workload = %workload, from = %previous, to = %status, "Workload health changed");
    }

    bus.publish(OrchestratorEvent::HealthUpdate {
        workload: workload.clone(),
        previous,
        result,
    });
    if status.is_failure() {
        bus.publish(OrchestratorEvent::failure(workload, status, reason));
    }
    Some(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{Result, WorkloadMetadata};
    use warden_events::EventPattern;

    #[tokio::test]
    async fn test_resolve_includes_dependency_ports() -> Result<()> {
        let registry = Registry::default();
        registry.register(WorkloadMetadata::new("core", 4000)).await?;
        registry
            .register(WorkloadMetadata::new("gateway", 4100).with_dependencies(["core", "auth"]))
            .await?;

        let target = ProbeTarget::resolve(&registry, "gateway").await;

        assert_eq!(
            target.map(|t| t.dependencies),
            Some(vec![("core".to_string(), Some(4000)), ("auth".to_string(), None)])
        );
        assert!(ProbeTarget::resolve(&registry, "ghost").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn given_healthy_workload_when_probe_fails_then_failure_is_published() -> Result<()> {
        // GIVEN: A healthy workload and a subscriber for failures
        let registry = Registry::default();
        let bus = EventBus::default();
        registry.register(WorkloadMetadata::new("core", 4000)).await?;
        registry.update_status("core", WorkloadStatus::Healthy).await?;
        let mut all = bus.subscribe()?;
        let mut failures = bus.subscribe_filtered(EventPattern::Failures)?;

        // WHEN: A probe reports it unhealthy
        let previous = record_probe(
            &registry,
            &bus,
            HealthCheckResult::failed("core", WorkloadStatus::Unhealthy, "HTTP 503"),
        )
        .await;

        // THEN: The change is applied and both events go out
        assert_eq!(previous, Some(WorkloadStatus::Healthy));
        assert!(matches!(
            all.try_recv(),
            Some(OrchestratorEvent::HealthUpdate { .. })
        ));
        assert!(matches!(
            failures.try_recv(),
            Some(OrchestratorEvent::Failure { ref reason, .. }) if reason == "HTTP 503"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_status_publishes_nothing() -> Result<()> {
        let registry = Registry::default();
        let bus = EventBus::default();
        registry.register(WorkloadMetadata::new("core", 4000)).await?;
        registry.update_status("core", WorkloadStatus::Healthy).await?;
        let mut all = bus.subscribe()?;

        let previous = record_probe(&registry, &bus, HealthCheckResult::healthy("core", 2)).await;

        assert_eq!(previous, None);
        assert!(all.try_recv().is_none());
        assert_eq!(registry.get("core").await.map(|e| e.health_history.len()), Some(1));
        Ok(())
    }
}
