//! System-wide health aggregation.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_core::WorkloadStatus;

use crate::registry::Registry;

/// Healthy fraction below which the system counts as degraded.
pub const DEGRADED_HEALTHY_RATIO: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

impl OverallHealth {
    /// Aggregate a set of workload statuses.
    ///
    /// Critical if anything is unhealthy or timed out; degraded if anything
    /// is degraded or fewer than 95% are healthy. An empty fleet is healthy.
    #[must_use]
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = WorkloadStatus>,
    {
        let mut total = 0_u32;
        let mut healthy = 0_u32;
        let mut degraded = false;
        for status in statuses {
            total += 1;
            match status {
                WorkloadStatus::Unhealthy | WorkloadStatus::Timeout => return Self::Critical,
                WorkloadStatus::Healthy => healthy += 1,
                WorkloadStatus::Degraded => degraded = true,
                _ => {}
            }
        }

        if total == 0 {
            return Self::Healthy;
        }
        if degraded || f64::from(healthy) / f64::from(total) < DEGRADED_HEALTHY_RATIO {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Aggregate health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub overall: OverallHealth,
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    /// Unhealthy plus timed out.
    pub unhealthy: usize,
    pub quarantined: usize,
    pub services: BTreeMap<String, WorkloadStatus>,
    pub timestamp: DateTime<Utc>,
    pub system_uptime_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HealthReporter {
    registry: Arc<Registry>,
    started: Instant,
}

impl HealthReporter {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            started: Instant::now(),
        }
    }

    pub async fn system_health(&self) -> SystemHealth {
        let services: BTreeMap<String, WorkloadStatus> = self
            .registry
            .all()
            .await
            .into_iter()
            .map(|entry| (entry.metadata.name, entry.status))
            .collect();

        let count = |wanted: &[WorkloadStatus]| {
            services
                .values()
                .filter(|status| wanted.contains(status))
                .count()
        };

        SystemHealth {
            overall: OverallHealth::from_statuses(services.values().copied()),
            total: services.len(),
            healthy: count(&[WorkloadStatus::Healthy]),
            degraded: count(&[WorkloadStatus::Degraded]),
            unhealthy: count(&[WorkloadStatus::Unhealthy, WorkloadStatus::Timeout]),
            quarantined: count(&[WorkloadStatus::Quarantined]),
            timestamp: Utc::now(),
            system_uptime_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            services,
        }
    }

    /// Plain-text health report, one line per workload.
    pub async fn report(&self) -> String {
        let health = self.system_health().await;
        let mut report = format!(
            "System health: {} ({}/{} healthy, {} degraded, {} unhealthy, {} quarantined)\n",
            health.overall,
            health.healthy,
            health.total,
            health.degraded,
            health.unhealthy,
            health.quarantined
        );
        for (name, status) in &health.services {
            let _ = writeln!(report, "  {name:<24} {status}");
        }
        report
    }
}
