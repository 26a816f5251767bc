//! Event definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use warden_core::{HealingEvent, HealthCheckResult, WorkloadStatus};

/// Kind of monitoring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringEventKind {
    ServiceStart,
    ServiceStop,
    ServiceFailure,
}

/// Lifecycle notification about one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEvent {
    pub kind: MonitoringEventKind,
    pub timestamp: DateTime<Utc>,
    pub workload: String,
    pub data: Value,
}

impl MonitoringEvent {
    /// Create a monitoring event stamped now.
    pub fn new(kind: MonitoringEventKind, workload: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            workload: workload.into(),
            data,
        }
    }
}

/// Everything published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// Process lifecycle and status notifications.
    Monitoring(MonitoringEvent),
    /// A probe changed a workload's status.
    HealthUpdate {
        workload: String,
        previous: WorkloadStatus,
        result: HealthCheckResult,
    },
    /// A remediation step was recorded.
    Healing(HealingEvent),
    /// A workload failed and needs remediation.
    Failure {
        workload: String,
        status: WorkloadStatus,
        reason: String,
    },
}

impl OrchestratorEvent {
    /// A workload process was spawned.
    pub fn service_start(workload: impl Into<String>, pid: Option<u32>) -> Self {
        Self::Monitoring(MonitoringEvent::new(
            MonitoringEventKind::ServiceStart,
            workload,
            json!({ "pid": pid }),
        ))
    }

    /// A workload process exited.
    pub fn service_stop(workload: impl Into<String>, pid: Option<u32>, exit: impl Into<String>) -> Self {
        Self::Monitoring(MonitoringEvent::new(
            MonitoringEventKind::ServiceStop,
            workload,
            json!({ "pid": pid, "exit": exit.into() }),
        ))
    }

    /// A workload could not be started.
    pub fn service_failure(workload: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Monitoring(MonitoringEvent::new(
            MonitoringEventKind::ServiceFailure,
            workload,
            json!({ "reason": reason.into() }),
        ))
    }

    /// A workload failed; consumed by the healing engine.
    pub fn failure(
        workload: impl Into<String>,
        status: WorkloadStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::Failure {
            workload: workload.into(),
            status,
            reason: reason.into(),
        }
    }

    /// Workload the event is about.
    #[must_use]
    pub fn workload(&self) -> &str {
        match self {
            Self::Monitoring(event) => &event.workload,
            Self::Healing(event) => &event.workload,
            Self::HealthUpdate { workload, .. } | Self::Failure { workload, .. } => workload,
        }
    }

    /// Short event type name for logging.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Monitoring(_) => "monitoring",
            Self::HealthUpdate { .. } => "health_update",
            Self::Healing(_) => "healing",
            Self::Failure { .. } => "failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::HealingAction;

    #[test]
    fn test_event_is_tagged_by_type() -> Result<(), serde_json::Error> {
        let event = OrchestratorEvent::failure("core", WorkloadStatus::Timeout, "probe timed out");
        let json = serde_json::to_value(&event)?;

        assert_eq!(json["type"], "failure");
        assert_eq!(json["workload"], "core");
        assert_eq!(json["status"], "timeout");
        Ok(())
    }

    #[test]
    fn test_monitoring_event_carries_kind() -> Result<(), serde_json::Error> {
        let event = OrchestratorEvent::service_stop("core", Some(42), "exit status: 1");
        let json = serde_json::to_value(&event)?;

        assert_eq!(json["type"], "monitoring");
        assert_eq!(json["kind"], "service_stop");
        assert_eq!(json["data"]["pid"], 42);
        Ok(())
    }

    #[test]
    fn test_workload_accessor_covers_every_variant() {
        let healing = OrchestratorEvent::Healing(HealingEvent::new(
            "api",
            HealingAction::Quarantine,
            "too many attempts",
        ));
        assert_eq!(healing.workload(), "api");
        assert_eq!(healing.event_type(), "healing");
        assert_eq!(OrchestratorEvent::service_start("db", None).workload(), "db");
    }
}
