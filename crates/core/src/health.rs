//! Health probe results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workload::WorkloadStatus;

/// Memory usage reported by a workload's health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub used: u64,
    pub total: u64,
    pub percentage: f64,
}

/// Connectivity of one declared dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Connected,
    Disconnected,
    Unknown,
}

/// Result of probing one workload once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub workload: String,
    pub timestamp: DateTime<Utc>,
    pub status: WorkloadStatus,
    pub response_time_ms: u64,
    /// Uptime in seconds as reported by the workload itself.
    pub uptime_secs: Option<f64>,
    pub memory: Option<MemoryStats>,
    pub cpu: Option<f64>,
    pub dependencies: BTreeMap<String, DependencyStatus>,
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// Create a result with the given status and nothing else reported.
    pub fn new(workload: impl Into<String>, status: WorkloadStatus, response_time_ms: u64) -> Self {
        Self {
            workload: workload.into(),
            timestamp: Utc::now(),
            status,
            response_time_ms,
            uptime_secs: None,
            memory: None,
            cpu: None,
            dependencies: BTreeMap::new(),
            error: None,
        }
    }

    /// Create a healthy result.
    pub fn healthy(workload: impl Into<String>, response_time_ms: u64) -> Self {
        Self::new(workload, WorkloadStatus::Healthy, response_time_ms)
    }

    /// Create a failed result carrying an error message.
    pub fn failed(
        workload: impl Into<String>,
        status: WorkloadStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(workload, status, 0)
        }
    }

    /// Whether the probe counts toward uptime.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.status, WorkloadStatus::Healthy)
    }
}
