//! Workload metadata and runtime status types.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between health checks for one workload (5 seconds).
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;

/// Default number of restart attempts before quarantine.
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 5;

/// Default time a workload has to report healthy after spawn (60 seconds).
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 60_000;

/// Priority tier. Declaration order is launch order: critical first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Launch phase hint used when a manifest does not name one.
    #[must_use]
    pub const fn default_phase(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 3,
            Self::Low => 5,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(label)
    }
}

/// How a workload's entry point is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    /// Run the entry point directly.
    #[default]
    Binary,
    /// Run through `sh`.
    Shell,
    /// Run through `node`.
    Node,
    /// Run through `python3`.
    Python,
}

impl ExecutionKind {
    /// Infer the execution kind from an entry point's extension.
    #[must_use]
    pub fn infer(entry_point: &str) -> Self {
        let extension = std::path::Path::new(entry_point)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        match extension {
            "sh" => Self::Shell,
            "js" | "mjs" | "cjs" => Self::Node,
            "py" => Self::Python,
            _ => Self::Binary,
        }
    }

    /// Interpreter that runs the entry point, if any.
    #[must_use]
    pub const fn interpreter(self) -> Option<&'static str> {
        match self {
            Self::Binary => None,
            Self::Shell => Some("sh"),
            Self::Node => Some("node"),
            Self::Python => Some("python3"),
        }
    }
}

/// Runtime status of a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    #[default]
    Stopped,
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
    Timeout,
    /// Terminal until an operator resets the workload.
    Quarantined,
}

impl WorkloadStatus {
    /// Whether the status counts as a failure that should trigger healing.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Unhealthy | Self::Timeout)
    }

    /// Whether the health monitor should poll a workload in this status.
    ///
    /// Degraded workloads stay polled so they can recover or fail.
    #[must_use]
    pub const fn is_monitored(self) -> bool {
        matches!(self, Self::Healthy | Self::Starting | Self::Degraded)
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Timeout => "timeout",
            Self::Quarantined => "quarantined",
        };
        f.write_str(label)
    }
}

/// Static description of a workload, produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadMetadata {
    pub name: String,
    pub port: u16,
    pub version: String,
    pub dependencies: Vec<String>,
    pub priority: Priority,
    pub health_check_interval_ms: u64,
    pub max_restart_attempts: u32,
    pub startup_timeout_ms: u64,
    pub launch_phase: usize,
    pub path: PathBuf,
    pub entry_point: Option<String>,
    pub kind: ExecutionKind,
    pub args: Vec<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

impl WorkloadMetadata {
    /// Create metadata with defaults for everything but the name and port.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        let priority = Priority::default();
        Self {
            name: name.into(),
            port,
            version: "0.1.0".to_string(),
            dependencies: Vec::new(),
            priority,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            launch_phase: priority.default_phase(),
            path: PathBuf::new(),
            entry_point: None,
            kind: ExecutionKind::default(),
            args: Vec::new(),
            tags: Vec::new(),
            description: None,
        }
    }

    /// Set the declared dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Set the priority tier and the phase hint that follows from it.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self.launch_phase = priority.default_phase();
        self
    }

    /// Set the entry point and infer its execution kind.
    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        let entry_point = entry_point.into();
        self.kind = ExecutionKind::infer(&entry_point);
        self.entry_point = Some(entry_point);
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the startup timeout.
    #[must_use]
    pub const fn with_startup_timeout_ms(mut self, startup_timeout_ms: u64) -> Self {
        self.startup_timeout_ms = startup_timeout_ms;
        self
    }

    /// Set the maximum restart attempts.
    #[must_use]
    pub const fn with_max_restart_attempts(mut self, max_restart_attempts: u32) -> Self {
        self.max_restart_attempts = max_restart_attempts;
        self
    }

    /// Startup timeout as a Duration.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Request and availability metrics for one workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub average_response_time_ms: f64,
    /// Healthy checks over total checks, times 100.
    pub uptime_percentage: f64,
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Build a result; it is valid exactly when there are no errors.
    #[must_use]
    pub fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}
