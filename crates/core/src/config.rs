//! Orchestrator configuration.
//!
//! Loaded from TOML; every field has a default so a partial file (or no file
//! at all) is valid. Durations are stored as milliseconds and exposed as
//! [`Duration`] through accessor methods.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Default catalog directory scanned by discovery.
pub const DEFAULT_CATALOG_DIR: &str = "workloads";
/// Default manifest file name inside each workload directory.
pub const DEFAULT_MANIFEST_NAME: &str = "workload.toml";

/// Default health polling interval (5 seconds).
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 5_000;
/// Default per-attempt probe timeout (5 seconds).
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
/// Default dependency connectivity probe timeout (2 seconds).
pub const DEFAULT_DEPENDENCY_PROBE_TIMEOUT_MS: u64 = 2_000;
/// Default health history kept per workload.
pub const DEFAULT_HEALTH_HISTORY_LIMIT: usize = 100;
/// Default host used to reach workloads.
pub const DEFAULT_PROBE_HOST: &str = "127.0.0.1";

/// Default number of workloads launched concurrently within a batch.
pub const DEFAULT_PARALLEL_LIMIT: usize = 10;
/// Default interval for polling startup status (1 second).
pub const DEFAULT_LAUNCH_POLL_INTERVAL_MS: u64 = 1_000;
/// Phases up to and including this index abort boot on failure.
pub const DEFAULT_CRITICAL_PHASE_LIMIT: usize = 1;

/// Default backoff table in milliseconds; the last entry is reused.
pub const DEFAULT_BACKOFF_MS: [u64; 5] = [1_000, 5_000, 15_000, 30_000, 60_000];
/// Default wait after a graceful termination signal (5 seconds).
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;
/// Default wait for relaunched dependencies to settle (5 seconds).
pub const DEFAULT_STABILIZATION_MS: u64 = 5_000;
/// Default healing history capacity.
pub const DEFAULT_HEALING_HISTORY_LIMIT: usize = 1_000;

/// Default consecutive failures before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Default successes needed in half-open to close the circuit.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
/// Default time an open circuit waits before half-open (60 seconds).
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 60_000;

/// Default API bind host.
pub const DEFAULT_API_HOST: &str = "0.0.0.0";
/// Default API port.
pub const DEFAULT_API_PORT: u16 = 9_000;
/// Default WebSocket path.
pub const DEFAULT_WEBSOCKET_PATH: &str = "/orchestrator/stream";
/// Default periodic status broadcast interval (10 seconds).
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 10_000;
/// Default maximum concurrent stream clients.
pub const DEFAULT_MAX_STREAM_CLIENTS: usize = 64;

/// Default event bus channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1_024;
/// Default event bus subscriber cap.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 128;

/// Default shutdown grace period (5 seconds).
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Default log verbosity.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub discovery: DiscoveryConfig,
    pub health: HealthConfig,
    pub launch: LaunchConfig,
    pub healing: HealingConfig,
    pub api: ApiConfig,
    pub events: EventBusConfig,
    pub shutdown: ShutdownConfig,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            health: HealthConfig::default(),
            launch: LaunchConfig::default(),
            healing: HealingConfig::default(),
            api: ApiConfig::default(),
            events: EventBusConfig::default(),
            shutdown: ShutdownConfig::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Configuration with every wait shortened, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            health: HealthConfig::for_testing(),
            launch: LaunchConfig::for_testing(),
            healing: HealingConfig::for_testing(),
            api: ApiConfig::for_testing(),
            events: EventBusConfig::default(),
            shutdown: ShutdownConfig::for_testing(),
            log_level: "debug".to_string(),
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `TomlParseFailed` if the document is not valid TOML or a field
    /// has the wrong type.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `FileReadFailed` if the file cannot be read, or
    /// `TomlParseFailed` if it does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    /// Set the catalog directory.
    #[must_use]
    pub fn with_catalog_dir(mut self, catalog_dir: impl Into<PathBuf>) -> Self {
        self.discovery.catalog_dir = catalog_dir.into();
        self
    }
}

/// Catalog scanning settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub catalog_dir: PathBuf,
    pub manifest_name: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            catalog_dir: PathBuf::from(DEFAULT_CATALOG_DIR),
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
        }
    }
}

/// Health probing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub dependency_probe_timeout_ms: u64,
    pub probe_host: String,
    /// Candidate health paths, tried in order.
    pub health_paths: Vec<String>,
    pub history_limit: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            dependency_probe_timeout_ms: DEFAULT_DEPENDENCY_PROBE_TIMEOUT_MS,
            probe_host: DEFAULT_PROBE_HOST.to_string(),
            health_paths: ["/health", "/api/health", "/status", "/ping"]
                .into_iter()
                .map(String::from)
                .collect(),
            history_limit: DEFAULT_HEALTH_HISTORY_LIMIT,
        }
    }
}

impl HealthConfig {
    /// Short intervals for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            interval_ms: 50,
            probe_timeout_ms: 500,
            dependency_probe_timeout_ms: 200,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub const fn dependency_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.dependency_probe_timeout_ms)
    }
}

/// Phased launch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub parallel_limit: usize,
    pub poll_interval_ms: u64,
    pub critical_phase_limit: usize,
    /// Phases whose workloads are launched one at a time.
    pub serial_phases: Vec<usize>,
    /// Boot even when the dependency graph has a cycle.
    pub allow_cyclic_boot: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            parallel_limit: DEFAULT_PARALLEL_LIMIT,
            poll_interval_ms: DEFAULT_LAUNCH_POLL_INTERVAL_MS,
            critical_phase_limit: DEFAULT_CRITICAL_PHASE_LIMIT,
            serial_phases: vec![0],
            allow_cyclic_boot: false,
        }
    }
}

impl LaunchConfig {
    /// Short intervals for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            poll_interval_ms: 10,
            ..Self::default()
        }
    }

    /// Set the batch size.
    #[must_use]
    pub fn with_parallel_limit(mut self, parallel_limit: usize) -> Self {
        self.parallel_limit = parallel_limit.max(1);
        self
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Whether a phase launches its workloads in parallel batches.
    #[must_use]
    pub fn is_parallel(&self, phase: usize) -> bool {
        !self.serial_phases.contains(&phase)
    }

    /// Whether a failure in this phase aborts the boot sequence.
    #[must_use]
    pub const fn is_critical(&self, phase: usize) -> bool {
        phase <= self.critical_phase_limit
    }
}

/// Self-healing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub backoff_ms: Vec<u64>,
    pub grace_period_ms: u64,
    pub stabilization_ms: u64,
    pub history_limit: usize,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            backoff_ms: DEFAULT_BACKOFF_MS.to_vec(),
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            stabilization_ms: DEFAULT_STABILIZATION_MS,
            history_limit: DEFAULT_HEALING_HISTORY_LIMIT,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl HealingConfig {
    /// Short waits for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            backoff_ms: vec![1, 2, 3, 4, 5],
            grace_period_ms: 10,
            stabilization_ms: 10,
            history_limit: DEFAULT_HEALING_HISTORY_LIMIT,
            circuit_breaker: CircuitBreakerConfig::for_testing(),
        }
    }

    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    #[must_use]
    pub const fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Successes needed in half-open state to close the circuit
    pub success_threshold: u32,
    /// Time before an open circuit becomes half-open
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config with custom thresholds.
    #[must_use]
    pub const fn new(failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout_ms,
        }
    }

    /// Short reset timeout for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, 50)
    }

    /// Set the half-open success threshold.
    #[must_use]
    pub const fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Control-plane API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub websocket_path: String,
    pub broadcast_interval_ms: u64,
    pub cors_origins: Vec<String>,
    pub max_stream_clients: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            port: DEFAULT_API_PORT,
            websocket_path: DEFAULT_WEBSOCKET_PATH.to_string(),
            broadcast_interval_ms: DEFAULT_BROADCAST_INTERVAL_MS,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ],
            max_stream_clients: DEFAULT_MAX_STREAM_CLIENTS,
        }
    }
}

impl ApiConfig {
    /// Loopback binding on an ephemeral port, fast broadcasts.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            broadcast_interval_ms: 50,
            ..Self::default()
        }
    }

    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}

/// Event bus sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub capacity: usize,
    pub max_subscribers: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
        }
    }
}

/// Shutdown settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl ShutdownConfig {
    /// Short grace period for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            grace_period_ms: 200,
        }
    }

    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.health.interval(), Duration::from_secs(5));
        assert_eq!(config.health.health_paths.first().map(String::as_str), Some("/health"));
        assert_eq!(config.launch.parallel_limit, 10);
        assert!(!config.launch.is_parallel(0));
        assert!(config.launch.is_parallel(1));
        assert!(config.launch.is_critical(1));
        assert!(!config.launch.is_critical(2));
        assert_eq!(config.healing.backoff_ms, vec![1_000, 5_000, 15_000, 30_000, 60_000]);
        assert_eq!(config.healing.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.api.port, 9_000);
        assert_eq!(config.api.bind_address(), "0.0.0.0:9000");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            log_level = "debug"

            [api]
            port = 9100

            [healing.circuit_breaker]
            failure_threshold = 5
            "#,
        )?;

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.api.port, 9100);
        assert_eq!(config.api.host, DEFAULT_API_HOST);
        assert_eq!(config.healing.circuit_breaker.failure_threshold, 5);
        assert_eq!(
            config.healing.circuit_breaker.reset_timeout_ms,
            DEFAULT_RESET_TIMEOUT_MS
        );
        Ok(())
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = OrchestratorConfig::from_toml_str("[api]\nport = \"not a port\"");
        assert!(matches!(result, Err(Error::TomlParseFailed { .. })));
    }

    #[test]
    fn test_from_file_reports_missing_path() {
        let result = OrchestratorConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }

    #[test]
    fn test_from_file_reads_toml() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "[launch]\nparallel_limit = 4\nserial_phases = [0, 1]\n")?;

        let config = OrchestratorConfig::from_file(&path)?;
        assert_eq!(config.launch.parallel_limit, 4);
        assert!(!config.launch.is_parallel(1));
        Ok(())
    }
}
