//! Core error types for Warden operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Warden operations.
#[derive(Debug, Error)]
pub enum Error {
    // Catalog and configuration errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("directory does not exist: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("invalid manifest '{path}': {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("JSON error: {reason}")]
    JsonFailed { reason: String },

    // Registry errors
    #[error("workload not found: {name}")]
    WorkloadNotFound { name: String },

    #[error("workload already registered: {name}")]
    DuplicateWorkload { name: String },

    // Graph errors
    #[error("invalid dependency graph: {}", .errors.join("; "))]
    InvalidGraph { errors: Vec<String> },

    // Launch errors
    #[error("launch validation failed for '{name}': {}", .errors.join("; "))]
    LaunchValidationFailed { name: String, errors: Vec<String> },

    #[error("workload '{name}' is quarantined")]
    Quarantined { name: String },

    #[error("failed to spawn '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("workload '{name}' did not become healthy: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("failed to signal process {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },

    // Healing errors
    #[error("circuit open for '{name}'")]
    CircuitOpen { name: String },

    #[error("restart of '{name}' failed: {reason}")]
    RestartFailed { name: String, reason: String },

    #[error("remediation of '{name}' is already in progress")]
    HealingInProgress { name: String },

    // Event bus errors
    #[error("subscriber limit reached ({limit})")]
    SubscriberLimit { limit: usize },

    #[error("unknown error: {0}")]
    Unknown(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a directory-not-found error.
    pub fn directory_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DirectoryNotFound { path: path.into() }
    }

    /// Create a manifest error.
    pub fn manifest_invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a JSON error.
    pub fn json_failed(reason: impl Into<String>) -> Self {
        Self::JsonFailed {
            reason: reason.into(),
        }
    }

    /// Create a workload-not-found error.
    pub fn workload_not_found(name: impl Into<String>) -> Self {
        Self::WorkloadNotFound { name: name.into() }
    }

    /// Create a duplicate-workload error.
    pub fn duplicate_workload(name: impl Into<String>) -> Self {
        Self::DuplicateWorkload { name: name.into() }
    }

    /// Create a launch validation error.
    pub fn launch_validation_failed(name: impl Into<String>, errors: Vec<String>) -> Self {
        Self::LaunchValidationFailed {
            name: name.into(),
            errors,
        }
    }

    /// Create a quarantined error.
    pub fn quarantined(name: impl Into<String>) -> Self {
        Self::Quarantined { name: name.into() }
    }

    /// Create a spawn error.
    pub fn spawn_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a startup error.
    pub fn startup_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a signal delivery error.
    pub fn signal_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            pid,
            reason: reason.into(),
        }
    }

    /// Create a restart error.
    pub fn restart_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RestartFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a healing-in-progress error.
    pub fn healing_in_progress(name: impl Into<String>) -> Self {
        Self::HealingInProgress { name: name.into() }
    }

    /// Whether the error means the workload is unknown to the registry.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkloadNotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::json_failed(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::toml_parse_failed(err.to_string())
    }
}
