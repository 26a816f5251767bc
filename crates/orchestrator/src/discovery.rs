//! Workload catalog discovery.
//!
//! A catalog is a directory whose non-hidden subdirectories are candidate
//! workloads, each described by a TOML manifest:
//!
//! ```toml
//! name = "gateway"
//! port = 4100
//! dependencies = ["core"]
//! priority = "high"
//! entry_point = "bin/gateway"
//! startup_timeout_ms = 30000
//! ```
//!
//! Bad manifests are skipped, logged and counted; discovery as a whole only
//! fails when the catalog itself cannot be read.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use warden_core::workload::{
    DEFAULT_HEALTH_CHECK_INTERVAL_MS, DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_STARTUP_TIMEOUT_MS,
};
use warden_core::{DiscoveryConfig, Error, ExecutionKind, Priority, Result, WorkloadMetadata};

use crate::registry::Registry;

/// Entry points probed, in order, when a manifest does not name one.
pub const ENTRY_POINT_CANDIDATES: [&str; 7] = [
    "run",
    "start.sh",
    "bin/server",
    "server.js",
    "index.js",
    "main.py",
    "app.py",
];

/// Base of the fallback port range.
const FALLBACK_PORT_BASE: u16 = 3_000;
/// Width of the fallback port range.
const FALLBACK_PORT_SPAN: u32 = 7_000;

/// On-disk manifest format.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WorkloadManifest {
    name: Option<String>,
    version: Option<String>,
    port: Option<u16>,
    dependencies: Vec<String>,
    priority: Option<Priority>,
    phase: Option<usize>,
    entry_point: Option<String>,
    kind: Option<ExecutionKind>,
    args: Vec<String>,
    health_check_interval_ms: Option<u64>,
    max_restart_attempts: Option<u32>,
    startup_timeout_ms: Option<u64>,
    tags: Vec<String>,
    description: Option<String>,
}

/// A candidate that could not be turned into a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryIssue {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one catalog scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub total_discovered: usize,
    pub valid: usize,
    pub invalid: usize,
    pub errors: Vec<DiscoveryIssue>,
}

impl DiscoveryReport {
    fn reject(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(path = %path.display(), reason = %reason, "Skipping workload candidate");
        self.invalid += 1;
        self.errors.push(DiscoveryIssue {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// Scans a catalog directory for workload manifests.
#[derive(Debug, Clone)]
pub struct WorkloadDiscovery {
    config: DiscoveryConfig,
}

impl WorkloadDiscovery {
    /// Create a discovery for the configured catalog.
    #[must_use]
    pub const fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Catalog directory being scanned.
    #[must_use]
    pub fn catalog_dir(&self) -> &Path {
        &self.config.catalog_dir
    }

    /// Read the catalog and parse every candidate.
    ///
    /// Returns valid metadata sorted by name plus a report that already
    /// counts invalid candidates.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryNotFound` or `Io` if the catalog cannot be listed.
    pub fn scan(&self) -> Result<(Vec<WorkloadMetadata>, DiscoveryReport)> {
        let catalog = &self.config.catalog_dir;
        if !catalog.is_dir() {
            return Err(Error::directory_not_found(catalog));
        }

        let mut candidates: Vec<PathBuf> = std::fs::read_dir(catalog)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_dir() && !is_hidden(path))
            .collect();
        candidates.sort();

        let mut report = DiscoveryReport {
            total_discovered: candidates.len(),
            ..DiscoveryReport::default()
        };
        let mut seen = HashSet::new();
        let mut workloads = Vec::new();

        for dir in candidates {
            let manifest_path = dir.join(&self.config.manifest_name);
            let metadata = match std::fs::read_to_string(&manifest_path) {
                Ok(contents) => parse_manifest(&dir, &contents),
                Err(e) => Err(Error::manifest_invalid(&manifest_path, e.to_string())),
            };

            match metadata {
                Ok(metadata) if !seen.insert(metadata.name.clone()) => {
                    report.reject(&dir, format!("duplicate workload name '{}'", metadata.name));
                }
                Ok(metadata) => {
                    debug!(
                        workload = %metadata.name,
                        port = metadata.port,
                        dependencies = ?metadata.dependencies,
                        "Discovered workload"
                    );
                    report.valid += 1;
                    workloads.push(metadata);
                }
                Err(e) => report.reject(&dir, e.to_string()),
            }
        }

        workloads.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((workloads, report))
    }

    /// Scan the catalog and register every valid workload.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    pub async fn discover(&self, registry: &Registry) -> Result<DiscoveryReport> {
        let (workloads, mut report) = self.scan_blocking().await?;

        for metadata in workloads {
            let path = metadata.path.clone();
            if let Err(e) = registry.register(metadata).await {
                report.valid = report.valid.saturating_sub(1);
                report.reject(&path, e.to_string());
            }
        }

        info!(
            catalog = %self.config.catalog_dir.display(),
            total = report.total_discovered,
            valid = report.valid,
            invalid = report.invalid,
            "Discovery complete"
        );
        Ok(report)
    }

    /// Re-read the catalog: known workloads get fresh metadata (runtime
    /// state is kept), new ones are registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    pub async fn rescan(&self, registry: &Registry) -> Result<DiscoveryReport> {
        let (workloads, report) = self.scan_blocking().await?;

        for metadata in workloads {
            if registry.contains(&metadata.name).await {
                registry.replace_metadata(metadata).await?;
            } else {
                registry.register(metadata).await?;
            }
        }

        info!(valid = report.valid, invalid = report.invalid, "Rescan complete");
        Ok(report)
    }

    async fn scan_blocking(&self) -> Result<(Vec<WorkloadMetadata>, DiscoveryReport)> {
        let discovery = self.clone();
        tokio::task::spawn_blocking(move || discovery.scan())
            .await
            .map_err(|e| Error::Unknown(format!("catalog scan task failed: {e}")))?
    }
}

/// Parse a manifest found in `dir` into workload metadata.
///
/// # Errors
///
/// Returns `ManifestInvalid` if the TOML does not match the manifest format.
pub fn parse_manifest(dir: &Path, contents: &str) -> Result<WorkloadMetadata> {
    let manifest: WorkloadManifest =
        toml::from_str(contents).map_err(|e| Error::manifest_invalid(dir, e.to_string()))?;

    let name = manifest
        .name
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            dir.file_name()
                .and_then(|name| name.to_str())
                .map(String::from)
        })
        .ok_or_else(|| Error::manifest_invalid(dir, "workload has no name"))?;

    let port = manifest.port.unwrap_or_else(|| {
        let port = fallback_port(&name);
        warn!(workload = %name, port, "No port configured, using name-derived fallback");
        port
    });

    let entry_point = manifest.entry_point.or_else(|| find_entry_point(dir));
    if entry_point.is_none() {
        warn!(workload = %name, "No entry point found; workload cannot be launched");
    }
    let kind = manifest
        .kind
        .or_else(|| entry_point.as_deref().map(ExecutionKind::infer))
        .unwrap_or_default();

    let priority = manifest.priority.unwrap_or_default();

    Ok(WorkloadMetadata {
        name,
        port,
        version: manifest.version.unwrap_or_else(|| "0.1.0".to_string()),
        dependencies: manifest.dependencies,
        priority,
        health_check_interval_ms: manifest
            .health_check_interval_ms
            .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
        max_restart_attempts: manifest
            .max_restart_attempts
            .unwrap_or(DEFAULT_MAX_RESTART_ATTEMPTS),
        startup_timeout_ms: manifest
            .startup_timeout_ms
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT_MS),
        launch_phase: manifest.phase.unwrap_or_else(|| priority.default_phase()),
        path: dir.to_path_buf(),
        entry_point,
        kind,
        args: manifest.args,
        tags: manifest.tags,
        description: manifest.description,
    })
}

/// Name-derived port: `3000 + (sum of name bytes mod 7000)`.
///
/// Collisions are possible; explicit ports should be preferred.
#[must_use]
pub fn fallback_port(name: &str) -> u16 {
    let sum: u32 = name.bytes().map(u32::from).sum();
    let offset = u16::try_from(sum % FALLBACK_PORT_SPAN).unwrap_or(0);
    FALLBACK_PORT_BASE + offset
}

fn find_entry_point(dir: &Path) -> Option<String> {
    ENTRY_POINT_CANDIDATES
        .iter()
        .find(|candidate| dir.join(candidate).is_file())
        .map(|candidate| (*candidate).to_string())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}
