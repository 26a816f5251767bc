//! Workload registry.
//!
//! Single source of truth for workload metadata and runtime state. One lock
//! guards the whole map, so every read and write of an entry is
//! linearizable. Callers only ever receive snapshots.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use warden_core::config::DEFAULT_HEALTH_HISTORY_LIMIT;
use warden_core::{
    Error, HealthCheckResult, Priority, Result, WorkloadMetadata, WorkloadMetrics, WorkloadStatus,
};

use crate::launch::process::ProcessHandle;

/// Metadata plus mutable runtime state for one workload.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryEntry {
    pub metadata: WorkloadMetadata,
    pub status: WorkloadStatus,
    #[serde(skip)]
    pub process: Option<Arc<dyn ProcessHandle>>,
    pub pid: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_history: im::Vector<HealthCheckResult>,
    pub restart_attempts: u32,
    pub last_restart_time: Option<DateTime<Utc>>,
    pub uptime_ms: u64,
    pub metrics: WorkloadMetrics,
}

impl RegistryEntry {
    fn new(metadata: WorkloadMetadata) -> Self {
        Self {
            metadata,
            status: WorkloadStatus::Stopped,
            process: None,
            pid: None,
            start_time: None,
            last_health_check: None,
            health_history: im::Vector::new(),
            restart_attempts: 0,
            last_restart_time: None,
            uptime_ms: 0,
            metrics: WorkloadMetrics::default(),
        }
    }

    /// Workload name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Most recent health checks, newest last.
    #[must_use]
    pub fn recent_health(&self, count: usize) -> Vec<HealthCheckResult> {
        let skip = self.health_history.len().saturating_sub(count);
        self.health_history.iter().skip(skip).cloned().collect()
    }

    /// Whether a live process is attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process
            .as_ref()
            .is_some_and(|process| !process.has_exited())
    }
}

/// Count of workloads per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

/// In-memory workload registry.
#[derive(Debug)]
pub struct Registry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    history_limit: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_HISTORY_LIMIT)
    }
}

impl Registry {
    /// Create an empty registry keeping `history_limit` health checks per
    /// workload.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// Insert a new workload with status `stopped`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateWorkload` if the name is already registered.
    pub async fn register(&self, metadata: WorkloadMetadata) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&metadata.name) {
            return Err(Error::duplicate_workload(&metadata.name));
        }
        debug!(workload = %metadata.name, port = metadata.port, "Registered workload");
        entries.insert(metadata.name.clone(), RegistryEntry::new(metadata));
        Ok(())
    }

    /// Replace the metadata of a known workload, keeping its runtime state.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn replace_metadata(&self, metadata: WorkloadMetadata) -> Result<()> {
        self.with_entry(&metadata.name.clone(), |entry| entry.metadata = metadata)
            .await
    }

    /// Snapshot of one workload.
    pub async fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(name).cloned()
    }

    /// Whether a workload is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    /// Current status of one workload.
    pub async fn status(&self, name: &str) -> Option<WorkloadStatus> {
        self.entries.read().await.get(name).map(|entry| entry.status)
    }

    /// Snapshots of every workload, ordered by name.
    pub async fn all(&self) -> Vec<RegistryEntry> {
        self.filtered(|_| true).await
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Metadata of every workload keyed by name.
    pub async fn metadata(&self) -> BTreeMap<String, WorkloadMetadata> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.metadata.clone()))
            .collect()
    }

    /// Workloads whose launch phase hint equals `phase`.
    pub async fn by_phase(&self, phase: usize) -> Vec<RegistryEntry> {
        self.filtered(|entry| entry.metadata.launch_phase == phase)
            .await
    }

    /// Workloads in a priority tier.
    pub async fn by_priority(&self, priority: Priority) -> Vec<RegistryEntry> {
        self.filtered(|entry| entry.metadata.priority == priority)
            .await
    }

    /// Workloads currently in `status`.
    pub async fn by_status(&self, status: WorkloadStatus) -> Vec<RegistryEntry> {
        self.filtered(|entry| entry.status == status).await
    }

    /// Set the status, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn update_status(&self, name: &str, status: WorkloadStatus) -> Result<WorkloadStatus> {
        self.with_entry(name, |entry| std::mem::replace(&mut entry.status, status))
            .await
    }

    /// Attach a freshly spawned process.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn update_process(&self, name: &str, process: Arc<dyn ProcessHandle>) -> Result<()> {
        self.with_entry(name, |entry| {
            entry.pid = process.pid();
            entry.start_time = Some(Utc::now());
            entry.process = Some(process);
        })
        .await
    }

    /// Detach the process handle, returning it so the caller can stop it.
    ///
    /// Once detached, the exit of that process no longer changes the entry.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn clear_process(&self, name: &str) -> Result<Option<Arc<dyn ProcessHandle>>> {
        self.with_entry(name, |entry| {
            entry.pid = None;
            entry.process.take()
        })
        .await
    }

    /// Process handle of a workload, if one is attached.
    pub async fn process(&self, name: &str) -> Option<Arc<dyn ProcessHandle>> {
        self.entries
            .read()
            .await
            .get(name)
            .and_then(|entry| entry.process.clone())
    }

    /// Record that the process with `pid` exited.
    ///
    /// Only applies when `pid` is still the attached process, so the exit of
    /// a replaced process cannot clobber its successor. Quarantined workloads
    /// keep their status. Returns whether the entry changed.
    pub async fn mark_exited(&self, name: &str, pid: Option<u32>) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(name) else {
            return false;
        };
        if pid.is_none() || entry.pid != pid || entry.process.is_none() {
            return false;
        }

        entry.process = None;
        entry.pid = None;
        if entry.status == WorkloadStatus::Quarantined {
            return false;
        }
        entry.status = WorkloadStatus::Stopped;
        true
    }

    /// Increment the restart counter, returning the new count.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn increment_restart_attempts(&self, name: &str) -> Result<u32> {
        self.with_entry(name, |entry| {
            entry.restart_attempts = entry.restart_attempts.saturating_add(1);
            entry.last_restart_time = Some(Utc::now());
            entry.restart_attempts
        })
        .await
    }

    /// Reset the restart counter to zero.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn reset_restart_attempts(&self, name: &str) -> Result<()> {
        self.with_entry(name, |entry| entry.restart_attempts = 0).await
    }

    /// Append a health check to the bounded history and recompute uptime.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn add_health_check(&self, result: HealthCheckResult) -> Result<()> {
        let limit = self.history_limit;
        self.with_entry(&result.workload.clone(), |entry| {
            push_health_check(entry, result, limit);
        })
        .await
    }

    /// Record a probe result and apply its status when it is a real change.
    ///
    /// A workload that is `starting` is only promoted by a probe; the
    /// launcher owns its startup deadline. Workloads outside the monitored
    /// statuses keep their status. Returns the previous status when the
    /// status changed.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn apply_probe(&self, result: HealthCheckResult) -> Result<Option<WorkloadStatus>> {
        let limit = self.history_limit;
        let new_status = result.status;
        self.with_entry(&result.workload.clone(), |entry| {
            push_health_check(entry, result, limit);

            let previous = entry.status;
            let applies = previous != new_status
                && previous.is_monitored()
                && !(previous == WorkloadStatus::Starting && new_status.is_failure());
            if applies {
                entry.status = new_status;
                Some(previous)
            } else {
                None
            }
        })
        .await
    }

    /// Replace the request metrics, keeping the computed uptime percentage.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn update_metrics(&self, name: &str, metrics: WorkloadMetrics) -> Result<()> {
        self.with_entry(name, |entry| {
            let uptime_percentage = entry.metrics.uptime_percentage;
            entry.metrics = WorkloadMetrics {
                uptime_percentage,
                ..metrics
            };
        })
        .await
    }

    /// Number of registered workloads.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no workloads are registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Count of workloads per status.
    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let mut by_status = BTreeMap::new();
        for entry in entries.values() {
            *by_status.entry(entry.status.to_string()).or_insert(0) += 1;
        }
        RegistryStats {
            total: entries.len(),
            by_status,
        }
    }

    /// Remove every workload.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn filtered<F>(&self, predicate: F) -> Vec<RegistryEntry>
    where
        F: Fn(&RegistryEntry) -> bool,
    {
        let mut selected: Vec<RegistryEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| predicate(entry))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        selected
    }

    async fn with_entry<T, F>(&self, name: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut RegistryEntry) -> T,
    {
        let mut entries = self.entries.write().await;
        entries
            .get_mut(name)
            .map(mutate)
            .ok_or_else(|| Error::workload_not_found(name))
    }
}

fn push_health_check(entry: &mut RegistryEntry, result: HealthCheckResult, limit: usize) {
    entry.last_health_check = Some(result.timestamp);
    entry.health_history.push_back(result);
    while entry.health_history.len() > limit {
        entry.health_history.pop_front();
    }

    if let Some(start) = entry.start_time {
        let elapsed = Utc::now().signed_duration_since(start).num_milliseconds();
        entry.uptime_ms = u64::try_from(elapsed).unwrap_or(0);
    }

    let total = entry.health_history.len();
    let healthy = entry
        .health_history
        .iter()
        .filter(|check| check.is_healthy())
        .count();
    #[allow(clippy::cast_precision_loss)]
    let percentage = if total == 0 {
        0.0
    } else {
        healthy as f64 / total as f64 * 100.0
    };
    entry.metrics.uptime_percentage = percentage;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcess;

    fn metadata(name: &str) -> WorkloadMetadata {
        WorkloadMetadata::new(name, 4000)
    }

    #[tokio::test]
    async fn given_new_workload_when_registered_then_status_is_stopped() -> Result<()> {
        // GIVEN: An empty registry
        let registry = Registry::default();

        // WHEN: A workload is registered
        registry.register(metadata("core")).await?;

        // THEN: It starts out stopped with no restarts
        let entry = registry
            .get("core")
            .await
            .ok_or_else(|| Error::workload_not_found("core"))?;
        assert_eq!(entry.status, WorkloadStatus::Stopped);
        assert_eq!(entry.restart_attempts, 0);
        assert!(entry.health_history.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn given_registered_name_when_registered_again_then_rejected() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;

        let second = registry.register(metadata("core")).await;

        assert!(matches!(second, Err(Error::DuplicateWorkload { .. })));
        assert_eq!(registry.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_replace_metadata_keeps_runtime_state() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;
        registry.update_status("core", WorkloadStatus::Healthy).await?;

        registry
            .replace_metadata(WorkloadMetadata::new("core", 4500))
            .await?;

        let entry = registry.get("core").await;
        assert_eq!(entry.as_ref().map(|e| e.metadata.port), Some(4500));
        assert_eq!(entry.map(|e| e.status), Some(WorkloadStatus::Healthy));
        Ok(())
    }

    #[tokio::test]
    async fn test_lookups_by_phase_priority_and_status() -> Result<()> {
        let registry = Registry::default();
        registry
            .register(metadata("db").with_priority(Priority::Critical))
            .await?;
        registry
            .register(metadata("cache").with_priority(Priority::Critical))
            .await?;
        registry.register(metadata("web")).await?;
        registry.update_status("web", WorkloadStatus::Healthy).await?;

        let critical: Vec<String> = registry
            .by_priority(Priority::Critical)
            .await
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(critical, vec!["cache".to_string(), "db".to_string()]);
        assert_eq!(registry.by_phase(0).await.len(), 2);
        assert_eq!(registry.by_status(WorkloadStatus::Healthy).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_attempts_increment_and_reset() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;

        assert_eq!(registry.increment_restart_attempts("core").await?, 1);
        assert_eq!(registry.increment_restart_attempts("core").await?, 2);
        registry.reset_restart_attempts("core").await?;

        let entry = registry.get("core").await;
        assert_eq!(entry.as_ref().map(|e| e.restart_attempts), Some(0));
        assert!(entry.is_some_and(|e| e.last_restart_time.is_some()));
        Ok(())
    }

    #[tokio::test]
    async fn test_health_history_is_bounded_and_drives_uptime() -> Result<()> {
        let registry = Registry::new(4);
        registry.register(metadata("core")).await?;

        for _ in 0..3 {
            registry
                .add_health_check(HealthCheckResult::healthy("core", 5))
                .await?;
        }
        for _ in 0..3 {
            registry
                .add_health_check(HealthCheckResult::failed(
                    "core",
                    WorkloadStatus::Unhealthy,
                    "503",
                ))
                .await?;
        }

        let entry = registry
            .get("core")
            .await
            .ok_or_else(|| Error::workload_not_found("core"))?;
        assert_eq!(entry.health_history.len(), 4);
        // one healthy + three unhealthy remain after eviction
        assert!((entry.metrics.uptime_percentage - 25.0).abs() < f64::EPSILON);
        assert_eq!(entry.recent_health(2).len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_probe_reports_only_real_changes() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;
        registry.update_status("core", WorkloadStatus::Healthy).await?;

        let unchanged = registry
            .apply_probe(HealthCheckResult::healthy("core", 3))
            .await?;
        let changed = registry
            .apply_probe(HealthCheckResult::failed(
                "core",
                WorkloadStatus::Timeout,
                "no answer",
            ))
            .await?;

        assert_eq!(unchanged, None);
        assert_eq!(changed, Some(WorkloadStatus::Healthy));
        assert_eq!(registry.status("core").await, Some(WorkloadStatus::Timeout));
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_probe_only_promotes_starting_workloads() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;
        registry.update_status("core", WorkloadStatus::Starting).await?;

        let failed = registry
            .apply_probe(HealthCheckResult::failed(
                "core",
                WorkloadStatus::Timeout,
                "refused",
            ))
            .await?;
        assert_eq!(failed, None);
        assert_eq!(registry.status("core").await, Some(WorkloadStatus::Starting));

        let promoted = registry
            .apply_probe(HealthCheckResult::healthy("core", 3))
            .await?;
        assert_eq!(promoted, Some(WorkloadStatus::Starting));
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_probe_never_lifts_quarantine() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;
        registry
            .update_status("core", WorkloadStatus::Quarantined)
            .await?;

        let changed = registry
            .apply_probe(HealthCheckResult::healthy("core", 3))
            .await?;

        assert_eq!(changed, None);
        assert_eq!(
            registry.status("core").await,
            Some(WorkloadStatus::Quarantined)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_exited_ignores_replaced_process() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;
        registry
            .update_process("core", FakeProcess::new(100))
            .await?;
        registry.update_status("core", WorkloadStatus::Healthy).await?;

        // Replaced by a newer process before the old exit was observed
        registry
            .update_process("core", FakeProcess::new(101))
            .await?;

        assert!(!registry.mark_exited("core", Some(100)).await);
        assert_eq!(registry.status("core").await, Some(WorkloadStatus::Healthy));

        assert!(registry.mark_exited("core", Some(101)).await);
        assert_eq!(registry.status("core").await, Some(WorkloadStatus::Stopped));
        assert!(registry.process("core").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_process_detaches_handle() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;
        registry
            .update_process("core", FakeProcess::new(7))
            .await?;

        let detached = registry.clear_process("core").await?;

        assert_eq!(detached.and_then(|p| p.pid()), Some(7));
        assert!(!registry.mark_exited("core", Some(7)).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_workload_mutations_fail() {
        let registry = Registry::default();
        let result = registry.update_status("ghost", WorkloadStatus::Healthy).await;
        assert!(result.is_err_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_stats_count_statuses() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("a")).await?;
        registry.register(metadata("b")).await?;
        registry.update_status("b", WorkloadStatus::Healthy).await?;

        let stats = registry.stats().await;

        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get("stopped"), Some(&1));
        assert_eq!(stats.by_status.get("healthy"), Some(&1));
        registry.clear().await;
        assert!(registry.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_metrics_keeps_uptime_percentage() -> Result<()> {
        let registry = Registry::default();
        registry.register(metadata("core")).await?;
        registry
            .add_health_check(HealthCheckResult::healthy("core", 5))
            .await?;

        registry
            .update_metrics(
                "core",
                WorkloadMetrics {
                    request_count: 10,
                    error_count: 1,
                    average_response_time_ms: 12.5,
                    uptime_percentage: 0.0,
                },
            )
            .await?;

        let metrics = registry.get("core").await.map(|e| e.metrics);
        assert_eq!(metrics.as_ref().map(|m| m.request_count), Some(10));
        assert!(metrics.is_some_and(|m| (m.uptime_percentage - 100.0).abs() < f64::EPSILON));
        Ok(())
    }
}
