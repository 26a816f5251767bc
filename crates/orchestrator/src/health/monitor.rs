//! Health monitor.
//!
//! Background task that polls every live workload on a fixed tick. Each
//! probe runs under a hard deadline so one hung workload cannot stall the
//! loop. Status changes go through [`record_probe`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use warden_core::{HealthCheckResult, HealthConfig, WorkloadStatus};
use warden_events::EventBus;

use super::{HealthProbe, ProbeTarget, record_probe};
use crate::registry::{Registry, RegistryEntry};

/// Periodic poller over the registry.
pub struct HealthMonitor {
    registry: Arc<Registry>,
    bus: EventBus,
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval_ms", &self.config.interval_ms)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<Registry>,
        bus: EventBus,
        probe: Arc<dyn HealthProbe>,
        config: HealthConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            registry,
            bus,
            probe,
            config,
            stop_tx,
            task: Mutex::new(None),
        }
    }

    /// Start the polling loop. Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        self.stop_tx.send_replace(false);
        let mut stop_rx = self.stop_tx.subscribe();
        let monitor = Arc::clone(self);
        let interval = self.config.interval();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.poll_due().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Health monitor loop exited");
        }));

        info!(interval_ms = self.config.interval_ms, "Health monitor started");
        true
    }

    /// Stop the polling loop and wait for it to finish its current round.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
            info!("Health monitor stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Probe every monitored workload once, regardless of its interval.
    pub async fn check_all_now(&self) -> Vec<HealthCheckResult> {
        let entries = self.registry.all().await;
        self.check_entries(entries).await
    }

    /// Probe one workload now, whatever its status.
    pub async fn check_workload(&self, name: &str) -> Option<HealthCheckResult> {
        let target = ProbeTarget::resolve(&self.registry, name).await?;
        let result = self.probe_with_deadline(&target).await;
        record_probe(&self.registry, &self.bus, result.clone()).await;
        Some(result)
    }

    /// Longest a single probe may take: every path plus the dependency
    /// checks, plus one attempt of slack.
    #[must_use]
    pub fn probe_deadline(&self) -> Duration {
        let attempts = u32::try_from(self.config.health_paths.len().saturating_add(1))
            .unwrap_or(u32::MAX);
        self.config
            .probe_timeout()
            .saturating_mul(attempts)
            .saturating_add(self.config.dependency_probe_timeout())
    }

    async fn poll_due(&self) {
        let now = Utc::now();
        let slack_ms = self.config.interval_ms / 2;
        let due: Vec<RegistryEntry> = self
            .registry
            .all()
            .await
            .into_iter()
            .filter(|entry| {
                let interval_ms = entry.metadata.health_check_interval_ms;
                entry.last_health_check.is_none_or(|last| {
                    let elapsed = now.signed_duration_since(last).num_milliseconds();
                    u64::try_from(elapsed).unwrap_or(0) + slack_ms >= interval_ms
                })
            })
            .collect();
        self.check_entries(due).await;
    }

    async fn check_entries(&self, entries: Vec<RegistryEntry>) -> Vec<HealthCheckResult> {
        let names: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.status.is_monitored())
            .map(|entry| entry.metadata.name)
            .collect();
        if names.is_empty() {
            return Vec::new();
        }

        let mut targets = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(target) = ProbeTarget::resolve(&self.registry, name).await {
                targets.push(target);
            }
        }

        let results = join_all(targets.iter().map(|target| self.probe_with_deadline(target))).await;
        for result in &results {
            record_probe(&self.registry, &self.bus, result.clone()).await;
        }
        debug!(probed = results.len(), "Health round complete");
        results
    }

    async fn probe_with_deadline(&self, target: &ProbeTarget) -> HealthCheckResult {
        let deadline = self.probe_deadline();
        tokio::time::timeout(deadline, self.probe.probe(target))
            .await
            .unwrap_or_else(|_| {
                HealthCheckResult::failed(
                    &target.name,
                    WorkloadStatus::Timeout,
                    format!("health probe exceeded {}ms", deadline.as_millis()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProbe;
    use warden_core::{Result, WorkloadMetadata};
    use warden_events::{EventPattern, OrchestratorEvent};

    async fn registry_with(statuses: &[(&str, WorkloadStatus)]) -> Result<Arc<Registry>> {
        let registry = Arc::new(Registry::default());
        for (name, status) in statuses {
            registry.register(WorkloadMetadata::new(*name, 4000)).await?;
            registry.update_status(name, *status).await?;
        }
        Ok(registry)
    }

    #[tokio::test]
    async fn given_mixed_statuses_when_polled_then_only_live_workloads_are_probed() -> Result<()> {
        // GIVEN: Healthy, starting, stopped and quarantined workloads
        let registry = registry_with(&[
            ("api", WorkloadStatus::Healthy),
            ("boot", WorkloadStatus::Starting),
            ("idle", WorkloadStatus::Stopped),
            ("jail", WorkloadStatus::Quarantined),
        ])
        .await?;
        let probe = ScriptedProbe::new(WorkloadStatus::Healthy);
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            EventBus::default(),
            probe.clone(),
            HealthConfig::for_testing(),
        );

        // WHEN: One round runs
        let results = monitor.check_all_now().await;

        // THEN: Only the healthy and starting workloads were probed
        assert_eq!(results.len(), 2);
        assert_eq!(probe.probe_count(), 2);
        assert_eq!(registry.status("boot").await, Some(WorkloadStatus::Healthy));
        assert_eq!(registry.status("idle").await, Some(WorkloadStatus::Stopped));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_probe_raises_failure_event() -> Result<()> {
        let registry = registry_with(&[("api", WorkloadStatus::Healthy)]).await?;
        let bus = EventBus::default();
        let mut failures = bus.subscribe_filtered(EventPattern::Failures)?;
        let probe = ScriptedProbe::new(WorkloadStatus::Healthy);
        probe.set("api", WorkloadStatus::Timeout);
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            bus,
            probe,
            HealthConfig::for_testing(),
        );

        monitor.check_all_now().await;

        assert_eq!(registry.status("api").await, Some(WorkloadStatus::Timeout));
        assert!(matches!(
            failures.try_recv(),
            Some(OrchestratorEvent::Failure {
                status: WorkloadStatus::Timeout,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_start_and_stop_loop() -> Result<()> {
        let registry = registry_with(&[("api", WorkloadStatus::Healthy)]).await?;
        let probe = ScriptedProbe::new(WorkloadStatus::Healthy);
        let mut config = HealthConfig::for_testing();
        config.interval_ms = 10;
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            EventBus::default(),
            probe.clone(),
            config,
        ));
        let mut metadata = WorkloadMetadata::new("api", 4000);
        metadata.health_check_interval_ms = 10;
        registry.replace_metadata(metadata).await?;

        assert!(monitor.start());
        assert!(!monitor.start());
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop().await;

        assert!(!monitor.is_running());
        assert!(probe.probe_count() >= 2);
        let after_stop = probe.probe_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.probe_count(), after_stop);
        Ok(())
    }

    #[test]
    fn test_probe_deadline_covers_every_path() {
        let config = HealthConfig::for_testing();
        let expected = config.probe_timeout() * 5 + config.dependency_probe_timeout();
        let monitor = HealthMonitor::new(
            Arc::new(Registry::default()),
            EventBus::default(),
            ScriptedProbe::new(WorkloadStatus::Healthy),
            config,
        );

        assert_eq!(monitor.probe_deadline(), expected);
    }
}
