//! Phased launcher.
//!
//! Walks the launch phases in order. Each workload is validated, spawned,
//! watched for exit and probed until it reports healthy or its startup
//! timeout runs out. A failure in a critical phase aborts the boot; later
//! phases only log their failures and carry on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use warden_core::{Error, LaunchConfig, Result, WorkloadStatus};
use warden_events::{EventBus, OrchestratorEvent};

use super::process::{LaunchCommand, ProcessHandle, ProcessSpawner, StopSignal};
use super::sequencer::LaunchSequencer;
use super::validator::LaunchValidator;
use super::{LaunchResult, PhaseResult};
use crate::dag::DependencyResolver;
use crate::health::{HealthProbe, ProbeTarget, record_probe};
use crate::registry::Registry;

pub struct PhasedLauncher {
    registry: Arc<Registry>,
    validator: LaunchValidator,
    sequencer: LaunchSequencer,
    spawner: Arc<dyn ProcessSpawner>,
    probe: Arc<dyn HealthProbe>,
    bus: EventBus,
    config: LaunchConfig,
}

impl std::fmt::Debug for PhasedLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhasedLauncher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PhasedLauncher {
    pub fn new(
        registry: Arc<Registry>,
        resolver: Arc<DependencyResolver>,
        spawner: Arc<dyn ProcessSpawner>,
        probe: Arc<dyn HealthProbe>,
        bus: EventBus,
        config: LaunchConfig,
    ) -> Self {
        let validator = LaunchValidator::new(
            Arc::clone(&registry),
            Arc::clone(&resolver),
            config.poll_interval(),
        );
        let sequencer = LaunchSequencer::new(Arc::clone(&registry), resolver, config.parallel_limit);
        Self {
            registry,
            validator,
            sequencer,
            spawner,
            probe,
            bus,
            config,
        }
    }

    #[must_use]
    pub const fn validator(&self) -> &LaunchValidator {
        &self.validator
    }

    #[must_use]
    pub const fn sequencer(&self) -> &LaunchSequencer {
        &self.sequencer
    }

    /// Launch every phase in order.
    ///
    /// Stops after a failed critical phase; the workloads of the remaining
    /// phases are reported as skipped.
    pub async fn launch_all_phases(&self) -> LaunchResult {
        let started = Instant::now();
        let sequence = self.sequencer.calculate_launch_sequence();
        let mut result = LaunchResult {
            total_services: sequence.iter().map(Vec::len).sum(),
            ..LaunchResult::default()
        };
        info!(
            phases = sequence.len(),
            workloads = result.total_services,
            "Starting phased launch"
        );

        let mut aborted = false;
        for (phase, names) in sequence.iter().enumerate() {
            if aborted {
                result.skipped.extend(names.iter().cloned());
                continue;
            }

            let readiness = self.validator.validate_phase_ready(phase).await;
            if !readiness.valid {
                warn!(phase, errors = ?readiness.errors, "Previous phase not fully healthy");
            }

            let phase_result = self.launch_phase(phase, names).await;
            if !phase_result.success {
                if self.config.is_critical(phase) {
                    error!(phase, failed = ?phase_result.failed, "Critical phase failed, aborting launch");
                    aborted = true;
                } else {
                    warn!(phase, failed = ?phase_result.failed, "Phase had failures, continuing");
                }
            }
            result.absorb(phase_result);
        }

        result.success = result.failed.is_empty() && result.skipped.is_empty();
        result.duration_ms = elapsed_ms(started);
        info!(
            success = result.success,
            launched = result.launched.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            duration_ms = result.duration_ms,
            "Phased launch finished"
        );
        result
    }

    /// Launch one phase, serially or in bounded parallel batches.
    pub async fn launch_phase(&self, phase: usize, names: &[String]) -> PhaseResult {
        let started = Instant::now();
        let ordered = self.sequencer.sort_by_priority(names).await;
        debug!(phase, workloads = ?ordered, parallel = self.config.is_parallel(phase), "Launching phase");

        let mut outcomes = Vec::with_capacity(ordered.len());
        if self.config.is_parallel(phase) {
            for batch in self.sequencer.parallel_batches(&ordered) {
                let launched = join_all(batch.into_iter().map(|name| async move {
                    let outcome = self.launch_service(&name).await;
                    (name, outcome)
                }))
                .await;
                outcomes.extend(launched);
            }
        } else {
            for name in ordered.iter().cloned() {
                let outcome = self.launch_service(&name).await;
                outcomes.push((name, outcome));
            }
        }

        let mut result = PhaseResult {
            phase,
            services: ordered,
            ..PhaseResult::default()
        };
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => result.launched.push(name),
                Err(e) => {
                    result.errors.insert(name.clone(), e.to_string());
                    result.failed.push(name);
                }
            }
        }
        result.success = result.failed.is_empty();
        result.duration_ms = elapsed_ms(started);
        result
    }

    /// Validate, spawn and wait for one workload to become healthy.
    ///
    /// A spawn or startup failure is also published as a failure event so
    /// the healing engine picks the workload up.
    ///
    /// # Errors
    ///
    /// - `LaunchValidationFailed` if the pre-launch checks fail
    /// - `SpawnFailed` if the process could not be started
    /// - `StartupFailed` if it did not report healthy in time
    pub async fn launch_service(&self, name: &str) -> Result<()> {
        let outcome = self.relaunch(name).await;
        if let Err(e @ (Error::SpawnFailed { .. } | Error::StartupFailed { .. })) = &outcome {
            self.report_failure(name, e);
        }
        outcome
    }

    /// Publish a failure event for a workload that could not be started.
    pub fn report_failure(&self, name: &str, error: &Error) {
        self.bus.publish(OrchestratorEvent::failure(
            name,
            WorkloadStatus::Unhealthy,
            format!("launch failed: {error}"),
        ));
    }

    /// [`Self::launch_service`] without the failure event; used by
    /// remediations that handle the outcome themselves.
    ///
    /// # Errors
    ///
    /// Same as [`Self::launch_service`].
    pub async fn relaunch(&self, name: &str) -> Result<()> {
        let validation = self.validator.validate_service_launch(name).await;
        if !validation.valid {
            return Err(Error::launch_validation_failed(name, validation.errors));
        }
        for warning in &validation.warnings {
            warn!(workload = %name, warning = %warning, "Launch warning");
        }

        let metadata = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| Error::workload_not_found(name))?
            .metadata;
        let command = LaunchCommand::for_workload(&metadata)?;

        if let Some(stale) = self.registry.clear_process(name).await? {
            warn!(workload = %name, pid = ?stale.pid(), "Killing stale process before relaunch");
            if let Err(e) = stale.signal(StopSignal::Kill) {
                warn!(workload = %name, error = %e, "Failed to kill stale process");
            }
        }

        self.registry.update_status(name, WorkloadStatus::Starting).await?;

        let process = match self.spawner.spawn(&command).await {
            Ok(process) => process,
            Err(e) => {
                error!(workload = %name, error = %e, "Spawn failed");
                self.registry.update_status(name, WorkloadStatus::Unhealthy).await?;
                self.bus
                    .publish(OrchestratorEvent::service_failure(name, e.to_string()));
                return Err(e);
            }
        };

        let pid = process.pid();
        self.registry.update_process(name, Arc::clone(&process)).await?;
        self.bus.publish(OrchestratorEvent::service_start(name, pid));
        info!(workload = %name, pid = ?pid, "Workload process started");

        self.watch_exit(name, Arc::clone(&process));
        let prober = self.spawn_startup_prober(name);
        let outcome = self
            .validator
            .validate_launch_success(name, metadata.startup_timeout())
            .await;
        prober.abort();

        match outcome {
            Ok(()) => {
                info!(workload = %name, "Workload launched");
                Ok(())
            }
            Err(e) => {
                warn!(workload = %name, error = %e, "Workload failed to start");
                // A detached process no longer changes the entry when it exits.
                if let Some(process) = self.registry.clear_process(name).await? {
                    if let Err(e) = process.signal(StopSignal::Kill) {
                        warn!(workload = %name, error = %e, "Failed to kill unstarted process");
                    }
                }
                if self.registry.status(name).await != Some(WorkloadStatus::Quarantined) {
                    self.registry.update_status(name, WorkloadStatus::Unhealthy).await?;
                }
                Err(e)
            }
        }
    }

    /// Mark the workload stopped and raise a failure when its process exits.
    fn watch_exit(&self, name: &str, process: Arc<dyn ProcessHandle>) {
        let registry = Arc::clone(&self.registry);
        let bus = self.bus.clone();
        let name = name.to_string();

        tokio::spawn(async move {
            let mut exit = process.exit_watch();
            let info = exit
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|info| (*info).clone());
            let description = info.map_or_else(|| "unknown exit".to_string(), |info| info.description);
            let pid = process.pid();

            if registry.mark_exited(&name, pid).await {
                warn!(workload = %name, pid = ?pid, exit = %description, "Workload process exited");
                bus.publish(OrchestratorEvent::service_stop(&name, pid, &description));
                bus.publish(OrchestratorEvent::failure(
                    &name,
                    WorkloadStatus::Stopped,
                    format!("process exited: {description}"),
                ));
            } else {
                debug!(workload = %name, pid = ?pid, "Detached process exited");
            }
        });
    }

    /// Probe a starting workload until it leaves the starting states.
    fn spawn_startup_prober(&self, name: &str) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let bus = self.bus.clone();
        let probe = Arc::clone(&self.probe);
        let interval = self.config.poll_interval().max(Duration::from_millis(1));
        let name = name.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(target) = ProbeTarget::resolve(&registry, &name).await else {
                    break;
                };
                let result = probe.probe(&target).await;
                record_probe(&registry, &bus, result).await;

                if !matches!(
                    registry.status(&name).await,
                    Some(WorkloadStatus::Starting | WorkloadStatus::Degraded)
                ) {
                    break;
                }
            }
        })
    }

    /// Stop a workload's process: signal, wait up to `grace`, then kill.
    ///
    /// The process is detached first so its exit is not reported as a
    /// failure. Returns `false` if no process was attached.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn stop_service(&self, name: &str, grace: Duration) -> Result<bool> {
        stop_process(&self.registry, name, StopSignal::Terminate, grace).await
    }
}

/// Detach and stop a workload's process.
///
/// Sends `signal`, waits up to `grace` for the exit and escalates to
/// [`StopSignal::Kill`] if the process is still alive. Returns `false` if no
/// process was attached.
///
/// # Errors
///
/// Returns `WorkloadNotFound` if the workload is unknown.
pub async fn stop_process(
    registry: &Registry,
    name: &str,
    signal: StopSignal,
    grace: Duration,
) -> Result<bool> {
    let Some(process) = registry.clear_process(name).await? else {
        return Ok(false);
    };

    if let Err(e) = process.signal(signal) {
        warn!(workload = %name, error = %e, "Stop signal failed");
    }
    if signal == StopSignal::Terminate && process.wait_for_exit(grace).await.is_none() {
        warn!(workload = %name, grace_ms = grace.as_millis(), "Process ignored terminate, killing");
        if let Err(e) = process.signal(StopSignal::Kill) {
            warn!(workload = %name, error = %e, "Kill failed");
        }
    }
    debug!(workload = %name, "Process stopped");
    Ok(true)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProcess, FakeSpawner, ScriptedProbe};
    use warden_core::WorkloadMetadata;
    use warden_events::{EventPattern, MonitoringEventKind};

    struct Harness {
        registry: Arc<Registry>,
        spawner: Arc<FakeSpawner>,
        probe: Arc<ScriptedProbe>,
        bus: EventBus,
        launcher: PhasedLauncher,
    }

    async fn harness(workloads: Vec<WorkloadMetadata>, config: LaunchConfig) -> Result<Harness> {
        let registry = Arc::new(Registry::default());
        for workload in workloads {
            registry.register(workload).await?;
        }
        let resolver = Arc::new(DependencyResolver::new());
        resolver.rebuild(&registry.metadata().await);

        let spawner = FakeSpawner::new();
        let probe = ScriptedProbe::new(WorkloadStatus::Healthy);
        let bus = EventBus::default();
        let launcher = PhasedLauncher::new(
            Arc::clone(&registry),
            resolver,
            spawner.clone(),
            probe.clone(),
            bus.clone(),
            config,
        );
        Ok(Harness {
            registry,
            spawner,
            probe,
            bus,
            launcher,
        })
    }

    fn workload(name: &str, dependencies: &[&str]) -> WorkloadMetadata {
        WorkloadMetadata::new(name, 4000)
            .with_entry_point("run.sh")
            .with_dependencies(dependencies.iter().copied())
            .with_startup_timeout_ms(500)
    }

    #[tokio::test]
    async fn given_dependency_chain_when_launched_then_every_phase_comes_up() -> Result<()> {
        // GIVEN: gateway depends on core
        let h = harness(
            vec![workload("core", &[]), workload("gateway", &["core"])],
            LaunchConfig::for_testing(),
        )
        .await?;

        // WHEN: All phases launch
        let result = h.launcher.launch_all_phases().await;

        // THEN: Both workloads are healthy, in two phases
        assert!(result.success);
        assert_eq!(result.total_services, 2);
        assert_eq!(result.phase_results.len(), 2);
        assert_eq!(result.phase_results[0].launched, vec!["core".to_string()]);
        assert_eq!(h.registry.status("gateway").await, Some(WorkloadStatus::Healthy));
        assert_eq!(h.spawner.spawn_count("core"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn given_critical_phase_failure_when_launched_then_later_phases_are_skipped() -> Result<()> {
        // GIVEN: core cannot be spawned
        let h = harness(
            vec![workload("core", &[]), workload("gateway", &["core"])],
            LaunchConfig::for_testing(),
        )
        .await?;
        h.spawner.fail("core");

        // WHEN: All phases launch
        let result = h.launcher.launch_all_phases().await;

        // THEN: Boot aborts after phase 0
        assert!(!result.success);
        assert_eq!(result.failed, vec!["core".to_string()]);
        assert_eq!(result.skipped, vec!["gateway".to_string()]);
        assert_eq!(h.spawner.spawn_count("gateway"), 0);
        assert_eq!(h.registry.status("core").await, Some(WorkloadStatus::Unhealthy));
        Ok(())
    }

    #[tokio::test]
    async fn test_non_critical_failure_does_not_block_later_phases() -> Result<()> {
        let h = harness(
            vec![
                workload("base", &[]),
                workload("mid", &["base"]),
                workload("flaky", &["mid"]),
                workload("steady", &["mid"]),
                workload("top", &["steady"]),
            ],
            LaunchConfig::for_testing(),
        )
        .await?;
        h.spawner.fail("flaky");

        let result = h.launcher.launch_all_phases().await;

        assert!(!result.success);
        assert_eq!(result.failed, vec!["flaky".to_string()]);
        assert!(result.skipped.is_empty());
        assert!(result.launched.contains(&"top".to_string()));
        assert!(result.errors["flaky"].contains("flaky"));
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_timeout_marks_unhealthy_and_kills_process() -> Result<()> {
        let h = harness(
            vec![workload("slow", &[]).with_startup_timeout_ms(60)],
            LaunchConfig::for_testing(),
        )
        .await?;
        h.probe.set("slow", WorkloadStatus::Timeout);

        let outcome = h.launcher.launch_service("slow").await;

        assert!(matches!(outcome, Err(Error::StartupFailed { .. })));
        assert_eq!(h.registry.status("slow").await, Some(WorkloadStatus::Unhealthy));
        assert!(h.registry.process("slow").await.is_none());
        let process = h.spawner.latest("slow");
        assert!(process.is_some_and(|p| p.signals().contains(&StopSignal::Kill)));
        Ok(())
    }

    #[tokio::test]
    async fn given_spawn_failure_when_launched_then_failure_event_is_published() -> Result<()> {
        // GIVEN: A workload that cannot be spawned
        let h = harness(vec![workload("core", &[])], LaunchConfig::for_testing()).await?;
        let mut failures = h.bus.subscribe_filtered(EventPattern::Failures)?;
        h.spawner.fail("core");

        // WHEN: It is relaunched quietly, then launched
        assert!(h.launcher.relaunch("core").await.is_err());
        let quiet = failures.try_recv();
        assert!(h.launcher.launch_service("core").await.is_err());

        // THEN: Only the launch raised a failure, marked unhealthy
        assert!(quiet.is_none());
        let event = tokio::time::timeout(Duration::from_secs(1), failures.recv()).await;
        assert!(matches!(
            event,
            Ok(Some(OrchestratorEvent::Failure { ref workload, status: WorkloadStatus::Unhealthy, .. }))
                if workload == "core"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_timeout_raises_failure() -> Result<()> {
        let h = harness(
            vec![workload("slow", &[]).with_startup_timeout_ms(60)],
            LaunchConfig::for_testing(),
        )
        .await?;
        let mut failures = h.bus.subscribe_filtered(EventPattern::Failures)?;
        h.probe.set("slow", WorkloadStatus::Timeout);

        assert!(h.launcher.launch_service("slow").await.is_err());

        let event = tokio::time::timeout(Duration::from_secs(1), failures.recv()).await;
        assert!(matches!(
            event,
            Ok(Some(OrchestratorEvent::Failure { ref reason, .. })) if reason.contains("launch failed")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_validation_failure_raises_no_failure_event() -> Result<()> {
        let h = harness(
            vec![workload("gateway", &["core"]), workload("core", &[])],
            LaunchConfig::for_testing(),
        )
        .await?;
        let mut failures = h.bus.subscribe_filtered(EventPattern::Failures)?;

        assert!(h.launcher.launch_service("gateway").await.is_err());

        assert!(failures.try_recv().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_workload_is_not_spawned() -> Result<()> {
        let h = harness(
            vec![workload("gateway", &["core"]), workload("core", &[])],
            LaunchConfig::for_testing(),
        )
        .await?;

        let outcome = h.launcher.launch_service("gateway").await;

        assert!(matches!(outcome, Err(Error::LaunchValidationFailed { .. })));
        assert_eq!(h.spawner.spawn_count("gateway"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn given_running_workload_when_process_exits_then_failure_is_published() -> Result<()> {
        // GIVEN: A healthy, launched workload
        let h = harness(vec![workload("core", &[])], LaunchConfig::for_testing()).await?;
        let mut events = h.bus.subscribe()?;
        h.launcher.launch_service("core").await?;

        // WHEN: Its process exits
        if let Some(process) = h.spawner.latest("core") {
            process.exit(1);
        }

        // THEN: The workload is stopped and a stop plus a failure are published
        let mut saw_stop = false;
        let mut saw_failure = false;
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = events.recv().await {
                match event {
                    OrchestratorEvent::Monitoring(event)
                        if event.kind == MonitoringEventKind::ServiceStop =>
                    {
                        saw_stop = true;
                    }
                    OrchestratorEvent::Failure { status, .. } => {
                        assert_eq!(status, WorkloadStatus::Stopped);
                        saw_failure = true;
                        break;
                    }
                    _ => {}
                }
            }
        })
        .await;

        assert!(waited.is_ok());
        assert!(saw_stop && saw_failure);
        assert_eq!(h.registry.status("core").await, Some(WorkloadStatus::Stopped));
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_process_escalates_and_stays_quiet() -> Result<()> {
        let h = harness(vec![workload("core", &[])], LaunchConfig::for_testing()).await?;
        let mut failures = h.bus.subscribe_filtered(EventPattern::Failures)?;
        h.launcher.launch_service("core").await?;
        let process = h.spawner.latest("core");
        if let Some(process) = &process {
            process.ignore_terminate();
        }

        let stopped = h.launcher.stop_service("core", Duration::from_millis(20)).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(stopped);
        assert!(process.is_some_and(|p| p.signals() == vec![StopSignal::Terminate, StopSignal::Kill]));
        assert!(failures.try_recv().is_none());
        assert!(!h.launcher.stop_service("core", Duration::from_millis(20)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_process_is_killed_on_relaunch() -> Result<()> {
        let h = harness(vec![workload("core", &[])], LaunchConfig::for_testing()).await?;
        let stale = FakeProcess::new(7);
        h.registry.update_process("core", stale.clone()).await?;

        h.launcher.launch_service("core").await?;

        assert_eq!(stale.signals(), vec![StopSignal::Kill]);
        assert_eq!(h.spawner.spawn_count("core"), 1);
        Ok(())
    }
}
