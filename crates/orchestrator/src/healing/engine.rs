//! Self-healing engine.
//!
//! Consumes failure events and walks the restart ladder for the failed
//! workload until it recovers, is quarantined or the engine stops. At most
//! one remediation runs per workload, manual restarts included; failure
//! events that arrive while one is in flight are dropped.
//!
//! Workloads that were already unhealthy when the engine starts (a failed
//! boot launch, say) are remediated as soon as it is activated.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warden_core::{
    CircuitState, Error, HealingAction, HealingConfig, HealingEvent, Result, RestartProtocol,
    RestartStrategy, WorkloadStatus,
};
use warden_events::{EventBus, EventPattern, OrchestratorEvent};

use super::circuit_breaker::CircuitBreakerRegistry;
use super::history::HealingHistory;
use super::restart::RestartProtocolHandler;
use crate::launch::launcher::stop_process;
use crate::launch::{PhasedLauncher, StopSignal};
use crate::registry::Registry;

/// How a remediation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealingOutcome {
    /// The workload was relaunched and reported healthy.
    Recovered { attempt: u32 },
    /// The ladder ran out; the workload is quarantined.
    Quarantined { attempt: u32 },
    /// Another remediation for the workload is already running.
    InFlight,
    /// Unknown or quarantined workload.
    Ignored,
    /// Stopped early by shutdown or a registry error.
    Abandoned { reason: String },
}

/// Removes the workload from the in-flight set when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    workload: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.workload);
    }
}

pub struct SelfHealingEngine {
    registry: Arc<Registry>,
    launcher: Arc<PhasedLauncher>,
    bus: EventBus,
    config: HealingConfig,
    protocols: RestartProtocolHandler,
    breakers: CircuitBreakerRegistry,
    history: HealingHistory,
    in_flight: Mutex<HashSet<String>>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SelfHealingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHealingEngine")
            .field("config", &self.config)
            .field("history", &self.history.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SelfHealingEngine {
    pub fn new(
        registry: Arc<Registry>,
        launcher: Arc<PhasedLauncher>,
        bus: EventBus,
        config: HealingConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            registry,
            launcher,
            bus,
            protocols: RestartProtocolHandler::new(&config),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker),
            history: HealingHistory::new(config.history_limit),
            config,
            in_flight: Mutex::new(HashSet::new()),
            stop_tx,
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn history(&self) -> &HealingHistory {
        &self.history
    }

    #[must_use]
    pub const fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    #[must_use]
    pub const fn protocols(&self) -> &RestartProtocolHandler {
        &self.protocols
    }

    /// Start consuming failure events and remediate workloads that are
    /// already failed. Returns `false` if already running.
    ///
    /// # Errors
    ///
    /// Returns `SubscriberLimit` if the bus has no room for the listener.
    pub fn start(self: &Arc<Self>) -> Result<bool> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(false);
        }

        let mut failures = self.bus.subscribe_filtered(EventPattern::Failures)?;
        self.stop_tx.send_replace(false);
        let mut stop_rx = self.stop_tx.subscribe();
        let engine = Arc::clone(self);

        *task = Some(tokio::spawn(async move {
            for workload in engine.failed_workloads().await {
                info!(workload = %workload, "Remediating workload that failed before activation");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .handle_failure(&workload, "failed before healing was active")
                        .await;
                });
            }

            loop {
                tokio::select! {
                    event = failures.recv() => match event {
                        Some(OrchestratorEvent::Failure { workload, status, reason }) => {
                            debug!(workload = %workload, status = %status, "Failure event received");
                            let engine = Arc::clone(&engine);
                            tokio::spawn(async move {
                                engine.handle_failure(&workload, &reason).await;
                            });
                        }
                        Some(_) => {}
                        None => break,
                    },
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Healing listener exited");
        }));

        info!("Self-healing engine active");
        Ok(true)
    }

    /// Stop the listener and interrupt waits of running remediations.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Healing listener ended abnormally");
            }
            info!("Self-healing engine stopped");
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

    /// Whether a remediation for `workload` is running.
    #[must_use]
    pub fn is_healing(&self, workload: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(workload)
    }

    /// Remediate one failed workload. Never fails; problems end up in the
    /// outcome, the history and the log.
    pub async fn handle_failure(&self, workload: &str, reason: &str) -> HealingOutcome {
        match self.registry.status(workload).await {
            None => {
                debug!(workload = %workload, "Failure for unknown workload ignored");
                return HealingOutcome::Ignored;
            }
            Some(WorkloadStatus::Quarantined) => {
                debug!(workload = %workload, "Failure for quarantined workload ignored");
                return HealingOutcome::Ignored;
            }
            Some(_) => {}
        }

        let Some(_guard) = self.begin(workload) else {
            debug!(workload = %workload, "Remediation already in flight");
            return HealingOutcome::InFlight;
        };

        warn!(workload = %workload, reason = %reason, "Workload failure detected");
        self.record(HealingEvent::new(workload, HealingAction::DetectFailure, reason));

        match self.run_ladder(workload, reason).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(workload = %workload, error = %e, "Remediation abandoned");
                HealingOutcome::Abandoned {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Stop and relaunch a workload on request.
    ///
    /// Claims the same per-workload slot as automatic remediation. A spawn or
    /// startup failure is handed to the engine once the slot is released.
    ///
    /// # Errors
    ///
    /// - `WorkloadNotFound` for unknown workloads
    /// - `Quarantined` while the workload is quarantined
    /// - `HealingInProgress` while a remediation holds the workload
    /// - any launch error
    pub async fn manual_restart(&self, workload: &str) -> Result<()> {
        match self.registry.status(workload).await {
            None => return Err(Error::workload_not_found(workload)),
            Some(WorkloadStatus::Quarantined) => return Err(Error::quarantined(workload)),
            Some(_) => {}
        }

        let outcome = {
            let Some(_guard) = self.begin(workload) else {
                warn!(workload = %workload, "Manual restart refused, remediation in flight");
                return Err(Error::healing_in_progress(workload));
            };
            debug!(workload = %workload, "Manual restart claimed the workload");
            stop_process(
                &self.registry,
                workload,
                StopSignal::Terminate,
                self.config.grace_period(),
            )
            .await?;
            self.launcher.relaunch(workload).await
        };

        if let Err(e @ (Error::SpawnFailed { .. } | Error::StartupFailed { .. })) = &outcome {
            self.launcher.report_failure(workload, e);
        }
        outcome
    }

    /// Clear the restart counter and circuit, and lift quarantine.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if the workload is unknown.
    pub async fn reset(&self, workload: &str) -> Result<()> {
        self.registry.reset_restart_attempts(workload).await?;
        self.breakers.reset(workload);
        if self.registry.status(workload).await == Some(WorkloadStatus::Quarantined) {
            self.registry
                .update_status(workload, WorkloadStatus::Stopped)
                .await?;
            info!(workload = %workload, "Quarantine lifted");
        }
        Ok(())
    }

    async fn run_ladder(&self, workload: &str, reason: &str) -> Result<HealingOutcome> {
        let mut last_error = reason.to_string();
        let mut open_waits = 0_u32;
        loop {
            if !self.breakers.is_allowed(workload) {
                open_waits = open_waits.saturating_add(1);
                let wait = self
                    .protocols
                    .exponential_backoff(open_waits)
                    .min(self.config.circuit_breaker.reset_timeout());
                debug!(
                    workload = %workload,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "Circuit open, waiting"
                );
                if !self.pause(wait).await {
                    return Ok(Self::abandoned());
                }
                continue;
            }
            open_waits = 0;

            let attempt = self.registry.increment_restart_attempts(workload).await?;
            let max_attempts = self
                .registry
                .get(workload)
                .await
                .ok_or_else(|| Error::workload_not_found(workload))?
                .metadata
                .max_restart_attempts;
            let protocol = self.protocols.create_protocol(workload, attempt, &last_error);

            if protocol.strategy == RestartStrategy::Quarantine {
                self.quarantine(workload, attempt, &last_error).await?;
                return Ok(HealingOutcome::Quarantined { attempt });
            }

            info!(
                workload = %workload,
                attempt,
                strategy = %protocol.strategy,
                backoff_ms = protocol.backoff_ms,
                "Attempting restart"
            );
            self.record(
                HealingEvent::new(workload, HealingAction::AttemptRestart, &protocol.reason)
                    .with_metadata("attempt", attempt)
                    .with_metadata("strategy", protocol.strategy.to_string())
                    .with_metadata("backoff_ms", protocol.backoff_ms),
            );

            let restarted = match protocol.strategy {
                RestartStrategy::Immediate => self.restart_immediate(&protocol).await,
                RestartStrategy::Graceful => self.restart_graceful(&protocol).await,
                RestartStrategy::Dependency => self.restart_with_dependencies(&protocol).await,
                RestartStrategy::Quarantine => Ok(()),
            };

            match restarted {
                Ok(()) => {
                    self.registry.reset_restart_attempts(workload).await?;
                    if let Some(change) = self.breakers.record_success(workload) {
                        if change.from == CircuitState::HalfOpen && change.to == CircuitState::Closed {
                            self.record(HealingEvent::new(
                                workload,
                                HealingAction::CircuitClose,
                                "restart succeeded in half-open state",
                            ));
                        }
                    }
                    info!(workload = %workload, attempt, "Workload recovered");
                    self.record(
                        HealingEvent::new(workload, HealingAction::RestartSuccess, "workload healthy again")
                            .with_metadata("attempt", attempt),
                    );
                    return Ok(HealingOutcome::Recovered { attempt });
                }
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(workload = %workload, attempt, error = %e, "Restart attempt failed");
                    self.record(
                        HealingEvent::new(workload, HealingAction::RestartFailure, &last_error)
                            .with_metadata("attempt", attempt),
                    );
                    if let Some(change) = self.breakers.record_failure(workload) {
                        if change.to == CircuitState::Open {
                            self.record(HealingEvent::new(
                                workload,
                                HealingAction::CircuitOpen,
                                format!("circuit opened after attempt {attempt}"),
                            ));
                        }
                    }

                    if !self.protocols.should_retry(attempt, max_attempts) {
                        self.quarantine(workload, attempt, &last_error).await?;
                        return Ok(HealingOutcome::Quarantined { attempt });
                    }
                }
            }

            if *self.stop_tx.borrow() {
                return Ok(Self::abandoned());
            }
        }
    }

    /// Kill, wait the backoff, relaunch.
    async fn restart_immediate(&self, protocol: &RestartProtocol) -> Result<()> {
        stop_process(&self.registry, &protocol.workload, StopSignal::Kill, Duration::ZERO).await?;
        if !self.pause(Duration::from_millis(protocol.backoff_ms)).await {
            return Err(Error::restart_failed(&protocol.workload, "healing engine stopped"));
        }
        self.launcher.relaunch(&protocol.workload).await
    }

    /// Check dependencies, terminate gracefully, relaunch.
    async fn restart_graceful(&self, protocol: &RestartProtocol) -> Result<()> {
        let workload = &protocol.workload;
        let dependencies = self.dependencies_of(workload).await?;
        for dependency in &dependencies {
            let status = self.registry.status(dependency).await;
            if status != Some(WorkloadStatus::Healthy) {
                return Err(Error::restart_failed(
                    workload,
                    format!(
                        "dependency {dependency} is not healthy ({})",
                        status.map_or_else(|| "unregistered".to_string(), |s| s.to_string())
                    ),
                ));
            }
        }

        stop_process(
            &self.registry,
            workload,
            StopSignal::Terminate,
            self.config.grace_period(),
        )
        .await?;
        self.launcher.relaunch(workload).await
    }

    /// Relaunch unhealthy dependencies, let them settle, relaunch.
    async fn restart_with_dependencies(&self, protocol: &RestartProtocol) -> Result<()> {
        let workload = &protocol.workload;
        for dependency in self.dependencies_of(workload).await? {
            if self.registry.status(&dependency).await == Some(WorkloadStatus::Healthy) {
                continue;
            }
            info!(workload = %workload, dependency = %dependency, "Relaunching dependency");
            self.record(
                HealingEvent::new(
                    &dependency,
                    HealingAction::DependencyRestart,
                    format!("dependency of {workload}"),
                )
                .with_metadata("dependent", workload.as_str()),
            );
            if let Err(e) = self.launcher.relaunch(&dependency).await {
                warn!(dependency = %dependency, error = %e, "Dependency relaunch failed");
            }
        }

        if !self.pause(self.config.stabilization()).await {
            return Err(Error::restart_failed(workload, "healing engine stopped"));
        }
        stop_process(&self.registry, workload, StopSignal::Kill, Duration::ZERO).await?;
        self.launcher.relaunch(workload).await
    }

    async fn quarantine(&self, workload: &str, attempt: u32, reason: &str) -> Result<()> {
        stop_process(&self.registry, workload, StopSignal::Kill, Duration::ZERO).await?;
        self.registry
            .update_status(workload, WorkloadStatus::Quarantined)
            .await?;
        error!(workload = %workload, attempt, reason = %reason, "Workload quarantined");
        self.record(
            HealingEvent::new(workload, HealingAction::Quarantine, reason).with_metadata("attempt", attempt),
        );
        Ok(())
    }

    async fn dependencies_of(&self, workload: &str) -> Result<Vec<String>> {
        Ok(self
            .registry
            .get(workload)
            .await
            .ok_or_else(|| Error::workload_not_found(workload))?
            .metadata
            .dependencies)
    }

    /// Workloads left unhealthy or timed out.
    async fn failed_workloads(&self) -> Vec<String> {
        let mut failed = Vec::new();
        for status in [WorkloadStatus::Unhealthy, WorkloadStatus::Timeout] {
            failed.extend(
                self.registry
                    .by_status(status)
                    .await
                    .into_iter()
                    .map(|entry| entry.name().to_string()),
            );
        }
        failed
    }

    fn begin(&self, workload: &str) -> Option<InFlightGuard<'_>> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workload.to_string());
        inserted.then(|| InFlightGuard {
            in_flight: &self.in_flight,
            workload: workload.to_string(),
        })
    }

    fn record(&self, event: HealingEvent) {
        self.history.record(event.clone());
        self.bus.publish(OrchestratorEvent::Healing(event));
    }

    /// Sleep for `duration`; `false` if the engine was stopped meanwhile.
    async fn pause(&self, duration: Duration) -> bool {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let stopped = async {
            while stop_rx.changed().await.is_ok() {
                if *stop_rx.borrow() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        };
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = stopped => false,
        }
    }

    fn abandoned() -> HealingOutcome {
        HealingOutcome::Abandoned {
            reason: "healing engine stopped".to_string(),
        }
    }
}
