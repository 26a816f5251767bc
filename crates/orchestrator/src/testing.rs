//! In-memory process spawner and health probe.
//!
//! Drive the launcher, monitor and healing engine without real processes or
//! HTTP servers. Enabled for this crate's tests and, through the `testing`
//! feature, for downstream crates.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use warden_core::{Error, HealthCheckResult, Result, WorkloadStatus};

use crate::health::{HealthProbe, ProbeTarget};
use crate::launch::process::{ExitInfo, LaunchCommand, ProcessHandle, ProcessSpawner, StopSignal};

const FIRST_FAKE_PID: u32 = 10_000;

/// A process that exists only in memory.
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    signals: Mutex<Vec<StopSignal>>,
    ignore_terminate: AtomicBool,
}

impl FakeProcess {
    /// A running fake process.
    #[must_use]
    pub fn new(pid: u32) -> Arc<Self> {
        let (exit_tx, _) = watch::channel(None);
        Arc::new(Self {
            pid,
            exit_tx,
            signals: Mutex::new(Vec::new()),
            ignore_terminate: AtomicBool::new(false),
        })
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self, code: i32) {
        self.exit_tx.send_if_modified(|exit| {
            if exit.is_some() {
                return false;
            }
            *exit = Some(ExitInfo {
                code: Some(code),
                signal: None,
                description: format!("exit status: {code}"),
            });
            true
        });
    }

    /// Make SIGTERM a no-op so only SIGKILL stops the process.
    pub fn ignore_terminate(&self) {
        self.ignore_terminate.store(true, Ordering::SeqCst);
    }

    /// Signals delivered so far.
    #[must_use]
    pub fn signals(&self) -> Vec<StopSignal> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn exit_by_signal(&self, signal: i32) {
        self.exit_tx.send_if_modified(|exit| {
            if exit.is_some() {
                return false;
            }
            *exit = Some(ExitInfo {
                code: None,
                signal: Some(signal),
                description: format!("signal: {signal}"),
            });
            true
        });
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn signal(&self, signal: StopSignal) -> Result<()> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal);
        match signal {
            StopSignal::Terminate if self.ignore_terminate.load(Ordering::SeqCst) => {}
            StopSignal::Terminate => self.exit_by_signal(15),
            StopSignal::Kill => self.exit_by_signal(9),
        }
        Ok(())
    }

    fn exit_watch(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit_tx.subscribe()
    }
}

/// Spawner that hands out [`FakeProcess`]es, or fails on request.
#[derive(Debug)]
pub struct FakeSpawner {
    next_pid: AtomicU32,
    failing: Mutex<HashSet<String>>,
    spawned: Mutex<HashMap<String, Vec<Arc<FakeProcess>>>>,
}

impl Default for FakeSpawner {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(FIRST_FAKE_PID),
            failing: Mutex::new(HashSet::new()),
            spawned: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeSpawner {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every future spawn of `workload` fail.
    pub fn fail(&self, workload: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workload.to_string());
    }

    /// Let spawns of `workload` succeed again.
    pub fn succeed(&self, workload: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workload);
    }

    /// Number of successful spawns of `workload`.
    #[must_use]
    pub fn spawn_count(&self, workload: &str) -> usize {
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workload)
            .map_or(0, Vec::len)
    }

    /// Most recently spawned process of `workload`.
    #[must_use]
    pub fn latest(&self, workload: &str) -> Option<Arc<FakeProcess>> {
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workload)
            .and_then(|processes| processes.last().cloned())
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, command: &LaunchCommand) -> Result<Arc<dyn ProcessHandle>> {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&command.workload);
        if failing {
            return Err(Error::spawn_failed(&command.workload, "scripted spawn failure"));
        }

        let process = FakeProcess::new(self.next_pid.fetch_add(1, Ordering::SeqCst));
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(command.workload.clone())
            .or_default()
            .push(Arc::clone(&process));
        Ok(process)
    }
}

/// Probe that answers with a scripted status per workload.
#[derive(Debug)]
pub struct ScriptedProbe {
    statuses: Mutex<HashMap<String, WorkloadStatus>>,
    default_status: WorkloadStatus,
    probes: AtomicUsize,
}

impl ScriptedProbe {
    /// Probe answering `default_status` for unscripted workloads.
    #[must_use]
    pub fn new(default_status: WorkloadStatus) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(HashMap::new()),
            default_status,
            probes: AtomicUsize::new(0),
        })
    }

    /// Script the status reported for `workload`.
    pub fn set(&self, workload: &str, status: WorkloadStatus) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workload.to_string(), status);
    }

    /// Number of probes answered.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, target: &ProbeTarget) -> HealthCheckResult {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target.name)
            .copied()
            .unwrap_or(self.default_status);

        match status {
            WorkloadStatus::Healthy => HealthCheckResult::healthy(&target.name, 1),
            WorkloadStatus::Degraded => HealthCheckResult::new(&target.name, status, 1),
            other => HealthCheckResult::failed(&target.name, other, format!("scripted {other}")),
        }
    }
}
