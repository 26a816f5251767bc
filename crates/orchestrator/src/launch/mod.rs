//! Phased launch.
//!
//! - [`validator`]: per-workload and per-phase launch checks
//! - [`sequencer`]: priority ordering and bounded batches
//! - [`launcher`]: drives phases, spawns processes, waits for health
//! - [`process`]: process handle and spawner abstraction

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod launcher;
pub mod process;
pub mod sequencer;
pub mod validator;

use std::collections::BTreeMap;

use serde::Serialize;

pub use launcher::PhasedLauncher;
pub use process::{
    ChildProcessSpawner, ExitInfo, LaunchCommand, ProcessHandle, ProcessSpawner, StopSignal,
};
pub use sequencer::LaunchSequencer;
pub use validator::LaunchValidator;

/// Outcome of launching one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseResult {
    pub phase: usize,
    pub services: Vec<String>,
    pub success: bool,
    pub launched: Vec<String>,
    pub failed: Vec<String>,
    pub duration_ms: u64,
    /// Failure reason per workload.
    pub errors: BTreeMap<String, String>,
}

/// Outcome of a full boot launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchResult {
    pub success: bool,
    pub total_services: usize,
    pub launched: Vec<String>,
    pub failed: Vec<String>,
    /// Workloads in phases that never ran because boot aborted.
    pub skipped: Vec<String>,
    pub duration_ms: u64,
    pub phase_results: Vec<PhaseResult>,
    pub errors: BTreeMap<String, String>,
}

impl LaunchResult {
    fn absorb(&mut self, phase: PhaseResult) {
        self.launched.extend(phase.launched.iter().cloned());
        self.failed.extend(phase.failed.iter().cloned());
        self.errors
            .extend(phase.errors.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.phase_results.push(phase);
    }
}
