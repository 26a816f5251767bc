//! Process handle abstraction.
//!
//! The launcher and the healing engine only see [`ProcessHandle`] and
//! [`ProcessSpawner`]; the real implementation spawns through
//! `tokio::process` and delivers signals with `nix` on Unix.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};
use warden_core::{Error, Result, WorkloadMetadata};

/// Signal used to stop a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Ask the process to exit (SIGTERM).
    Terminate,
    /// Force the process to exit (SIGKILL).
    Kill,
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub description: String,
}

impl ExitInfo {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            description: status.to_string(),
        }
    }

    fn unknown(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: None,
            description: reason.into(),
        }
    }

    /// Whether the process exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Handle to a running (or exited) workload process.
#[async_trait]
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// OS process id, if the platform reported one.
    fn pid(&self) -> Option<u32>;

    /// Deliver a stop signal. Signalling an exited process is not an error.
    ///
    /// # Errors
    ///
    /// Returns `SignalFailed` if the OS rejects the signal.
    fn signal(&self, signal: StopSignal) -> Result<()>;

    /// Receiver that yields `Some` once the process has exited.
    fn exit_watch(&self) -> watch::Receiver<Option<ExitInfo>>;

    /// Whether the process has already exited.
    fn has_exited(&self) -> bool {
        self.exit_watch().borrow().is_some()
    }

    /// Wait up to `limit` for the process to exit.
    async fn wait_for_exit(&self, limit: Duration) -> Option<ExitInfo> {
        let mut exit = self.exit_watch();
        let waited = tokio::time::timeout(limit, async move {
            exit.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|info| (*info).clone())
        })
        .await;
        waited.ok().flatten()
    }
}

/// Starts workload processes.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Spawn the process described by `command`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnFailed` if the process could not be started.
    async fn spawn(&self, command: &LaunchCommand) -> Result<Arc<dyn ProcessHandle>>;
}

/// Fully resolved command line for one workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub workload: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl LaunchCommand {
    /// Build the command for a workload from its metadata.
    ///
    /// # Errors
    ///
    /// Returns `LaunchValidationFailed` if the workload has no entry point.
    pub fn for_workload(metadata: &WorkloadMetadata) -> Result<Self> {
        let entry_point = metadata.entry_point.as_deref().ok_or_else(|| {
            Error::launch_validation_failed(&metadata.name, vec!["no entry point".to_string()])
        })?;

        let (program, mut args) = match metadata.kind.interpreter() {
            Some(interpreter) => (PathBuf::from(interpreter), vec![entry_point.to_string()]),
            None => (metadata.path.join(entry_point), Vec::new()),
        };
        args.extend(metadata.args.iter().cloned());

        let env = BTreeMap::from([
            ("PORT".to_string(), metadata.port.to_string()),
            ("WORKLOAD_NAME".to_string(), metadata.name.clone()),
        ]);

        Ok(Self {
            workload: metadata.name.clone(),
            program,
            args,
            working_dir: metadata.path.clone(),
            env,
        })
    }
}

/// Spawns real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildProcessSpawner;

#[async_trait]
impl ProcessSpawner for ChildProcessSpawner {
    async fn spawn(&self, command: &LaunchCommand) -> Result<Arc<dyn ProcessHandle>> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.working_dir)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| Error::spawn_failed(&command.workload, e.to_string()))?;

        let pid = child.id();
        info!(
            workload = %command.workload,
            pid = ?pid,
            program = %command.program.display(),
            "Spawned workload process"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(command.workload.clone(), stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(command.workload.clone(), stderr, true));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill_request = Arc::new(Notify::new());
        tokio::spawn(supervise_child(
            command.workload.clone(),
            child,
            exit_tx,
            Arc::clone(&kill_request),
        ));

        Ok(Arc::new(ChildProcess {
            workload: command.workload.clone(),
            pid,
            exit_rx,
            kill_request,
        }))
    }
}

/// Handle to a process spawned by [`ChildProcessSpawner`].
#[derive(Debug)]
pub struct ChildProcess {
    workload: String,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill_request: Arc<Notify>,
}

impl ChildProcess {
    #[cfg(unix)]
    fn terminate(&self) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        let raw = i32::try_from(pid).map_err(|e| Error::signal_failed(pid, e.to_string()))?;

        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(Error::signal_failed(pid, errno.to_string())),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> Result<()> {
        // No graceful signal available; fall back to a kill
        self.kill_request.notify_one();
        Ok(())
    }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn signal(&self, signal: StopSignal) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        debug!(workload = %self.workload, pid = ?self.pid, ?signal, "Signalling workload process");
        match signal {
            StopSignal::Terminate => self.terminate(),
            StopSignal::Kill => {
                self.kill_request.notify_one();
                Ok(())
            }
        }
    }

    fn exit_watch(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit_rx.clone()
    }
}

/// Own the child until it exits, then publish its exit status.
async fn supervise_child(
    workload: String,
    mut child: Child,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    kill_request: Arc<Notify>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill_request.notified() => {
            if let Err(e) = child.start_kill() {
                warn!(workload = %workload, error = %e, "Failed to kill workload process");
            }
            child.wait().await
        }
    };

    let info = status.map_or_else(|e| ExitInfo::unknown(e.to_string()), ExitInfo::from_status);
    debug!(workload = %workload, exit = %info.description, "Workload process exited");
    exit_tx.send_replace(Some(info));
}

async fn forward_output<R>(workload: String, stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(workload = %workload, "{line}");
        } else {
            debug!(workload = %workload, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{ExecutionKind, WorkloadMetadata};

    #[test]
    fn test_command_uses_interpreter_for_scripts() -> Result<()> {
        let metadata = WorkloadMetadata::new("api", 4100)
            .with_path("/srv/api")
            .with_entry_point("server.js");

        let command = LaunchCommand::for_workload(&metadata)?;

        assert_eq!(command.program, PathBuf::from("node"));
        assert_eq!(command.args, vec!["server.js".to_string()]);
        assert_eq!(command.working_dir, PathBuf::from("/srv/api"));
        assert_eq!(command.env.get("PORT").map(String::as_str), Some("4100"));
        Ok(())
    }

    #[test]
    fn test_command_runs_binaries_from_workload_dir() -> Result<()> {
        let mut metadata = WorkloadMetadata::new("core", 4000)
            .with_path("/srv/core")
            .with_entry_point("bin/server");
        metadata.args = vec!["--verbose".to_string()];

        let command = LaunchCommand::for_workload(&metadata)?;

        assert_eq!(metadata.kind, ExecutionKind::Binary);
        assert_eq!(command.program, PathBuf::from("/srv/core/bin/server"));
        assert_eq!(command.args, vec!["--verbose".to_string()]);
        Ok(())
    }

    #[test]
    fn test_command_requires_entry_point() {
        let metadata = WorkloadMetadata::new("ghost", 4000);
        let result = LaunchCommand::for_workload(&metadata);
        assert!(matches!(result, Err(Error::LaunchValidationFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_process_reports_exit() -> Result<()> {
        let command = LaunchCommand {
            workload: "echo".to_string(),
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "exit 3".to_string()],
            working_dir: std::env::temp_dir(),
            env: BTreeMap::new(),
        };

        let handle = ChildProcessSpawner.spawn(&command).await?;
        let exit = handle.wait_for_exit(Duration::from_secs(5)).await;

        assert_eq!(exit.as_ref().and_then(|info| info.code), Some(3));
        assert!(handle.has_exited());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_stops_long_running_process() -> Result<()> {
        let command = LaunchCommand {
            workload: "sleeper".to_string(),
            program: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
            working_dir: std::env::temp_dir(),
            env: BTreeMap::new(),
        };

        let handle = ChildProcessSpawner.spawn(&command).await?;
        assert!(handle.pid().is_some());

        handle.signal(StopSignal::Terminate)?;
        let exit = handle.wait_for_exit(Duration::from_secs(5)).await;

        assert!(exit.is_some());
        assert!(!exit.is_some_and(|info| info.success()));
        Ok(())
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let command = LaunchCommand {
            workload: "missing".to_string(),
            program: PathBuf::from("/definitely/not/a/binary"),
            args: Vec::new(),
            working_dir: std::env::temp_dir(),
            env: BTreeMap::new(),
        };

        let result = ChildProcessSpawner.spawn(&command).await;
        assert!(matches!(result, Err(Error::SpawnFailed { .. })));
    }
}
