//! Process launching and supervision
//!
//! [`ProcessRunner`] starts one child with its output redirected to a per-run log pair
//! and a pseudo-terminal on stdin. It is cheap to clone and safe to use from worker
//! threads for synchronous runs. [`ProcessSupervisor`] owns the asynchronously launched
//! children and is driven from the main loop.

pub mod logs;
pub mod supervisor;

use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use anyhow::{Context, Result, bail};
use tracing::{error, info};

use crate::environment::Environment;

pub use logs::{LogDirectory, RunLogs, remove_empty_logs};
pub use supervisor::{ExitCallback, ProcessSupervisor, SupervisorEvent};

/// Everything needed to start one child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// Logical name used in log file names
    pub label: String,
    pub env: Environment,
    pub working_directory: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(command: Vec<String>, label: impl Into<String>, env: Environment) -> Self {
        Self {
            command,
            label: label.into(),
            env,
            working_directory: None,
        }
    }

    pub fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Block until the child exits
    Sync,
    /// Register the child with the supervisor and return immediately
    Async,
}

/// Identity of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub id: u64,
    pub pid: u32,
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} (pid {})", self.id, self.pid)
    }
}

/// Terminal state of a finished child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub label: String,
    pub pid: u32,
    /// `None` when the child was terminated by a signal
    pub code: Option<i32>,
    pub stderr_log: PathBuf,
}

impl ExitReport {
    fn from_status(label: &str, pid: u32, status: ExitStatus, logs: &RunLogs) -> Self {
        Self {
            label: label.to_string(),
            pid,
            code: status.code(),
            stderr_log: logs.stderr_path.clone(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A spawned child together with the descriptors it depends on
pub(crate) struct Spawned {
    pub child: Child,
    pub logs: RunLogs,
    /// Controlling side of the child's stdin terminal; closed on drop
    #[cfg(unix)]
    pub _pty: std::os::fd::OwnedFd,
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    logs: LogDirectory,
}

impl ProcessRunner {
    pub fn new(logs: LogDirectory) -> Self {
        Self { logs }
    }

    pub fn log_directory(&self) -> &LogDirectory {
        &self.logs
    }

    /// Runs the child to completion
    ///
    /// Failing to open the logs or to spawn is an error; a non-zero exit code is only
    /// logged and returned in the report.
    pub fn run_sync(&self, request: &LaunchRequest) -> Result<ExitReport> {
        info!(label = %request.label, "Running process synchronously");
        let mut spawned = self.spawn(request)?;
        let pid = spawned.child.id();

        let status = spawned
            .child
            .wait()
            .with_context(|| format!("Failed to wait for {}", request.label))?;

        let report = ExitReport::from_status(&request.label, pid, status, &spawned.logs);
        if !report.success() {
            error!(label = %report.label, pid, code = ?report.code, stderr = %report.stderr_log.display(), "Process returned with non-zero exit code");
        }
        Ok(report)
    }

    pub(crate) fn spawn(&self, request: &LaunchRequest) -> Result<Spawned> {
        let Some((program, args)) = request.command.split_first() else {
            bail!("Cannot launch '{}': empty command", request.label);
        };

        info!(label = %request.label, program = %program, "Running exe");
        let logs = self.logs.open_run_logs(&request.label)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(&request.env)
            .stdout(Stdio::from(logs.stdout.try_clone().context("Failed to clone stdout log handle")?))
            .stderr(Stdio::from(logs.stderr.try_clone().context("Failed to clone stderr log handle")?));

        if let Some(dir) = &request.working_directory {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        let pty = {
            let pty = nix::pty::openpty(None, None).context("Failed to open pseudo-terminal")?;
            command.stdin(Stdio::from(pty.slave));
            pty.master
        };
        #[cfg(not(unix))]
        command.stdin(Stdio::null());

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {} ({})", request.label, program))?;
        info!(label = %request.label, pid = child.id(), "Started process");

        Ok(Spawned {
            child,
            logs,
            #[cfg(unix)]
            _pty: pty,
        })
    }
}
