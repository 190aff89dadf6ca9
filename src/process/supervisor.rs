//! Supervisor for asynchronously launched processes
//!
//! The supervisor does not own a thread. Whoever drives it (the main loop, a test)
//! calls [`ProcessSupervisor::tick`] every [`ProcessSupervisor::poll_interval`] while
//! [`ProcessSupervisor::is_polling`] is true. Polling stops on its own once the registry
//! is empty and restarts when the next process is registered.

use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, warn};

use super::{ExitReport, LaunchRequest, ProcessHandle, ProcessRunner, RunMode, Spawned};
use crate::constants::process::POLL_INTERVAL_MS;

/// Invoked exactly once with the exit report of a finished process
pub type ExitCallback = Box<dyn FnOnce(&ExitReport) + Send + 'static>;

/// Notifications emitted for every supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Started(ProcessHandle),
    Exited(ProcessHandle, ExitReport),
}

struct ManagedProcess {
    handle: ProcessHandle,
    label: String,
    spawned: Spawned,
    on_exit: Option<ExitCallback>,
    exit: Option<ExitReport>,
    interrupted: bool,
}

impl ManagedProcess {
    /// Polls the child; once an exit is observed it is remembered
    fn exited(&mut self) -> bool {
        if self.exit.is_some() {
            return true;
        }

        match self.spawned.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(ExitReport::from_status(&self.label, self.handle.pid, status, &self.spawned.logs));
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(process = %self.handle, error = %e, "Failed to query process status");
                false
            }
        }
    }
}

pub struct ProcessSupervisor {
    runner: ProcessRunner,
    processes: Vec<ManagedProcess>,
    next_id: u64,
    polling: bool,
    poll_interval: Duration,
    last_poll: Instant,
    events: Option<Sender<SupervisorEvent>>,
    shut_down: bool,
}

impl ProcessSupervisor {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            processes: Vec::new(),
            next_id: 1,
            polling: false,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            last_poll: Instant::now(),
            events: None,
            shut_down: false,
        }
    }

    /// Forward lifecycle events to a channel
    pub fn with_events(mut self, events: Sender<SupervisorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Launches a process
    ///
    /// In [`RunMode::Sync`] this blocks until the child exits, invokes `on_exit` and
    /// returns `None`. In [`RunMode::Async`] the child is registered and its handle returned
    /// immediately; `on_exit` runs from a later [`tick`](Self::tick).
    pub fn run(
        &mut self,
        request: &LaunchRequest,
        mode: RunMode,
        on_exit: Option<ExitCallback>,
    ) -> Result<Option<ProcessHandle>> {
        match mode {
            RunMode::Sync => {
                let report = self.runner.run_sync(request)?;
                if let Some(callback) = on_exit {
                    callback(&report);
                }
                Ok(None)
            }
            RunMode::Async => self.spawn_async(request, on_exit).map(Some),
        }
    }

    fn spawn_async(&mut self, request: &LaunchRequest, on_exit: Option<ExitCallback>) -> Result<ProcessHandle> {
        info!(label = %request.label, "Running process asynchronously");
        let spawned = self.runner.spawn(request)?;

        let handle = ProcessHandle {
            id: self.next_id,
            pid: spawned.child.id(),
        };
        self.next_id += 1;

        self.processes.push(ManagedProcess {
            handle,
            label: request.label.clone(),
            spawned,
            on_exit,
            exit: None,
            interrupted: false,
        });
        self.emit(SupervisorEvent::Started(handle));
        self.start_polling();

        Ok(handle)
    }

    fn start_polling(&mut self) {
        if self.polling {
            return;
        }
        info!("Starting process polling");
        self.polling = true;
        self.last_poll = Instant::now();
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// When the next tick is due; `None` while idle
    pub fn next_poll_deadline(&self) -> Option<Instant> {
        self.polling.then(|| self.last_poll + self.poll_interval)
    }

    pub fn active_count(&self) -> usize {
        self.processes.len()
    }

    pub fn handles(&self) -> Vec<ProcessHandle> {
        self.processes.iter().map(|p| p.handle).collect()
    }

    pub fn is_active(&self, handle: ProcessHandle) -> bool {
        self.processes.iter().any(|p| p.handle == handle)
    }

    /// Reaps exited processes and runs their callbacks
    ///
    /// Returns whether any process remains registered.
    pub fn tick(&mut self) -> bool {
        self.last_poll = Instant::now();

        let mut finished = Vec::new();
        let mut i = 0;
        while i < self.processes.len() {
            if self.processes[i].exited() {
                finished.push(self.processes.remove(i));
            } else {
                i += 1;
            }
        }

        for mut process in finished {
            let Some(report) = process.exit.take() else { continue };

            if !report.success() {
                error!(process = %process.handle, label = %report.label, code = ?report.code, stderr = %report.stderr_log.display(), "Process returned with non-zero exit code");
            } else {
                debug!(process = %process.handle, label = %report.label, "Process exited");
            }

            if let Some(callback) = process.on_exit.take() {
                callback(&report);
            }
            self.emit(SupervisorEvent::Exited(process.handle, report));
        }

        let remaining = !self.processes.is_empty();
        if !remaining && self.polling {
            info!("No processes left to poll");
            self.polling = false;
        }
        remaining
    }

    /// Interrupts a running process with SIGINT
    ///
    /// Processes that already exited, were already interrupted, or are no longer
    /// registered are left alone.
    pub fn kill(&mut self, handle: ProcessHandle) -> Result<()> {
        let Some(process) = self.processes.iter_mut().find(|p| p.handle == handle) else {
            debug!(process = %handle, "Kill requested for unknown or reaped process");
            return Ok(());
        };

        if process.interrupted || process.exited() {
            debug!(process = %handle, "Process already exited or interrupted");
            return Ok(());
        }

        info!(process = %handle, "Interrupting process");
        interrupt(&mut process.spawned)?;
        process.interrupted = true;
        Ok(())
    }

    /// Releases every open descriptor and sweeps empty logs; runs at most once
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if !self.processes.is_empty() {
            warn!(count = self.processes.len(), "Shutting down with processes still running");
        }

        info!("Closing fds");
        // Dropping the entries closes the log handles and terminal descriptors
        self.processes.clear();
        self.polling = false;

        self.runner.log_directory().remove_empty_logs();
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(events) = &self.events {
            // A closed receiver only means nobody is listening anymore
            let _ = events.send(event);
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(unix)]
fn interrupt(spawned: &mut Spawned) -> Result<()> {
    use anyhow::Context;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(spawned.child.id() as i32);
    kill(pid, Signal::SIGINT).with_context(|| format!("Failed to send SIGINT to {pid}"))
}

#[cfg(not(unix))]
fn interrupt(spawned: &mut Spawned) -> Result<()> {
    use anyhow::Context;
    spawned.child.kill().context("Failed to kill process")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::LogDirectory;
    use crate::process::tests::shell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir) -> ProcessSupervisor {
        ProcessSupervisor::new(ProcessRunner::new(LogDirectory::new(dir.path())))
    }

    /// Ticks until the registry drains or the timeout passes
    fn drain(supervisor: &mut ProcessSupervisor, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while supervisor.tick() && Instant::now() < deadline {
            thread::sleep(supervisor.poll_interval());
        }
    }

    fn counting_callback(counter: &Arc<AtomicUsize>) -> Option<ExitCallback> {
        let counter = Arc::clone(counter);
        Some(Box::new(move |_report: &ExitReport| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_async_process_callback_runs_exactly_once() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor(&dir);
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = supervisor
            .run(&shell("exit 0", "short"), RunMode::Async, counting_callback(&calls))
            .unwrap()
            .expect("async run returns a handle");

        assert_eq!(supervisor.active_count(), 1);
        assert!(supervisor.is_active(handle));
        assert!(supervisor.is_polling());

        drain(&mut supervisor, Duration::from_secs(10));

        assert_eq!(supervisor.active_count(), 0);
        assert!(!supervisor.is_polling());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Further ticks never invoke it again
        supervisor.tick();
        supervisor.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_run_invokes_callback_and_returns_no_handle() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor(&dir);
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = supervisor
            .run(&shell("exit 0", "sync"), RunMode::Sync, counting_callback(&calls))
            .unwrap();

        assert!(handle.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.active_count(), 0);
        assert!(!supervisor.is_polling());
    }

    #[test]
    fn test_non_zero_exit_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut supervisor = supervisor(&dir).with_events(tx);

        let handle = supervisor
            .run(&shell("exit 7", "failing"), RunMode::Async, None)
            .unwrap()
            .unwrap();
        drain(&mut supervisor, Duration::from_secs(10));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.first(), Some(&SupervisorEvent::Started(handle)));
        match events.last() {
            Some(SupervisorEvent::Exited(h, report)) => {
                assert_eq!(*h, handle);
                assert_eq!(report.code, Some(7));
                assert!(report.stderr_log.to_string_lossy().ends_with("_failing_stderr.log"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_kill_interrupts_and_double_kill_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor(&dir);
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = supervisor
            .run(&shell("exec sleep 30", "sleeper"), RunMode::Async, counting_callback(&calls))
            .unwrap()
            .unwrap();

        supervisor.kill(handle).unwrap();
        supervisor.kill(handle).unwrap();
        drain(&mut supervisor, Duration::from_secs(10));

        assert_eq!(supervisor.active_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Reaped processes are ignored as well
        supervisor.kill(handle).unwrap();
    }

    #[test]
    fn test_polling_restarts_for_new_process() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor(&dir);

        supervisor.run(&shell("exit 0", "first"), RunMode::Async, None).unwrap();
        drain(&mut supervisor, Duration::from_secs(10));
        assert!(supervisor.next_poll_deadline().is_none());

        supervisor.run(&shell("exit 0", "second"), RunMode::Async, None).unwrap();
        assert!(supervisor.next_poll_deadline().is_some());
        drain(&mut supervisor, Duration::from_secs(10));
        assert!(!supervisor.is_polling());
    }

    #[test]
    fn test_shutdown_removes_empty_logs_once() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor(&dir);

        supervisor.run(&shell("echo kept", "noisy"), RunMode::Sync, None).unwrap();
        supervisor.shutdown();

        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(remaining.len(), 1, "only the non-empty stdout log survives");

        // Second call and the drop are no-ops
        supervisor.shutdown();
        drop(supervisor);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
