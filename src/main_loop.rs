//! Single-threaded loop driving the process supervisor and collecting task results

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::constants::process::IDLE_WAIT_MS;
use crate::process::{ProcessRunner, ProcessSupervisor, SupervisorEvent};
use crate::tasks::{BackgroundTask, TaskId, TaskOutcome, TaskReport, TaskRunner};

#[derive(Debug)]
pub enum LoopMessage {
    TaskFinished(TaskReport),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// No process and no task left
    Idle,
    Quit,
}

pub struct MainLoop {
    supervisor: ProcessSupervisor,
    tasks: TaskRunner,
    sender: Sender<LoopMessage>,
    messages: Receiver<LoopMessage>,
    process_events: Receiver<SupervisorEvent>,
    outstanding: HashSet<TaskId>,
    reports: Vec<TaskReport>,
    #[cfg(unix)]
    signals: Option<signal_hook::iterator::Handle>,
}

impl MainLoop {
    pub fn new(runner: ProcessRunner) -> Result<Self> {
        let (sender, messages) = mpsc::channel();
        let (event_sender, process_events) = mpsc::channel();

        let task_sender = sender.clone();
        let tasks = TaskRunner::new(move |report| {
            let _ = task_sender.send(LoopMessage::TaskFinished(report));
        })?;

        Ok(Self {
            supervisor: ProcessSupervisor::new(runner).with_events(event_sender),
            tasks,
            sender,
            messages,
            process_events,
            outstanding: HashSet::new(),
            reports: Vec::new(),
            #[cfg(unix)]
            signals: None,
        })
    }

    /// Turns SIGINT and SIGTERM into [`LoopMessage::Quit`]
    #[cfg(unix)]
    pub fn install_signal_handlers(&mut self) -> Result<()> {
        use anyhow::Context;
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
        self.signals = Some(signals.handle());

        let sender = self.sender.clone();
        std::thread::Builder::new()
            .name("vinepress-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    info!(signal, "Received signal, quitting");
                    if sender.send(LoopMessage::Quit).is_err() {
                        break;
                    }
                }
            })
            .context("Failed to start signal thread")?;
        Ok(())
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut ProcessSupervisor {
        &mut self.supervisor
    }

    /// Handle for asking the loop to stop from another thread
    pub fn sender(&self) -> Sender<LoopMessage> {
        self.sender.clone()
    }

    pub fn spawn_task(&mut self, task: Box<dyn BackgroundTask>) -> TaskId {
        let id = self.tasks.spawn(task);
        self.outstanding.insert(id);
        id
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty() && self.supervisor.active_count() == 0
    }

    /// Reports of finished tasks, oldest first
    pub fn take_task_reports(&mut self) -> Vec<TaskReport> {
        std::mem::take(&mut self.reports)
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskReport> {
        self.reports
            .iter()
            .filter(|report| matches!(report.outcome, TaskOutcome::Failed(_)))
    }

    /// Runs until nothing is outstanding or a quit message arrives
    pub fn run_until_idle(&mut self) -> LoopExit {
        info!("Entering main loop");
        loop {
            if self.is_idle() {
                info!("Nothing left to wait for");
                return LoopExit::Idle;
            }

            match self.messages.recv_timeout(self.wait_time()) {
                Ok(LoopMessage::TaskFinished(report)) => self.finish_task(report),
                Ok(LoopMessage::Quit) => {
                    self.quit();
                    return LoopExit::Quit;
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Self holds a sender, so the channel never disconnects while running
                Err(RecvTimeoutError::Disconnected) => return LoopExit::Quit,
            }

            if self.supervisor.next_poll_deadline().is_some_and(|d| d <= Instant::now()) {
                self.supervisor.tick();
            }
            self.drain_process_events();
        }
    }

    fn wait_time(&self) -> Duration {
        match self.supervisor.next_poll_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_millis(IDLE_WAIT_MS),
        }
    }

    fn finish_task(&mut self, report: TaskReport) {
        if !self.outstanding.remove(&report.id) {
            warn!(task = %report.id, "Report for unknown task");
        }
        if let TaskOutcome::Failed(e) = &report.outcome {
            error!(task = %report.id, name = %report.name, error = %format!("{e:#}"), "Task failed");
        }
        self.reports.push(report);
    }

    fn drain_process_events(&mut self) {
        for event in self.process_events.try_iter() {
            match event {
                SupervisorEvent::Started(handle) => debug!(process = %handle, "Process started"),
                SupervisorEvent::Exited(handle, report) => {
                    info!(process = %handle, label = %report.label, code = ?report.code, "Process finished")
                }
            }
        }
    }

    /// Interrupts running processes and tears the supervisor down
    fn quit(&mut self) {
        info!(processes = self.supervisor.active_count(), tasks = self.outstanding.len(), "Quitting main loop");
        for handle in self.supervisor.handles() {
            if let Err(e) = self.supervisor.kill(handle) {
                error!(process = %handle, error = %e, "Failed to interrupt process");
            }
        }
        self.supervisor.tick();
        self.drain_process_events();
        self.supervisor.shutdown();
    }
}

impl Drop for MainLoop {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(signals) = self.signals.take() {
            signals.close();
        }
    }
}
