//! Background work kept off the main loop
//!
//! Tasks run on the tokio blocking pool. Whatever happens inside `work` (an error, a
//! panic) the notifier receives exactly one [`TaskReport`] per spawned task.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use tokio::runtime::{Builder, Runtime};
use tracing::{error, info};

pub trait BackgroundTask: Send + 'static {
    fn name(&self) -> &str;

    fn work(self: Box<Self>) -> Result<()>;
}

/// A closure task, for work that does not deserve its own type
pub struct FnTask<F> {
    name: String,
    work: F,
}

impl<F> FnTask<F>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    pub fn new(name: impl Into<String>, work: F) -> Self {
        Self { name: name.into(), work }
    }
}

impl<F> BackgroundTask for FnTask<F>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn work(self: Box<Self>) -> Result<()> {
        (self.work)()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Terminal state of a task; failures keep the whole error chain
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded,
    Failed(anyhow::Error),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }
}

#[derive(Debug)]
pub struct TaskReport {
    pub id: TaskId,
    pub name: String,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    /// The task's error, with the task name as outer context
    pub fn into_result(self) -> Result<()> {
        match self.outcome {
            TaskOutcome::Succeeded => Ok(()),
            TaskOutcome::Failed(e) => Err(e.context(format!("{} failed", self.name))),
        }
    }
}

type Notifier = Arc<dyn Fn(TaskReport) + Send + Sync>;

pub struct TaskRunner {
    runtime: Runtime,
    notify: Notifier,
    next_id: AtomicU64,
}

impl TaskRunner {
    pub fn new(notify: impl Fn(TaskReport) + Send + Sync + 'static) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .thread_name("vinepress-task")
            .build()
            .context("Failed to start background task runtime")?;

        Ok(Self {
            runtime,
            notify: Arc::new(notify),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn spawn(&self, task: Box<dyn BackgroundTask>) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = task.name().to_string();
        let notify = Arc::clone(&self.notify);

        info!(task = %id, name = %name, "Starting background task");
        self.runtime.spawn_blocking(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(|| task.work())) {
                Ok(Ok(())) => TaskOutcome::Succeeded,
                Ok(Err(e)) => TaskOutcome::Failed(e),
                Err(panic) => TaskOutcome::Failed(anyhow!(panic_message(panic.as_ref()))),
            };

            match &outcome {
                TaskOutcome::Succeeded => info!(task = %id, name = %name, "Background task finished"),
                TaskOutcome::Failed(e) => error!(task = %id, name = %name, error = %format!("{e:#}"), "Background task failed"),
            }

            notify(TaskReport { id, name, outcome });
        });
        id
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
