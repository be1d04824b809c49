//! Owner of every background task a viewer starts.
//!
//! Tasks are spawned onto a shared `TaskTracker` and observe one shutdown
//! token. A task that returns an error or panics is reported on the failure
//! channel instead of disappearing silently.

use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Error, Result};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A background task that ended with an error or a panic.
#[derive(Debug)]
pub struct TaskFailure {
    pub label: String,
    pub error: Error,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "background task '{}' failed: {:#}", self.label, self.error)
    }
}

pub type FailureReceiver = mpsc::UnboundedReceiver<TaskFailure>;

#[derive(Clone)]
pub struct TaskSupervisor {
    shutdown: CancellationToken,
    tracker: TaskTracker,
    failures: mpsc::UnboundedSender<TaskFailure>,
    telemetry: Arc<Telemetry>,
}

impl fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("active_tasks", &self.tracker.len())
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl TaskSupervisor {
    pub fn new(telemetry: Arc<Telemetry>) -> (Self, FailureReceiver) {
        let (failures, receiver) = mpsc::unbounded_channel();
        let supervisor = Self {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            failures,
            telemetry,
        };
        (supervisor, receiver)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Spawns `task` under supervision. Errors and panics are reported on
    /// the failure channel under `label`.
    pub fn spawn<F>(&self, label: impl Into<String>, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        let supervisor = self.clone();
        self.tracker.spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => tracing::trace!(task = %label, "background task finished"),
                Ok(Err(err)) => supervisor.report(label, err),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    supervisor.report(label, anyhow!("task panicked: {message}"));
                }
            }
        })
    }

    /// Records a failure and forwards it to the failure channel.
    pub fn report(&self, label: impl Into<String>, error: Error) {
        let failure = TaskFailure {
            label: label.into(),
            error,
        };
        self.telemetry.record_background_failure();
        tracing::warn!(task = %failure.label, error = %failure.error, "background task failed");
        if self.failures.send(failure).is_err() {
            tracing::debug!("failure channel closed; dropping report");
        }
    }

    /// Cancels the shutdown token and waits for every supervised task.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("all background tasks stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
