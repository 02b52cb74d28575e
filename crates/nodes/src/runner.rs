//! Background execution of a run.
//!
//! [`PipelineRunner::spawn`] moves a job onto a tokio task and hands back a
//! [`RunHandle`]. Progress updates and the single completion notification
//! travel over an unbounded channel as [`RunEvent`]s, so the caller never
//! shares memory with the running task.

use std::sync::Arc;

use pipeline::{
    Completion, PipelineState, Progress, ProgressReporter, ProgressUpdate,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::controller::IterationController;

/// One message from a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A progress checkpoint.
    Progress(ProgressUpdate),
    /// The run finished. Always the last event, sent exactly once.
    Completed(Completion),
}

/// Failure of the background task itself, as opposed to a recorded pipeline
/// error.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The task panicked or was cancelled before returning a state.
    #[error("Pipeline task aborted: {0}")]
    Aborted(String),
}

/// Forwards progress updates onto the run's event channel.
struct ChannelReporter {
    events: UnboundedSender<RunEvent>,
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, update: ProgressUpdate) {
        if self.events.send(RunEvent::Progress(update)).is_err() {
            debug!("Event receiver dropped; progress update discarded");
        }
    }
}

/// Spawns runs of a shared controller.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    controller: Arc<IterationController>,
}

impl PipelineRunner {
    /// Wraps a controller for background use.
    pub fn new(controller: IterationController) -> Self {
        Self {
            controller: Arc::new(controller),
        }
    }

    /// Starts `state` on a new task. Must be called within a tokio runtime.
    pub fn spawn(&self, state: PipelineState) -> RunHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Arc::clone(&self.controller);
        let reporter = ChannelReporter { events: tx.clone() };
        let job = state.input().job.clone();

        let run = tokio::spawn(async move { controller.run(state, &reporter).await });

        let join = tokio::spawn(async move {
            let (completion, result) = match run.await {
                Ok(state) => (Completion::from_state(&state), Ok(state)),
                Err(err) => {
                    error!(job = %job, error = %err, "Pipeline task aborted");
                    let message = format!("Pipeline for '{job}' aborted: {err}");
                    let _ = tx.send(RunEvent::Progress(ProgressUpdate {
                        message: message.clone(),
                        progress: Progress::Stopped,
                    }));
                    (
                        Completion {
                            message,
                            success: false,
                        },
                        Err(RunnerError::Aborted(err.to_string())),
                    )
                }
            };
            if tx.send(RunEvent::Completed(completion)).is_err() {
                debug!("Event receiver dropped; completion discarded");
            }
            result
        });

        RunHandle { events: rx, join }
    }
}

/// The caller's side of a spawned run.
#[derive(Debug)]
pub struct RunHandle {
    events: UnboundedReceiver<RunEvent>,
    join: JoinHandle<Result<PipelineState, RunnerError>>,
}

impl RunHandle {
    /// Receives the next event. Returns `None` after the completion event has
    /// been delivered and the run's task has ended.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Waits for the run and returns its final state.
    ///
    /// Undelivered events are discarded.
    pub async fn wait(self) -> Result<PipelineState, RunnerError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(RunnerError::Aborted(err.to_string())),
        }
    }
}
