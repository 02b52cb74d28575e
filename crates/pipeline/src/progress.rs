//! Progress and completion contracts with the host.
//!
//! The controller reports through [`ProgressReporter`]; the host decides how
//! updates travel (the `nodes` runner forwards them over a channel). A run
//! sends zero or more percentages, then exactly one terminal update: either
//! [`Percent::COMPLETE`] or [`Progress::Stopped`].

use serde::{Deserialize, Serialize};

use crate::{Percent, PipelineState};

/// Either a completion percentage or the distinguished "stopped" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    /// Advisory completion percentage, non-decreasing within a run.
    Percent(Percent),
    /// The run was stopped by a critical error.
    Stopped,
}

impl Progress {
    /// Returns `true` for the two terminal signals.
    pub fn is_terminal(self) -> bool {
        matches!(self, Progress::Stopped | Progress::Percent(Percent::COMPLETE))
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Progress::Percent(p) => write!(f, "{p}"),
            Progress::Stopped => f.write_str("stopped"),
        }
    }
}

/// One status message for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Human-readable status.
    pub message: String,
    /// Percentage or stop signal.
    pub progress: Progress,
}

/// Sink for progress updates.
///
/// Implementations must be callable from whatever task executes the run.
pub trait ProgressReporter: Send + Sync {
    /// Receives one update.
    fn report(&self, update: ProgressUpdate);
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _update: ProgressUpdate) {}
}

/// The single completion notification of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Summary for the user.
    pub message: String,
    /// `false` iff the final state carries a critical error.
    pub success: bool,
}

impl Completion {
    /// Summarizes a finished run.
    pub fn from_state(state: &PipelineState) -> Self {
        let job = &state.input().job;
        if let Some(critical) = state.critical_error() {
            return Self {
                message: format!(
                    "Pipeline for '{job}' stopped: {} ({})",
                    critical.message(),
                    critical.step_name()
                ),
                success: false,
            };
        }
        let message = match state.termination() {
            Some(crate::Termination::Approved { evaluations }) => format!(
                "Draft for '{job}' approved after {evaluations} evaluation(s) and {} revision(s)",
                state.iteration_count()
            ),
            Some(crate::Termination::IterationCap { revisions }) => format!(
                "Draft for '{job}' kept after reaching the iteration cap ({revisions} revision(s))"
            ),
            Some(crate::Termination::Stopped { step }) => {
                format!("Pipeline for '{job}' stopped at {step}")
            }
            None => format!("Pipeline for '{job}' finished"),
        };
        Self {
            message,
            success: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorSeverity, JobInput, JobName, Termination};

    fn state() -> PipelineState {
        PipelineState::new(JobInput {
            notes: String::new(),
            output_dir: "out".into(),
            job: JobName::new("doe").expect("non-blank"),
            case_specifics: None,
        })
    }

    #[test]
    fn test_terminal_signals() {
        assert!(Progress::Stopped.is_terminal());
        assert!(Progress::Percent(Percent::COMPLETE).is_terminal());
        assert!(!Progress::Percent(Percent::saturating(90)).is_terminal());
    }

    #[test]
    fn test_completion_fails_only_on_critical() {
        let mut state = state();
        state.add_error("Evaluate", ErrorSeverity::Error, "unparseable");
        state.terminate(Termination::IterationCap { revisions: 3 });
        let completion = Completion::from_state(&state);
        assert!(completion.success);
        assert!(completion.message.contains("iteration cap"));

        state.add_error("Revise", ErrorSeverity::Critical, "service down");
        let completion = Completion::from_state(&state);
        assert!(!completion.success);
        assert!(completion.message.contains("service down"));
    }
}
