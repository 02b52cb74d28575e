//! The iteration controller: extract, write, then a bounded evaluate/revise
//! loop.
//!
//! The controller is the only component that decides whether a run goes on.
//! After every step it checks the state for a critical error and stops at
//! once if one exists. Otherwise the loop ends on the first approving
//! evaluation or after `max_iterations` revisions, whichever comes first.
//! Both endings finalize the current draft.
//!
//! Progress checkpoints:
//!
//! | Checkpoint            | Percentage                    |
//! |-----------------------|-------------------------------|
//! | before extract        | 10                            |
//! | before write          | 30                            |
//! | before evaluate `i`   | `40 + 50·i / M`               |
//! | before revise `i`     | `40 + 50·(2i − 1) / 2M`       |
//! | loop finished         | 100                           |
//! | critical error        | stopped                       |
//!
//! where `i` is the number of revisions attempted so far and `M` is
//! `max_iterations`. With `max_iterations = 0` the loop evaluates once at 40
//! and the revise row never fires.
//!
//! The cap counts revisions, not evaluations: the cap is checked after each
//! unapproved evaluation and before the revision it would allow, so a run
//! with `max_iterations = M` performs at most `M` revisions and `M + 1`
//! evaluations. A revision that fails still counts against the cap.

use std::ops::ControlFlow;

use pipeline::{
    ConfigError, ErrorSeverity, Percent, PipelineConfig, PipelineState, Progress,
    ProgressReporter, ProgressUpdate, Step, StepKind, Termination,
};
use tracing::{info, instrument, warn};

use crate::steps::{EvaluateStep, ExtractStep, ReviseStep, StepContext, WriteStep};

const EXTRACT_PERCENT: u32 = 10;
const WRITE_PERCENT: u32 = 30;
const LOOP_START_PERCENT: u32 = 40;
const LOOP_SPAN_PERCENT: u32 = 50;

// ---------------------------------------------------------------------------
// Step registration
// ---------------------------------------------------------------------------

/// The four steps of the workflow, one per slot.
///
/// Slots are named, so a step can only ever be registered once and never
/// shadows another. [`IterationController::new`] also checks that each step
/// reports the [`StepKind`] of its slot.
pub struct PipelineSteps {
    pub extract: Box<dyn Step>,
    pub write: Box<dyn Step>,
    pub evaluate: Box<dyn Step>,
    pub revise: Box<dyn Step>,
}

impl PipelineSteps {
    /// The standard LLM-backed steps, all sharing `context`.
    pub fn standard(context: StepContext) -> Self {
        Self {
            extract: Box::new(ExtractStep::new(context.clone())),
            write: Box::new(WriteStep::new(context.clone())),
            evaluate: Box::new(EvaluateStep::new(context.clone())),
            revise: Box::new(ReviseStep::new(context)),
        }
    }

    fn check_kinds(&self) -> Result<(), ConfigError> {
        let slots: [(StepKind, &dyn Step); 4] = [
            (StepKind::Extract, self.extract.as_ref()),
            (StepKind::Write, self.write.as_ref()),
            (StepKind::Evaluate, self.evaluate.as_ref()),
            (StepKind::Revise, self.revise.as_ref()),
        ];
        for (expected, step) in slots {
            if step.kind() != expected {
                return Err(ConfigError::StepKindMismatch {
                    name: step.name().to_string(),
                    expected: expected.to_string(),
                    actual: step.kind().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for PipelineSteps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSteps")
            .field("extract", &self.extract.name())
            .field("write", &self.write.name())
            .field("evaluate", &self.evaluate.name())
            .field("revise", &self.revise.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Progress bookkeeping
// ---------------------------------------------------------------------------

/// Wraps the host's reporter so that percentages never decrease and exactly
/// one terminal signal is sent.
struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    last: u8,
    finished: bool,
}

impl<'a> ProgressTracker<'a> {
    fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            reporter,
            last: 0,
            finished: false,
        }
    }

    /// Reports a non-terminal checkpoint. Values are held below 100.
    fn checkpoint(&mut self, message: impl Into<String>, percent: u32) {
        let value = Percent::saturating(percent.min(99)).as_u8().max(self.last);
        self.last = value;
        self.send(message.into(), Progress::Percent(Percent::saturating(value.into())));
    }

    fn complete(&mut self, message: impl Into<String>) {
        self.send(message.into(), Progress::Percent(Percent::COMPLETE));
    }

    fn stopped(&mut self, message: impl Into<String>) {
        self.send(message.into(), Progress::Stopped);
    }

    fn send(&mut self, message: String, progress: Progress) {
        if self.finished {
            return;
        }
        self.finished = progress.is_terminal();
        self.reporter.report(ProgressUpdate { message, progress });
    }
}

fn evaluate_percent(revisions: u32, max_iterations: u32) -> u32 {
    let m = u64::from(max_iterations.max(1));
    let i = u64::from(revisions).min(m);
    loop_percent(u64::from(LOOP_SPAN_PERCENT) * i / m)
}

fn revise_percent(revision: u32, max_iterations: u32) -> u32 {
    let m = u64::from(max_iterations.max(1));
    let i = u64::from(revision).clamp(1, m);
    loop_percent(u64::from(LOOP_SPAN_PERCENT) * (2 * i - 1) / (2 * m))
}

// Offsets are at most `LOOP_SPAN_PERCENT` since `i <= m`.
fn loop_percent(offset: u64) -> u32 {
    let offset = u32::try_from(offset).unwrap_or(LOOP_SPAN_PERCENT);
    LOOP_START_PERCENT + offset.min(LOOP_SPAN_PERCENT)
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Runs one job through the registered steps.
#[derive(Debug)]
pub struct IterationController {
    steps: PipelineSteps,
    max_iterations: u32,
}

impl IterationController {
    /// Builds a controller, rejecting mis-registered steps and invalid
    /// configuration.
    pub fn new(steps: PipelineSteps, config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        steps.check_kinds()?;
        Ok(Self {
            steps,
            max_iterations: config.max_iterations,
        })
    }

    /// Maximum number of revisions per run.
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Runs the job to completion and returns the final state.
    ///
    /// Never fails: every fault ends up in the state's error log, and a
    /// critical one ends the run with [`Termination::Stopped`].
    #[instrument(
        name = "pipeline_run",
        skip_all,
        fields(run_id = %state.run_id(), job = %state.input().job, max_iterations = self.max_iterations)
    )]
    pub async fn run(
        &self,
        mut state: PipelineState,
        reporter: &dyn ProgressReporter,
    ) -> PipelineState {
        let mut progress = ProgressTracker::new(reporter);
        info!("Pipeline started");

        if Self::stop_if_critical(&mut state, &mut progress).is_break() {
            return state;
        }

        progress.checkpoint(format!("{}...", self.steps.extract.name()), EXTRACT_PERCENT);
        if self
            .run_step(self.steps.extract.as_ref(), &mut state, &mut progress)
            .await
            .is_break()
        {
            return state;
        }

        progress.checkpoint(format!("{}...", self.steps.write.name()), WRITE_PERCENT);
        if self
            .run_step(self.steps.write.as_ref(), &mut state, &mut progress)
            .await
            .is_break()
        {
            return state;
        }

        let mut revisions = 0u32;
        let mut evaluations = 0u32;
        loop {
            evaluations += 1;
            progress.checkpoint(
                format!("{} (pass {evaluations})...", self.steps.evaluate.name()),
                evaluate_percent(revisions, self.max_iterations),
            );
            if self
                .run_step(self.steps.evaluate.as_ref(), &mut state, &mut progress)
                .await
                .is_break()
            {
                return state;
            }

            let approved = state
                .evaluation
                .as_ref()
                .is_some_and(|report| !report.needs_revision);
            if approved {
                Self::finalize(&mut state);
                state.terminate(Termination::Approved { evaluations });
                info!(evaluations, revisions, "Draft approved");
                progress.complete("Draft approved");
                break;
            }

            if revisions >= self.max_iterations {
                Self::finalize(&mut state);
                state.terminate(Termination::IterationCap { revisions });
                warn!(revisions, "Iteration cap reached; keeping the last draft");
                progress.complete(format!(
                    "Iteration cap reached after {revisions} revision(s); keeping the last draft"
                ));
                break;
            }

            revisions += 1;
            progress.checkpoint(
                format!(
                    "{} ({revisions}/{})...",
                    self.steps.revise.name(),
                    self.max_iterations
                ),
                revise_percent(revisions, self.max_iterations),
            );
            if self
                .run_step(self.steps.revise.as_ref(), &mut state, &mut progress)
                .await
                .is_break()
            {
                return state;
            }
        }

        info!(
            revisions = state.iteration_count(),
            errors = state.errors().len(),
            "Pipeline finished"
        );
        state
    }

    /// Executes one step, recording an escaped fault as critical, and tells
    /// the caller whether the run may continue.
    async fn run_step(
        &self,
        step: &dyn Step,
        state: &mut PipelineState,
        progress: &mut ProgressTracker<'_>,
    ) -> ControlFlow<()> {
        if let Err(err) = step.execute(state).await {
            state.add_error_caused_by(
                step.name(),
                ErrorSeverity::Critical,
                format!("Unexpected error: {err}"),
                &err,
            );
        }
        Self::stop_if_critical(state, progress)
    }

    fn stop_if_critical(
        state: &mut PipelineState,
        progress: &mut ProgressTracker<'_>,
    ) -> ControlFlow<()> {
        let Some(critical) = state.critical_error() else {
            return ControlFlow::Continue(());
        };
        let step = critical.step_name().to_string();
        let message = format!("Stopped at {step}: {}", critical.message());
        state.terminate(Termination::Stopped { step });
        warn!("{message}");
        progress.stopped(message);
        ControlFlow::Break(())
    }

    fn finalize(state: &mut PipelineState) {
        if !state.finalize() {
            warn!("Loop ended without a draft to finalize");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_percentages_interleave() {
        let m = 3;
        let mut points = vec![evaluate_percent(0, m)];
        for i in 1..=m {
            points.push(revise_percent(i, m));
            points.push(evaluate_percent(i, m));
        }
        assert_eq!(points, vec![40, 48, 56, 65, 73, 81, 90]);
        assert!(points.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_zero_cap_still_has_a_checkpoint() {
        assert_eq!(evaluate_percent(0, 0), 40);
    }

    #[test]
    fn test_largest_cap_stays_in_range() {
        let m = u32::MAX;
        assert_eq!(evaluate_percent(0, m), 40);
        assert_eq!(revise_percent(1, m), 40);
        assert_eq!(revise_percent(m, m), 89);
        assert_eq!(evaluate_percent(m, m), 90);
        assert_eq!(evaluate_percent(u32::MAX, 1), 90);
    }

    #[derive(Default)]
    struct Recorder(std::sync::Mutex<Vec<Progress>>);

    impl ProgressReporter for Recorder {
        fn report(&self, update: ProgressUpdate) {
            self.0.lock().expect("lock").push(update.progress);
        }
    }

    #[test]
    fn test_tracker_is_monotonic_and_terminal_once() {
        let recorder = Recorder::default();
        let mut tracker = ProgressTracker::new(&recorder);
        tracker.checkpoint("a", 30);
        tracker.checkpoint("b", 10);
        tracker.checkpoint("c", 250);
        tracker.complete("done");
        tracker.stopped("late");
        tracker.checkpoint("later", 50);

        let seen = recorder.0.lock().expect("lock").clone();
        assert_eq!(
            seen,
            vec![
                Progress::Percent(Percent::saturating(30)),
                Progress::Percent(Percent::saturating(30)),
                Progress::Percent(Percent::saturating(99)),
                Progress::Percent(Percent::COMPLETE),
            ]
        );
    }
}
