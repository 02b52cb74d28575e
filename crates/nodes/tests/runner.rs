mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{controller, state, ScriptedGenerator, EXTRACTION};
use nodes::{
    ExtractStep, IterationController, PipelineRunner, PipelineSteps, RunEvent, RunnerError,
    ReviseStep, WriteStep,
};
use pipeline::{PipelineConfig, PipelineState, Progress, Step, StepError, StepKind};

async fn drain(handle: &mut nodes::RunHandle) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_successful_run_ends_with_one_completion() {
    let generator = Arc::new(ScriptedGenerator::standard());
    let runner = PipelineRunner::new(controller(generator, 3));

    let mut handle = runner.spawn(state());
    let events = drain(&mut handle).await;
    let state = handle.wait().await.expect("run finished");

    let completions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Completed(c) => Some(c),
            RunEvent::Progress(_) => None,
        })
        .collect();
    assert_eq!(completions.len(), 1);
    assert!(completions[0].success);
    assert!(matches!(events.last(), Some(RunEvent::Completed(_))));
    assert_eq!(state.iteration_count(), 3);
    assert!(state.final_text().is_some());
}

#[tokio::test]
async fn test_critical_run_reports_failure() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .reply("01-extraction", EXTRACTION)
            .fail("02-writing", 401),
    );
    let runner = PipelineRunner::new(controller(generator, 3));

    let mut handle = runner.spawn(state());
    let events = drain(&mut handle).await;

    match events.as_slice() {
        [.., RunEvent::Progress(stopped), RunEvent::Completed(completion)] => {
            assert_eq!(stopped.progress, Progress::Stopped);
            assert!(!completion.success);
            assert!(completion.message.contains("Draft generation failed"));
        }
        other => panic!("unexpected events: {other:?}"),
    }
    let state = handle.wait().await.expect("run finished");
    assert!(state.has_critical_error());
}

struct PanickingStep;

#[async_trait]
impl Step for PanickingStep {
    fn kind(&self) -> StepKind {
        StepKind::Evaluate
    }

    fn name(&self) -> &str {
        "Panicking step"
    }

    async fn execute(&self, _state: &mut PipelineState) -> Result<(), StepError> {
        panic!("evaluator blew up");
    }
}

#[tokio::test]
async fn test_panicking_run_still_completes_once() {
    let generator = Arc::new(ScriptedGenerator::standard());
    let context = common::context(generator);
    let steps = PipelineSteps {
        extract: Box::new(ExtractStep::new(context.clone())),
        write: Box::new(WriteStep::new(context.clone())),
        evaluate: Box::new(PanickingStep),
        revise: Box::new(ReviseStep::new(context)),
    };
    let controller =
        IterationController::new(steps, &PipelineConfig::default()).expect("valid controller");
    let runner = PipelineRunner::new(controller);

    let mut handle = runner.spawn(state());
    let events = drain(&mut handle).await;

    let completions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Completed(c) => Some(c),
            RunEvent::Progress(_) => None,
        })
        .collect();
    assert_eq!(completions.len(), 1);
    assert!(!completions[0].success);
    let terminals = events
        .iter()
        .filter(|e| matches!(e, RunEvent::Progress(u) if u.progress.is_terminal()))
        .count();
    assert_eq!(terminals, 1);
    assert!(matches!(handle.wait().await, Err(RunnerError::Aborted(_))));
}

#[tokio::test]
async fn test_runs_are_independent() {
    let generator = Arc::new(ScriptedGenerator::standard());
    let runner = PipelineRunner::new(controller(generator, 1));

    let first = runner.spawn(state());
    let second = runner.spawn(state());
    let (first, second) = tokio::join!(first.wait(), second.wait());

    let (first, second) = (first.expect("first"), second.expect("second"));
    assert_ne!(first.run_id(), second.run_id());
    assert_eq!(first.iteration_count(), 1);
    assert_eq!(second.iteration_count(), 1);
}
