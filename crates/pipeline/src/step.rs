//! The step abstraction.
//!
//! A step is one named transformation of the run state. Each step records the
//! faults it can classify on the state itself and returns `Ok(())`; returning
//! `Err` means a fault escaped classification, which the controller records as
//! critical.

use async_trait::async_trait;

use crate::errors::StepError;
use crate::PipelineState;

/// Which slot of the workflow a step fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Raw notes → structured components.
    Extract,
    /// Components → draft.
    Write,
    /// Draft + components → evaluation report.
    Evaluate,
    /// Draft + components + report → revised draft.
    Revise,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StepKind::Extract => "extract",
            StepKind::Write => "write",
            StepKind::Evaluate => "evaluate",
            StepKind::Revise => "revise",
        };
        f.write_str(label)
    }
}

/// A unit of work applied to the run state.
#[async_trait]
pub trait Step: Send + Sync {
    /// Slot this step fills.
    fn kind(&self) -> StepKind;

    /// Human-readable name, used in progress messages and error attribution.
    fn name(&self) -> &str;

    /// Applies the step to `state`.
    async fn execute(&self, state: &mut PipelineState) -> Result<(), StepError>;
}
