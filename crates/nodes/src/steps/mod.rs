//! The four step implementations.
//!
//! Each step renders its prompt template, calls the generation service once
//! and classifies every fault into a severity on the state. None of them
//! returns `Err` for an expected failure.

mod context;
mod evaluate;
mod extract;
mod revise;
mod write;

pub use context::StepContext;
pub use evaluate::{EvaluateStep, EVALUATION_TEMPLATE};
pub use extract::{ExtractStep, EXTRACTION_TEMPLATE};
pub use revise::{ReviseStep, REVISION_TEMPLATE};
pub use write::{WriteStep, WRITING_TEMPLATE};

use pipeline::PipelineState;

/// Substituted for `case_specifics` when the job has none.
pub const NO_CASE_SPECIFICS: &str = "None provided";

/// The case-specific instructions of the job, or [`NO_CASE_SPECIFICS`].
pub(crate) fn case_specifics(state: &PipelineState) -> String {
    state
        .input()
        .case_specifics
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_CASE_SPECIFICS)
        .to_string()
}
