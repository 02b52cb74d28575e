//! Affiant pipeline steps, iteration controller and background runner.
//!
//! This crate provides the four step implementations (extract, write,
//! evaluate, revise), the [`IterationController`] that sequences them through
//! a bounded evaluate/revise loop, and the [`PipelineRunner`] that executes a
//! run on a background task and reports over a channel.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Steps sequence calls between the domain types in
//! the [`pipeline`] crate and the generation and template ports. They contain
//! no I/O of their own; the `llm` crate supplies the port implementations.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`steps`] | `ExtractStep`, `WriteStep`, `EvaluateStep`, `ReviseStep`, `StepContext` |
//! | [`controller`] | `IterationController`, `PipelineSteps` |
//! | [`runner`] | `PipelineRunner`, `RunHandle`, `RunEvent` |

pub mod controller;
pub mod runner;
pub mod steps;

pub use controller::{IterationController, PipelineSteps};
pub use runner::{PipelineRunner, RunEvent, RunHandle, RunnerError};
pub use steps::{
    EvaluateStep, ExtractStep, ReviseStep, StepContext, WriteStep, EVALUATION_TEMPLATE,
    EXTRACTION_TEMPLATE, NO_CASE_SPECIFICS, REVISION_TEMPLATE, WRITING_TEMPLATE,
};
