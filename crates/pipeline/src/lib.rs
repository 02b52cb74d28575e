//! Core orchestration domain for Affiant.
//!
//! This crate contains every domain concept used by the drafting pipeline: the
//! run state, the error model, the step abstraction, the progress contract,
//! and the port traits for text generation and prompt templates.
//! Infrastructure crates implement the traits defined here; they never add
//! domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`JobName`, `RunId`, `TemplateName`) |
//! | [`types`] | Value types (`TokenCount`, `Temperature`, `Percent`, `Timestamp`) |
//! | [`errors`] | Severity model, recorded errors, and raised error types |
//! | [`state`] | `PipelineState` and the artifacts it carries |
//! | [`step`] | The `Step` trait and `StepKind` tag |
//! | [`progress`] | Progress and completion contracts |
//! | [`ports`] | `TextGenerator` and `PromptTemplates` |
//! | [`payload`] | Structured payload extraction from raw responses |
//! | [`config`] | `PipelineConfig` and `GenerationSettings` |

pub mod config;
pub mod errors;
pub mod identifiers;
pub mod payload;
pub mod ports;
pub mod progress;
pub mod state;
pub mod step;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{GenerationSettings, PipelineConfig, DEFAULT_MAX_ITERATIONS};
pub use errors::{
    ConfigError, ErrorSeverity, GenerationError, PayloadError, PipelineError, RetryPolicy,
    StepError, TemplateError,
};
pub use identifiers::{JobName, RunId, TemplateName};
pub use payload::{locate_payload, parse_payload};
pub use ports::{GenerationRequest, PromptTemplates, TemplateVars, TextGenerator};
pub use progress::{Completion, NoopReporter, Progress, ProgressReporter, ProgressUpdate};
pub use state::{
    ComponentValue, EvaluationReport, ExtractedComponents, JobInput, PipelineState, Termination,
    MISSING_MARKER,
};
pub use step::{Step, StepKind};
pub use types::{Percent, Temperature, Timestamp, TokenCount};
