//! Error model for the Affiant pipeline domain.
//!
//! Two kinds of error live here:
//!
//! - The **recorded** error model: [`ErrorSeverity`] and [`PipelineError`].
//!   Steps classify every fault they observe into one of four severities and
//!   append a [`PipelineError`] to the run state. Only
//!   [`ErrorSeverity::Critical`] stops a run.
//! - The **raised** error types: per-concern `thiserror` enums returned by the
//!   ports ([`GenerationError`], [`TemplateError`]), by payload extraction
//!   ([`PayloadError`]), by configuration validation ([`ConfigError`]), and the
//!   [`StepError`] that a step returns when a fault escapes it. The iteration
//!   controller records any escaped [`StepError`] as critical.
//!
//! [`RetryPolicy`] is a transport concern: the generation provider uses it to
//! decide whether to re-issue a request. The orchestration core never
//! inspects it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Timestamp;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: transport timeouts, rate-limit responses, overloaded
///   or 5xx service responses.
/// - `NonRetryable` errors: authentication failures, malformed requests,
///   invalid client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Recorded errors
// ---------------------------------------------------------------------------

/// Impact of an observed fault on run continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Non-blocking observation.
    Info,
    /// Non-blocking, noteworthy.
    Warning,
    /// The step's output is degraded or partial; the run continues.
    Error,
    /// The run cannot continue and stops after the current step.
    Critical,
}

impl ErrorSeverity {
    /// Returns `true` only for [`ErrorSeverity::Critical`].
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorSeverity::Critical)
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorSeverity::Info => "info",
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------

/// A single fault observation recorded on the run state.
///
/// Created once and never mutated; the state only ever appends these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    step_name: String,
    severity: ErrorSeverity,
    message: String,
    /// Rendered source chain of the underlying failure, for diagnostics only.
    cause: Option<String>,
    occurred_at: Timestamp,
}

impl PipelineError {
    /// Creates a new error record stamped with the current time.
    pub fn new(
        step_name: impl Into<String>,
        severity: ErrorSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            severity,
            message: message.into(),
            cause: None,
            occurred_at: Timestamp::now(),
        }
    }

    /// Attaches the underlying failure (rendered with its full source chain).
    pub fn caused_by(mut self, cause: &(dyn std::error::Error + 'static)) -> Self {
        self.cause = Some(render_chain(cause));
        self
    }

    /// Name of the step the fault is attributed to.
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Severity assigned by the observing step.
    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rendered underlying failure, if one was captured.
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// When the fault was recorded.
    pub fn occurred_at(&self) -> Timestamp {
        self.occurred_at
    }

    /// Shorthand for `self.severity().is_fatal()`.
    pub fn is_critical(&self) -> bool {
        self.severity.is_fatal()
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.step_name, self.message)
    }
}

/// Joins an error and all of its sources into one line.
fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        rendered.push_str(": ");
        rendered.push_str(&inner.to_string());
        source = inner.source();
    }
    rendered
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Faults of the text-generation call.
///
/// The orchestration core treats every variant alike; the distinction exists
/// for the provider's own retry loop and for diagnostics.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The request could not be sent or the connection failed.
    #[error("Request failed: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// `true` when the failure was a client-side timeout.
        timed_out: bool,
    },

    /// The service answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the service (or the raw body).
        message: String,
    },

    /// The service rejected the request because of rate limiting.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Error message reported by the service.
        message: String,
        /// Delay requested by the service, if it sent one.
        retry_after: Option<Duration>,
    },

    /// The response body could not be decoded or held no text.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The provider is misconfigured (missing key, unbuildable client).
    #[error("Provider configuration error: {0}")]
    Configuration(String),
}

impl GenerationError {
    /// Classifies the error for the provider's retry loop.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            GenerationError::Transport { .. } => RetryPolicy::Retryable { after: None },
            GenerationError::RateLimited { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            // 529 is the service's "overloaded" status.
            GenerationError::Api { status, .. } if *status >= 500 || *status == 408 => {
                RetryPolicy::Retryable { after: None }
            }
            GenerationError::Api { .. }
            | GenerationError::InvalidResponse(_)
            | GenerationError::Configuration(_) => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------

/// Faults of prompt template resolution.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// No template with the given name exists.
    #[error("Prompt template '{name}' not found at {path}")]
    NotFound {
        /// Requested template name.
        name: String,
        /// Location that was searched.
        path: String,
    },

    /// The template exists but could not be read.
    #[error("Failed to read prompt template '{name}'")]
    Unreadable {
        /// Requested template name.
        name: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The template references a variable that was not supplied.
    #[error("Prompt template '{name}' references unknown variable '{variable}'")]
    MissingVariable {
        /// Template name.
        name: String,
        /// Placeholder without a value.
        variable: String,
    },

    /// The template text contains an unbalanced brace.
    #[error("Prompt template '{name}' is malformed: {message}")]
    Malformed {
        /// Template name.
        name: String,
        /// Description of the problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------

/// Faults locating or decoding a structured payload in a generation response.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The response contained nothing to parse.
    #[error("Response contained no structured payload")]
    Empty,

    /// The located payload is not valid JSON or does not match the expected shape.
    #[error("Failed to parse structured payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// The payload is valid JSON of the wrong kind.
    #[error("Unexpected payload shape: expected {expected}, found {found}")]
    Shape {
        /// What the caller expected (e.g. `"object"`).
        expected: &'static str,
        /// What was found.
        found: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Step and configuration errors
// ---------------------------------------------------------------------------

/// A fault that escaped a step without being recorded on the state.
///
/// The iteration controller converts any `StepError` into a critical
/// [`PipelineError`] attributed to the failing step.
#[derive(Debug, Error)]
pub enum StepError {
    /// Unclassified generation fault.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Unclassified template fault.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Unclassified payload fault.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Any other failure inside a step.
    #[error("Internal step failure: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------

/// Invalid configuration, detected before a run starts.
///
/// The pipeline never starts with an invalid configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A value is outside its permitted range.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// A step was registered in a slot meant for a different kind of step.
    #[error("Step '{name}' is a {actual} step but was registered as the {expected} step")]
    StepKindMismatch {
        /// Display name of the offending step.
        name: String,
        /// Slot it was registered in.
        expected: String,
        /// Kind it reports.
        actual: String,
    },
}
