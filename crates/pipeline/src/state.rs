//! The run state threaded through every step.
//!
//! A [`PipelineState`] is created once per job and handed by `&mut` to one
//! step at a time, so the borrow checker enforces the sole-writer discipline:
//! the controller owns it between steps, the executing step owns it while it
//! runs, and nothing else can observe a partial write.
//!
//! Input fields are private and only readable after construction. The
//! intermediate artifacts are public fields because each one is written by a
//! single step in another crate. The final text, the iteration counter, the
//! error log and the termination record are only reachable through methods
//! that preserve their invariants.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::errors::{ErrorSeverity, PayloadError, PipelineError};
use crate::payload::parse_payload;
use crate::{JobName, RunId};

/// Marker the extraction model uses for a component it could not find.
pub const MISSING_MARKER: &str = "MISSING";

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Caller-supplied inputs of a job. Fixed for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    /// Raw interview notes.
    pub notes: String,
    /// Directory the caller will render output into.
    pub output_dir: PathBuf,
    /// Name of the job (the case name).
    pub job: JobName,
    /// Optional free-text guidance for the evaluation and revision steps.
    pub case_specifics: Option<String>,
}

// ---------------------------------------------------------------------------
// Extracted components
// ---------------------------------------------------------------------------

/// Value of a single extracted component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentValue {
    /// The model reported the component as absent from the notes.
    Missing,
    /// Any JSON value the model produced.
    Present(Value),
}

impl ComponentValue {
    /// Returns `true` for [`ComponentValue::Missing`].
    pub fn is_missing(&self) -> bool {
        matches!(self, ComponentValue::Missing)
    }
}

impl From<Value> for ComponentValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ComponentValue::Missing,
            Value::String(ref s) if s.trim() == MISSING_MARKER => ComponentValue::Missing,
            other => ComponentValue::Present(other),
        }
    }
}

impl Serialize for ComponentValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ComponentValue::Missing => serializer.serialize_str(MISSING_MARKER),
            ComponentValue::Present(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ComponentValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ComponentValue::from)
    }
}

/// Named components extracted from the notes.
///
/// Missing markers are kept as [`ComponentValue::Missing`] and serialize back
/// to [`MISSING_MARKER`], so later prompts see exactly what extraction saw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedComponents(BTreeMap<String, ComponentValue>);

impl ExtractedComponents {
    /// Builds the component map from a decoded JSON payload.
    ///
    /// `null` and empty containers yield an empty map; any other non-object
    /// payload is a [`PayloadError::Shape`].
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::Object(map) => Ok(Self(
                map.into_iter()
                    .map(|(name, value)| (name, ComponentValue::from(value)))
                    .collect(),
            )),
            Value::Null => Ok(Self::default()),
            Value::Array(items) if items.is_empty() => Ok(Self::default()),
            other => Err(PayloadError::Shape {
                expected: "object",
                found: json_kind(&other),
            }),
        }
    }

    /// Locates the structured payload in a raw response and builds the map.
    pub fn from_response(response: &str) -> Result<Self, PayloadError> {
        Self::from_value(parse_payload(response)?)
    }

    /// Number of components, missing ones included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Looks up a component by name.
    pub fn get(&self, name: &str) -> Option<&ComponentValue> {
        self.0.get(name)
    }

    /// Iterates components in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComponentValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names of components reported as missing.
    pub fn missing(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, v)| v.is_missing())
            .map(|(k, _)| k)
            .collect()
    }

    /// Pretty-printed JSON for inclusion in prompts.
    pub fn to_prompt_json(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain JSON value, for the debug output map.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        ComponentValue::Missing => Value::String(MISSING_MARKER.to_string()),
                        ComponentValue::Present(value) => value.clone(),
                    };
                    (k.clone(), value)
                })
                .collect(),
        )
    }
}

impl FromIterator<(String, ComponentValue)> for ExtractedComponents {
    fn from_iter<I: IntoIterator<Item = (String, ComponentValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Evaluation report
// ---------------------------------------------------------------------------

/// Findings of one evaluation pass over the draft.
///
/// Issue entries are kept as raw JSON because their shape is defined by the
/// evaluation prompt, not by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Whether the draft must be revised before it can be accepted.
    pub needs_revision: bool,
    /// Statements not backed by the extracted components. Blocking.
    #[serde(default)]
    pub unsupported_statements: Vec<Value>,
    /// Statements the notes only support tentatively. Blocking.
    #[serde(default)]
    pub uncertain_statements: Vec<Value>,
    /// Required elements absent from the draft. Blocking.
    #[serde(default)]
    pub missing_elements: Vec<Value>,
    /// Passive-voice constructions. Non-blocking.
    #[serde(default)]
    pub passive_voice_issues: Vec<Value>,
    /// Progressive "-ing" verb forms. Non-blocking.
    #[serde(default)]
    pub ing_word_issues: Vec<Value>,
    /// Set when this report is the substitute for an unparseable response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// Evaluation payload as the model sends it; every field is optional.
#[derive(Debug, Deserialize)]
struct RawEvaluation {
    needs_revision: Option<bool>,
    unsupported_statements: Option<Vec<Value>>,
    uncertain_statements: Option<Vec<Value>>,
    missing_elements: Option<Vec<Value>>,
    passive_voice_issues: Option<Vec<Value>>,
    ing_word_issues: Option<Vec<Value>>,
}

impl EvaluationReport {
    /// Parses an evaluation response.
    ///
    /// `needs_revision` is derived from the findings: any blocking issue forces
    /// it on; grammar-only findings force it off; with no findings at all the
    /// model's own flag is used, defaulting to `true` when it sent none.
    pub fn from_response(response: &str) -> Result<Self, PayloadError> {
        let raw: RawEvaluation = parse_payload(response)?;
        let mut report = Self {
            needs_revision: false,
            unsupported_statements: raw.unsupported_statements.unwrap_or_default(),
            uncertain_statements: raw.uncertain_statements.unwrap_or_default(),
            missing_elements: raw.missing_elements.unwrap_or_default(),
            passive_voice_issues: raw.passive_voice_issues.unwrap_or_default(),
            ing_word_issues: raw.ing_word_issues.unwrap_or_default(),
            parse_error: None,
        };
        report.needs_revision = if report.blocking_issue_count() > 0 {
            true
        } else if report.grammar_issue_count() > 0 {
            false
        } else {
            raw.needs_revision.unwrap_or(true)
        };
        Ok(report)
    }

    /// The substitute report used when an evaluation response cannot be parsed:
    /// revision required, no findings.
    pub fn degraded(parse_error: impl Into<String>) -> Self {
        Self {
            needs_revision: true,
            unsupported_statements: Vec::new(),
            uncertain_statements: Vec::new(),
            missing_elements: Vec::new(),
            passive_voice_issues: Vec::new(),
            ing_word_issues: Vec::new(),
            parse_error: Some(parse_error.into()),
        }
    }

    /// An approving report with no findings.
    pub fn approved() -> Self {
        Self {
            needs_revision: false,
            unsupported_statements: Vec::new(),
            uncertain_statements: Vec::new(),
            missing_elements: Vec::new(),
            passive_voice_issues: Vec::new(),
            ing_word_issues: Vec::new(),
            parse_error: None,
        }
    }

    /// Unsupported + uncertain + missing.
    pub fn blocking_issue_count(&self) -> usize {
        self.unsupported_statements.len()
            + self.uncertain_statements.len()
            + self.missing_elements.len()
    }

    /// Passive voice + "-ing" forms.
    pub fn grammar_issue_count(&self) -> usize {
        self.passive_voice_issues.len() + self.ing_word_issues.len()
    }

    /// Returns `true` when no issue list has entries.
    pub fn has_no_findings(&self) -> bool {
        self.blocking_issue_count() == 0 && self.grammar_issue_count() == 0
    }
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

/// How a run ended. Recorded once by the iteration controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Termination {
    /// An evaluation approved the draft.
    Approved {
        /// Number of evaluation passes run, the approving one included.
        evaluations: u32,
    },
    /// The iteration cap was reached; the last draft was kept.
    IterationCap {
        /// Revisions attempted before the cap applied.
        revisions: u32,
    },
    /// A critical error stopped the run.
    Stopped {
        /// Name of the step that recorded the critical error.
        step: String,
    },
}

impl Termination {
    /// `true` unless the run was stopped.
    pub fn is_success(&self) -> bool {
        !matches!(self, Termination::Stopped { .. })
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything one run knows, from its inputs to its final text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    run_id: RunId,
    input: JobInput,

    /// Written by the extract step.
    pub components: Option<ExtractedComponents>,
    /// Written by the write step, replaced by each revision.
    pub draft: Option<String>,
    /// Written by the evaluate step.
    pub evaluation: Option<EvaluationReport>,

    final_text: Option<String>,
    iteration_count: u32,
    errors: Vec<PipelineError>,
    step_outputs: BTreeMap<String, Value>,
    termination: Option<Termination>,
}

impl PipelineState {
    /// Creates the initial state for a job.
    pub fn new(input: JobInput) -> Self {
        Self {
            run_id: RunId::new(),
            input,
            components: None,
            draft: None,
            evaluation: None,
            final_text: None,
            iteration_count: 0,
            errors: Vec::new(),
            step_outputs: BTreeMap::new(),
            termination: None,
        }
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The job inputs.
    pub fn input(&self) -> &JobInput {
        &self.input
    }

    /// Accepted text, set only when the evaluate/revise loop ends without a
    /// critical error.
    pub fn final_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }

    /// Accepts the current draft as the final text.
    ///
    /// Returns `false` (and changes nothing) when there is no draft.
    pub fn finalize(&mut self) -> bool {
        match &self.draft {
            Some(draft) => {
                self.final_text = Some(draft.clone());
                true
            }
            None => false,
        }
    }

    /// Number of revisions actually performed.
    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    /// Replaces the draft with a revision and counts it. Returns the new count.
    pub fn record_revision(&mut self, revised: String) -> u32 {
        self.draft = Some(revised);
        self.iteration_count += 1;
        self.iteration_count
    }

    /// Every recorded error, in order of observation.
    pub fn errors(&self) -> &[PipelineError] {
        &self.errors
    }

    /// Records an error and logs it at the matching level.
    pub fn add_error(
        &mut self,
        step_name: &str,
        severity: ErrorSeverity,
        message: impl Into<String>,
    ) {
        self.push_error(PipelineError::new(step_name, severity, message));
    }

    /// Records an error together with the failure that caused it.
    pub fn add_error_caused_by(
        &mut self,
        step_name: &str,
        severity: ErrorSeverity,
        message: impl Into<String>,
        cause: &(dyn std::error::Error + 'static),
    ) {
        self.push_error(PipelineError::new(step_name, severity, message).caused_by(cause));
    }

    fn push_error(&mut self, record: PipelineError) {
        let cause = record.cause().unwrap_or_default();
        match record.severity() {
            ErrorSeverity::Info => {
                info!(step = record.step_name(), cause, "{}", record.message())
            }
            ErrorSeverity::Warning => {
                warn!(step = record.step_name(), cause, "{}", record.message())
            }
            ErrorSeverity::Error | ErrorSeverity::Critical => error!(
                step = record.step_name(),
                severity = %record.severity(),
                cause,
                "{}",
                record.message()
            ),
        }
        self.errors.push(record);
    }

    /// `true` once any critical error has been recorded.
    pub fn has_critical_error(&self) -> bool {
        self.errors.iter().any(PipelineError::is_critical)
    }

    /// The first critical error, if any.
    pub fn critical_error(&self) -> Option<&PipelineError> {
        self.errors.iter().find(|e| e.is_critical())
    }

    /// Stores a step's raw output under a label, for traceability only.
    pub fn record_output(&mut self, label: impl Into<String>, output: Value) {
        self.step_outputs.insert(label.into(), output);
    }

    /// Raw step outputs by label.
    pub fn step_outputs(&self) -> &BTreeMap<String, Value> {
        &self.step_outputs
    }

    /// How the run ended, once it has.
    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Records how the run ended. Only the first call has an effect.
    pub fn terminate(&mut self, termination: Termination) {
        if self.termination.is_none() {
            self.termination = Some(termination);
        }
    }
}
