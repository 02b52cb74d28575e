//! Evaluate step: draft + components → evaluation report.

use async_trait::async_trait;
use pipeline::{
    ErrorSeverity, EvaluationReport, PipelineState, Step, StepError, StepKind, TemplateName,
    TemplateVars,
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{case_specifics, StepContext};

/// Template used when none is configured.
pub const EVALUATION_TEMPLATE: &str = "03-evaluation";

/// Checks the current draft against the extracted components.
///
/// Missing inputs and generation faults are critical. An unparseable
/// evaluation is recorded as an error and replaced by
/// [`EvaluationReport::degraded`], so the loop revises and evaluates again.
#[derive(Debug)]
pub struct EvaluateStep {
    context: StepContext,
    template: TemplateName,
}

impl EvaluateStep {
    /// Creates the step with the default template.
    pub fn new(context: StepContext) -> Self {
        Self {
            context,
            template: TemplateName::from_static(EVALUATION_TEMPLATE),
        }
    }

    /// Overrides the template name.
    pub fn with_template(mut self, template: TemplateName) -> Self {
        self.template = template;
        self
    }
}

#[async_trait]
impl Step for EvaluateStep {
    fn kind(&self) -> StepKind {
        StepKind::Evaluate
    }

    fn name(&self) -> &str {
        "Evaluating draft against sources"
    }

    #[instrument(
        skip_all,
        fields(step = "evaluate", run_id = %state.run_id(), iteration = state.iteration_count())
    )]
    async fn execute(&self, state: &mut PipelineState) -> Result<(), StepError> {
        let Some(draft) = state.draft.as_deref() else {
            state.add_error(
                self.name(),
                ErrorSeverity::Critical,
                "Cannot evaluate: no draft text available",
            );
            return Ok(());
        };
        let Some(components) = state.components.as_ref() else {
            state.add_error(
                self.name(),
                ErrorSeverity::Critical,
                "Cannot evaluate: no extracted components available",
            );
            return Ok(());
        };

        let outcome = match components.to_prompt_json() {
            Ok(json) => {
                let vars = TemplateVars::new()
                    .with("components", json)
                    .with("draft", draft)
                    .with("case_specifics", case_specifics(state));
                self.context.complete(&self.template, &vars).await
            }
            Err(err) => Err(StepError::from(err)),
        };
        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                state.add_error_caused_by(
                    self.name(),
                    ErrorSeverity::Critical,
                    format!("Evaluation failed: {err}"),
                    &err,
                );
                return Ok(());
            }
        };

        let report = match EvaluationReport::from_response(&response) {
            Ok(report) => {
                log_findings(&report);
                report
            }
            Err(err) => {
                state.add_error_caused_by(
                    self.name(),
                    ErrorSeverity::Error,
                    format!("Failed to parse evaluation JSON: {err}"),
                    &err,
                );
                EvaluationReport::degraded(err.to_string())
            }
        };

        let label = format!("evaluation_{}", state.iteration_count());
        let recorded = serde_json::to_value(&report).unwrap_or_else(|_| Value::String(response));
        state.record_output(label, recorded);
        state.evaluation = Some(report);
        Ok(())
    }
}

fn log_findings(report: &EvaluationReport) {
    if report.needs_revision {
        warn!(
            unsupported = report.unsupported_statements.len(),
            uncertain = report.uncertain_statements.len(),
            missing = report.missing_elements.len(),
            passive_voice = report.passive_voice_issues.len(),
            ing_words = report.ing_word_issues.len(),
            "Issues found; revision required"
        );
    } else if report.has_no_findings() {
        info!("Draft approved - no issues found");
    } else {
        info!(
            passive_voice = report.passive_voice_issues.len(),
            ing_words = report.ing_word_issues.len(),
            "Draft approved with non-blocking grammar warnings"
        );
    }
}
