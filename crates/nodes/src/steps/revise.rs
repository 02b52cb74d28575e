//! Revise step: draft + components + evaluation → revised draft.

use async_trait::async_trait;
use pipeline::{
    ErrorSeverity, PipelineState, Step, StepError, StepKind, TemplateName, TemplateVars,
};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{case_specifics, StepContext};

/// Template used when none is configured.
pub const REVISION_TEMPLATE: &str = "04-revision";

/// Rewrites the draft to address the latest evaluation.
///
/// Without an evaluation this is a no-op. An approving evaluation finalizes
/// the current draft instead of calling the model. Faults here are errors,
/// not critical: the previous draft is still usable output.
#[derive(Debug)]
pub struct ReviseStep {
    context: StepContext,
    template: TemplateName,
}

impl ReviseStep {
    /// Creates the step with the default template.
    pub fn new(context: StepContext) -> Self {
        Self {
            context,
            template: TemplateName::from_static(REVISION_TEMPLATE),
        }
    }

    /// Overrides the template name.
    pub fn with_template(mut self, template: TemplateName) -> Self {
        self.template = template;
        self
    }
}

#[async_trait]
impl Step for ReviseStep {
    fn kind(&self) -> StepKind {
        StepKind::Revise
    }

    fn name(&self) -> &str {
        "Revising draft based on feedback"
    }

    #[instrument(
        skip_all,
        fields(step = "revise", run_id = %state.run_id(), iteration = state.iteration_count())
    )]
    async fn execute(&self, state: &mut PipelineState) -> Result<(), StepError> {
        let Some(evaluation) = state.evaluation.as_ref() else {
            debug!("No evaluation yet; nothing to revise");
            return Ok(());
        };
        if !evaluation.needs_revision {
            info!("Evaluation approved the draft; finalizing");
            state.finalize();
            return Ok(());
        }

        let Some(draft) = state.draft.as_deref() else {
            state.add_error(
                self.name(),
                ErrorSeverity::Error,
                "Cannot revise: no draft text available",
            );
            return Ok(());
        };
        let Some(components) = state.components.as_ref() else {
            state.add_error(
                self.name(),
                ErrorSeverity::Error,
                "Cannot revise: no extracted components available",
            );
            return Ok(());
        };
        let words_before = word_count(draft);

        let outcome = match (
            components.to_prompt_json(),
            serde_json::to_string_pretty(evaluation),
        ) {
            (Ok(components), Ok(evaluation)) => {
                let vars = TemplateVars::new()
                    .with("components", components)
                    .with("draft", draft)
                    .with("evaluation", evaluation)
                    .with("case_specifics", case_specifics(state));
                self.context.complete(&self.template, &vars).await
            }
            (Err(err), _) => Err(StepError::from(err)),
            (_, Err(err)) => Err(StepError::Internal(format!(
                "evaluation could not be serialized: {err}"
            ))),
        };

        match outcome {
            Ok(response) if response.trim().is_empty() => state.add_error(
                self.name(),
                ErrorSeverity::Error,
                "Revision returned empty text",
            ),
            Ok(response) => {
                let revised = response.trim().to_string();
                let words_after = word_count(&revised);
                let revision = state.record_revision(revised.clone());
                state.record_output(format!("revision_{revision}"), Value::String(revised));
                info!(
                    revision,
                    words_before,
                    words_after,
                    delta = words_after as i64 - words_before as i64,
                    "Draft revised"
                );
            }
            Err(err) => state.add_error_caused_by(
                self.name(),
                ErrorSeverity::Error,
                format!("Revision failed: {err}"),
                &err,
            ),
        }
        Ok(())
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
