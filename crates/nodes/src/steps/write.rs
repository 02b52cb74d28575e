//! Write step: structured components → first draft.

use async_trait::async_trait;
use pipeline::{
    ErrorSeverity, PipelineState, Step, StepError, StepKind, TemplateName, TemplateVars,
};
use serde_json::Value;
use tracing::{info, instrument};

use super::StepContext;

/// Template used when none is configured.
pub const WRITING_TEMPLATE: &str = "02-writing";

/// Produces the first draft from the extracted components.
///
/// Every failure here is critical: without a draft there is nothing to
/// evaluate.
#[derive(Debug)]
pub struct WriteStep {
    context: StepContext,
    template: TemplateName,
}

impl WriteStep {
    /// Creates the step with the default template.
    pub fn new(context: StepContext) -> Self {
        Self {
            context,
            template: TemplateName::from_static(WRITING_TEMPLATE),
        }
    }

    /// Overrides the template name.
    pub fn with_template(mut self, template: TemplateName) -> Self {
        self.template = template;
        self
    }
}

#[async_trait]
impl Step for WriteStep {
    fn kind(&self) -> StepKind {
        StepKind::Write
    }

    fn name(&self) -> &str {
        "Writing draft"
    }

    #[instrument(skip_all, fields(step = "write", run_id = %state.run_id()))]
    async fn execute(&self, state: &mut PipelineState) -> Result<(), StepError> {
        let Some(components) = state.components.as_ref() else {
            state.add_error(
                self.name(),
                ErrorSeverity::Critical,
                "Cannot write draft: no extracted components available",
            );
            return Ok(());
        };

        let outcome = match components.to_prompt_json() {
            Ok(json) => {
                let vars = TemplateVars::new().with("components", json);
                self.context.complete(&self.template, &vars).await
            }
            Err(err) => Err(StepError::from(err)),
        };

        match outcome {
            Ok(response) if response.trim().is_empty() => state.add_error(
                self.name(),
                ErrorSeverity::Critical,
                "Draft generation returned empty text",
            ),
            Ok(response) => {
                let draft = response.trim().to_string();
                info!(chars = draft.len(), "Generated draft");
                state.record_output("writing", Value::String(draft.clone()));
                state.draft = Some(draft);
            }
            Err(err) => state.add_error_caused_by(
                self.name(),
                ErrorSeverity::Critical,
                format!("Draft generation failed: {err}"),
                &err,
            ),
        }
        Ok(())
    }
}
