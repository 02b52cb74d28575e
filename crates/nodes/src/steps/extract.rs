//! Extract step: raw interview notes → structured components.

use async_trait::async_trait;
use pipeline::{
    ComponentValue, ErrorSeverity, ExtractedComponents, PipelineState, Step, StepError, StepKind,
    TemplateName, TemplateVars,
};
use serde_json::Value;
use tracing::{info, instrument};

use super::StepContext;

/// Template used when none is configured.
pub const EXTRACTION_TEMPLATE: &str = "01-extraction";

const PREVIEW_CHARS: usize = 60;

/// Asks the model for the components of the document and stores them on the
/// state.
///
/// Classification:
/// - template or generation fault → critical;
/// - response without a parseable JSON object → critical;
/// - an object with no components → error (the run continues, but the write
///   step will stop it for lack of input).
#[derive(Debug)]
pub struct ExtractStep {
    context: StepContext,
    template: TemplateName,
}

impl ExtractStep {
    /// Creates the step with the default template.
    pub fn new(context: StepContext) -> Self {
        Self {
            context,
            template: TemplateName::from_static(EXTRACTION_TEMPLATE),
        }
    }

    /// Overrides the template name.
    pub fn with_template(mut self, template: TemplateName) -> Self {
        self.template = template;
        self
    }
}

#[async_trait]
impl Step for ExtractStep {
    fn kind(&self) -> StepKind {
        StepKind::Extract
    }

    fn name(&self) -> &str {
        "Extracting components from notes"
    }

    #[instrument(skip_all, fields(step = "extract", run_id = %state.run_id()))]
    async fn execute(&self, state: &mut PipelineState) -> Result<(), StepError> {
        info!(chars = state.input().notes.len(), "Reading interview notes");
        let vars = TemplateVars::new().with("notes", state.input().notes.as_str());

        let response = match self.context.complete(&self.template, &vars).await {
            Ok(response) => response,
            Err(err) => {
                state.add_error_caused_by(
                    self.name(),
                    ErrorSeverity::Critical,
                    format!("Extraction failed: {err}"),
                    &err,
                );
                return Ok(());
            }
        };

        match ExtractedComponents::from_response(&response) {
            Ok(components) if components.is_empty() => {
                state.add_error(
                    self.name(),
                    ErrorSeverity::Error,
                    "Extraction returned empty result",
                );
            }
            Ok(components) => {
                log_components(&components);
                state.record_output("extraction", components.to_value());
                state.components = Some(components);
            }
            Err(err) => {
                state.record_output("extraction", Value::String(response));
                state.add_error_caused_by(
                    self.name(),
                    ErrorSeverity::Critical,
                    format!("Extraction response was malformed: {err}"),
                    &err,
                );
            }
        }
        Ok(())
    }
}

fn log_components(components: &ExtractedComponents) {
    info!(
        found = components.len(),
        missing = components.missing().len(),
        "Extraction complete"
    );
    for (name, value) in components.iter() {
        match value {
            ComponentValue::Missing => info!(component = name, "missing"),
            ComponentValue::Present(Value::Array(items)) => {
                info!(component = name, items = items.len(), "present")
            }
            ComponentValue::Present(other) => {
                let text = match other {
                    Value::String(s) => s.clone(),
                    v => v.to_string(),
                };
                let preview: String = text.chars().take(PREVIEW_CHARS).collect();
                let ellipsis = if text.chars().count() > PREVIEW_CHARS { "..." } else { "" };
                info!(component = name, "present: {preview}{ellipsis}")
            }
        }
    }
}
