//! Collaborators shared by every step.

use std::sync::Arc;

use pipeline::{
    GenerationRequest, GenerationSettings, PromptTemplates, StepError, TemplateName,
    TemplateVars, TextGenerator,
};
use tracing::debug;

/// The generation service, the template source, and the generation
/// parameters, bundled so each step is constructed from one value.
#[derive(Clone)]
pub struct StepContext {
    generator: Arc<dyn TextGenerator>,
    templates: Arc<dyn PromptTemplates>,
    settings: GenerationSettings,
}

impl StepContext {
    /// Creates a context.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        templates: Arc<dyn PromptTemplates>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            generator,
            templates,
            settings,
        }
    }

    /// Generation parameters applied to every call.
    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Renders `template` with `vars` and sends it to the generator.
    pub(crate) async fn complete(
        &self,
        template: &TemplateName,
        vars: &TemplateVars,
    ) -> Result<String, StepError> {
        let prompt = self.templates.render(template, vars)?;
        debug!(
            template = %template,
            prompt_chars = prompt.len(),
            max_tokens = %self.settings.max_output_tokens,
            temperature = %self.settings.temperature,
            "Calling generation service"
        );
        let response = self
            .generator
            .generate(GenerationRequest::new(prompt, &self.settings))
            .await?;
        debug!(template = %template, response_chars = response.len(), "Received response");
        Ok(response)
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
