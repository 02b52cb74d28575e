//! Port traits implemented by infrastructure crates.
//!
//! Steps depend only on these traits. The `llm` crate supplies the production
//! implementations; tests supply scripted ones.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::{GenerationError, TemplateError};
use crate::{GenerationSettings, TemplateName, Temperature, TokenCount};

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// A single text-generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// User prompt, fully substituted.
    pub prompt: String,
    /// Upper bound on generated tokens.
    pub max_output_tokens: TokenCount,
    /// Sampling temperature.
    pub temperature: Temperature,
    /// Optional system instructions.
    pub system: Option<String>,
}

impl GenerationRequest {
    /// Creates a request using the configured generation settings.
    pub fn new(prompt: impl Into<String>, settings: &GenerationSettings) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens: settings.max_output_tokens,
            temperature: settings.temperature,
            system: settings.system.clone(),
        }
    }
}

/// The text-generation service.
///
/// Implementations own transport, authentication, and transport-level retry.
/// Callers treat any error as an opaque fault and classify it themselves.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates text for `request`.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Substitution variables for a prompt template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars(BTreeMap<String, String>);

impl TemplateVars {
    /// Creates an empty variable set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a variable.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Looks up a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Resolves named prompt templates into substituted prompt text.
pub trait PromptTemplates: Send + Sync {
    /// Renders template `name` with `vars`.
    ///
    /// # Errors
    ///
    /// [`TemplateError::NotFound`] when the template cannot be located, or any
    /// other [`TemplateError`] when it cannot be read or substituted.
    fn render(&self, name: &TemplateName, vars: &TemplateVars) -> Result<String, TemplateError>;
}
