//! Run configuration passed explicitly into the controller and steps.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::{Temperature, TokenCount};

/// Default cap on evaluate/revise cycles.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Default upper bound on tokens per generation call.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Parameters shared by every generation call of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Upper bound on generated tokens per call.
    pub max_output_tokens: TokenCount,
    /// Sampling temperature.
    pub temperature: Temperature,
    /// System instructions sent with every call, if any.
    pub system: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: TokenCount::new(DEFAULT_MAX_OUTPUT_TOKENS),
            temperature: Temperature::deterministic(),
            system: None,
        }
    }
}

/// Read-only configuration of the orchestration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of revisions before the last draft is accepted as-is.
    pub max_iterations: u32,
    /// Generation parameters.
    pub generation: GenerationSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            generation: GenerationSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Sets the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Checks the configuration before a run starts.
    ///
    /// A cap of `0` is permitted and means "evaluate once, never revise".
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.max_output_tokens.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "generation.max_output_tokens".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        // Deserialization bypasses `Temperature::new`, so re-check the range.
        if Temperature::new(self.generation.temperature.as_f64()).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "generation.temperature".to_string(),
                message: "must be within [0.0, 1.0]".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.generation.max_output_tokens.as_u32(), 4096);
        assert_eq!(config.generation.temperature.as_f64(), 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_tokens_is_invalid() {
        let mut config = PipelineConfig::default();
        config.generation.max_output_tokens = TokenCount::new(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
