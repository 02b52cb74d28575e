//! Affiant infrastructure adapters for the generation and template ports.
//!
//! Implements [`pipeline::TextGenerator`] for Anthropic's Messages API and
//! [`pipeline::PromptTemplates`] for a directory of Markdown prompt files.
//! Other providers are added as new types in this crate without any changes
//! to the `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request formatting, response
//! parsing, `retry-after` handling, exponential back-off and file access live
//! here. The [`pipeline`] crate sees only the port traits.

pub mod anthropic;
pub mod templates;

pub use anthropic::{AnthropicConfig, AnthropicProvider, ANTHROPIC_VERSION, DEFAULT_MODEL};
pub use templates::{substitute, FilePromptLoader};
