//! Anthropic Messages API provider.
//!
//! Sends one user message per [`GenerationRequest`] and returns the first text
//! block of the reply. Transport failures, rate limiting and 5xx/408 answers
//! are retried with exponential back-off (or the server's `retry-after`)
//! up to [`AnthropicConfig::max_retries`] times.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{GenerationError, GenerationRequest, RetryPolicy, TextGenerator};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Production API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Value of the `anthropic-version` header.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Connection and retry settings for [`AnthropicProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    /// Model identifier.
    pub model: String,
    /// API root, without the `/v1/messages` path.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt for retryable faults.
    pub max_retries: u32,
    /// First back-off delay; doubled on every further retry.
    pub retry_base_delay_ms: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

/// [`TextGenerator`] backed by the Anthropic Messages API.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Builds a provider.
    ///
    /// Fails with [`GenerationError::Configuration`] when the key is blank or
    /// the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, config: AnthropicConfig) -> Result<Self, GenerationError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(GenerationError::Configuration(
                "Anthropic API key is empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                GenerationError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// The configured model.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// The API key with everything but its ends masked, for logs.
    pub fn api_key_masked(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            "*".repeat(chars.len())
        } else {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{head}...{tail}")
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    async fn execute_with_retry(&self, body: &MessagesRequest<'_>) -> Result<String, GenerationError> {
        let url = self.messages_url();
        let mut attempt = 0u32;
        loop {
            let err = match self.execute_request(&url, body).await {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };
            let RetryPolicy::Retryable { after } = err.retry_policy() else {
                return Err(err);
            };
            if attempt >= self.config.max_retries {
                return Err(err);
            }
            let delay = after
                .unwrap_or_else(|| backoff_delay(self.config.retry_base_delay_ms, attempt))
                .min(MAX_RETRY_DELAY);
            attempt += 1;
            warn!(
                attempt,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient generation failure, will retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn execute_request(
        &self,
        url: &str,
        body: &MessagesRequest<'_>,
    ) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(url)
            .header("x-api-key", self.api_key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport {
                message: e.to_string(),
                timed_out: e.is_timeout(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&text)
                .map(|r| r.error.message)
                .unwrap_or(text);
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(GenerationError::RateLimited {
                    message,
                    retry_after,
                });
            }
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: MessagesResponse = response.json().await.map_err(|e| {
            GenerationError::InvalidResponse(format!("Failed to parse API response: {e}"))
        })?;
        if let Some(usage) = &reply.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                stop_reason = reply.stop_reason.as_deref().unwrap_or("unknown"),
                "Generation usage"
            );
        }
        reply
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| {
                GenerationError::InvalidResponse("Response contained no text block".to_string())
            })
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &self.api_key_masked())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl TextGenerator for AnthropicProvider {
    #[instrument(
        skip_all,
        fields(model = %self.config.model, prompt_chars = request.prompt.len())
    )]
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: request.max_output_tokens.as_u32(),
            temperature: request.temperature.as_f64(),
            system: request.system.as_deref(),
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        };
        let text = self.execute_with_retry(&body).await?;
        debug!(response_chars = text.len(), "Received generation response");
        Ok(text)
    }
}

/// `base · 2^attempt`, saturating.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1u64 << attempt.min(16)))
}

/// Reads a `retry-after` header given in (possibly fractional) seconds.
///
/// Values beyond what a [`Duration`] can hold are clamped to
/// `MAX_RETRY_DELAY`.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| !secs.is_nan() && *secs >= 0.0)?;
    Some(
        Duration::try_from_secs_f64(secs)
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY)),
    )
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
