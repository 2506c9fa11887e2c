//! Chat completion clients.
//!
//! A [`CompletionClient`] sends one list of messages and returns the text of
//! the top choice verbatim. No streaming, no retries, and no parsing of the
//! answer.
//!
//! | Config Value | Client |
//! |-------------|--------|
//! | `"disabled"` | [`DisabledCompletionClient`] |
//! | `"openai"` | [`OpenAiChatClient`] |

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::models::ChatMessage;

const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("generation provider is disabled")]
    Disabled,
    #[error("invalid generation configuration: {0}")]
    Config(String),
    #[error("environment variable {0} is not set")]
    MissingCredential(String),
    #[error("generation provider rejected the credentials ({status}): {body}")]
    Unauthorized { status: u16, body: String },
    #[error("generation provider rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("chat completion API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("chat completion request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid chat completion response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Submit `messages` and return the first choice's content.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}

/// Create a completion client from the `[generation]` config section.
pub fn create_completion_client(
    config: &GenerationConfig,
) -> Result<Box<dyn CompletionClient>, CompletionError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletionClient)),
        "openai" => Ok(Box::new(OpenAiChatClient::from_config(config)?)),
        other => Err(CompletionError::Config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

/// Always fails. Used when `generation.provider = "disabled"`.
pub struct DisabledCompletionClient;

#[async_trait]
impl CompletionClient for DisabledCompletionClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, CompletionError> {
        Err(CompletionError::Disabled)
    }
}

/// Client for OpenAI-compatible `POST /v1/chat/completions` endpoints.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: completions_endpoint(OPENAI_BASE_URL),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.endpoint = completions_endpoint(url);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Build from config, reading the key from `config.api_key_env`.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, CompletionError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CompletionError::MissingCredential(config.api_key_env.clone()))?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self::new(config.model.clone(), api_key)
            .with_base_url(config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL))
            .with_client(builder.build()?))
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionClient for OpenAiChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        debug!(model = %self.model, messages = messages.len(), "chat completion request");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let status = status.as_u16();
            return Err(match status {
                401 | 403 => CompletionError::Unauthorized {
                    status,
                    body: body_text,
                },
                429 => CompletionError::RateLimited(body_text),
                _ => CompletionError::Api {
                    status,
                    body: body_text,
                },
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CompletionError::InvalidResponse("no choices returned".to_string()))
    }
}

/// Resolve the chat completions URL for an OpenAI-compatible base URL.
fn completions_endpoint(base_url: &str) -> String {
    let normalized = base_url.trim_end_matches('/');
    if normalized.ends_with("/chat/completions") {
        return normalized.to_string();
    }
    if normalized.ends_with("/v1") {
        return format!("{}/chat/completions", normalized);
    }
    format!("{}/v1/chat/completions", normalized)
}
