//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]** — calls an OpenAI-compatible `/v1/embeddings` endpoint.
//! - **[`OllamaEmbedder`]** — calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides vector utilities used by the store:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian `f32` BLOB encoding
//!
//! The same provider and model must embed both the chunks at ingestion time
//! and the question at query time; similarity across different embedding
//! spaces is meaningless. The store records the model with its vector index
//! and rejects queries from a different one.
//!
//! Requests are never retried. Provider errors (auth, rate limits, network)
//! surface to the caller as [`EmbedError`].

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use futures::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::EmbeddingConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("invalid embedding configuration: {0}")]
    Config(String),
    #[error("environment variable {0} is not set")]
    MissingCredential(String),
    #[error("embedding provider rejected the credentials ({status}): {body}")]
    Unauthorized { status: u16, body: String },
    #[error("embedding provider rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("embedding request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimensions { expected: usize, actual: usize },
}

/// An embedding model behind some provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Embed every text concurrently, preserving input order.
///
/// All requests are issued at once unless `max_concurrency` bounds the number
/// in flight. The first failure aborts the whole batch and is returned as-is;
/// no partial result is produced.
pub async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    max_concurrency: Option<usize>,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    debug!(
        count = texts.len(),
        max_concurrency = ?max_concurrency,
        model = embedder.model_name(),
        "embedding batch"
    );
    match max_concurrency {
        None => try_join_all(texts.iter().map(|t| embedder.embed(t))).await,
        Some(limit) => {
            stream::iter(texts.iter().map(|t| embedder.embed(t)))
                .buffered(limit.max(1))
                .try_collect()
                .await
        }
    }
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>, EmbedError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "openai" => Ok(Box::new(OpenAiEmbedder::from_config(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::from_config(config)?)),
        other => Err(EmbedError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Disabled Provider ============

/// Always fails. Used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ OpenAI Provider ============

/// Embedder for OpenAI-compatible `POST /v1/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>, dims: usize, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: embeddings_endpoint(OPENAI_BASE_URL),
            model: model.into(),
            dims,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.endpoint = embeddings_endpoint(url);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Build from config, reading the key from `config.api_key_env`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let (model, dims) = model_and_dims(config)?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EmbedError::MissingCredential(config.api_key_env.clone()))?;

        Ok(Self::new(model, dims, api_key)
            .with_base_url(config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL))
            .with_client(build_client(config.request_timeout_secs)?))
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

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
            return Err(status_error(status.as_u16(), body_text));
        }

        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::InvalidResponse("missing data array".to_string()))?;

        check_dims(self.dims, vector)
    }
}

// ============ Ollama Provider ============

/// Embedder using a local Ollama instance (`POST /api/embed`).
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`). No credential is needed.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: OLLAMA_BASE_URL.to_string(),
            model: model.into(),
            dims,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let (model, dims) = model_and_dims(config)?;
        let mut embedder = Self::new(model, dims);
        embedder.client = build_client(config.request_timeout_secs)?;
        if let Some(ref url) = config.base_url {
            embedder = embedder.with_base_url(url);
        }
        Ok(embedder)
    }
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body_text));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(e.to_string()))?;
        let vector = parsed.embeddings.into_iter().next().ok_or_else(|| {
            EmbedError::InvalidResponse("missing embeddings array".to_string())
        })?;

        check_dims(self.dims, vector)
    }
}

// ============ Helpers ============

fn model_and_dims(config: &EmbeddingConfig) -> Result<(String, usize), EmbedError> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| EmbedError::Config("embedding.model is required".to_string()))?;
    let dims = config
        .dims
        .filter(|d| *d > 0)
        .ok_or_else(|| EmbedError::Config("embedding.dims is required".to_string()))?;
    Ok((model, dims))
}

fn build_client(timeout_secs: Option<u64>) -> Result<reqwest::Client, EmbedError> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

fn status_error(status: u16, body: String) -> EmbedError {
    match status {
        401 | 403 => EmbedError::Unauthorized { status, body },
        429 => EmbedError::RateLimited(body),
        _ => EmbedError::Api { status, body },
    }
}

fn check_dims(expected: usize, vector: Vec<f32>) -> Result<Vec<f32>, EmbedError> {
    if vector.len() != expected {
        return Err(EmbedError::Dimensions {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// Resolve the embeddings URL for an OpenAI-compatible base URL.
fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = base_url.trim_end_matches('/');
    if normalized.ends_with("/embeddings") {
        return normalized.to_string();
    }
    if normalized.ends_with("/v1") {
        return format!("{}/embeddings", normalized);
    }
    format!("{}/v1/embeddings", normalized)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
