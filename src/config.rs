//! TOML configuration parsing and validation.
//!
//! The configuration file names the document to ingest, the store location,
//! and the embedding/generation providers. Credentials never live in the
//! file: each provider names the environment variable holding its key.
//!
//! A few settings can be overridden from the environment so the same file
//! can be reused across machines:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `RAG_DB_PATH` | `[db].path` |
//! | `RAG_DOCUMENT_PATH` | `[document].path` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::InsertMode;

/// Hard ceiling on ANN candidate pools, matching common vector stores.
pub const MAX_NUM_CANDIDATES: u32 = 10_000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_index")]
    pub index: String,
}

fn default_collection() -> String {
    "test".to_string()
}
fn default_index() -> String {
    "vector_index".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DocumentConfig {
    /// The single document this deployment ingests.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Source identifier stored on every record. Defaults to the file name.
    #[serde(default)]
    pub source: Option<String>,
    /// Human name of the corpus, used when declining out-of-scope questions.
    #[serde(default)]
    pub corpus_name: Option<String>,
}

impl DocumentConfig {
    /// Source identifier for the configured document, if one is known.
    pub fn source_id(&self) -> Option<String> {
        if let Some(ref s) = self.source {
            return Some(s.clone());
        }
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Name used in the prompt when the question falls outside the corpus.
    pub fn corpus_label(&self) -> String {
        self.corpus_name
            .clone()
            .or_else(|| self.source_id())
            .unwrap_or_else(|| "the ingested document".to_string())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            encoding: default_encoding(),
        }
    }
}

fn default_chunk_size() -> usize {
    250
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_encoding() -> String {
    "gpt2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Upper bound on in-flight embedding requests during ingestion.
    /// Unset issues every request at once.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            max_concurrency: None,
            request_timeout_secs: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Delete every record of the collection before inserting the new batch.
    #[serde(default = "default_replace_existing")]
    pub replace_existing: bool,
    /// `unordered` keeps inserting past individual record failures;
    /// `ordered` stops at the first one.
    #[serde(default)]
    pub insert_mode: InsertMode,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            replace_existing: default_replace_existing(),
            insert_mode: InsertMode::default(),
        }
    }
}

fn default_replace_existing() -> bool {
    true
}

/// Shape of each retrieval result.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// Raw chunk text only.
    #[default]
    Text,
    /// Chunk text plus a `{ page_content, metadata }` document wrapper.
    Document,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_num_candidates")]
    pub num_candidates: Option<u32>,
    #[serde(default)]
    pub exact: bool,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub projection: Projection,
    #[serde(default)]
    pub include_scores: bool,
    /// Restrict retrieval to one source. Falls back to the configured
    /// document's source when unset.
    #[serde(default)]
    pub source_filter: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            num_candidates: default_num_candidates(),
            exact: false,
            limit: default_limit(),
            projection: Projection::default(),
            include_scores: false,
            source_filter: None,
        }
    }
}

fn default_num_candidates() -> Option<u32> {
    Some(100)
}
fn default_limit() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            request_timeout_secs: None,
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o".to_string()
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// A config with every provider disabled and an in-place database.
    /// Used by tests and dry runs.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/rag.sqlite"),
                collection: default_collection(),
                index: default_index(),
            },
            document: DocumentConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
        }
    }

    /// Source filter applied at query time, if any.
    pub fn effective_source_filter(&self) -> Option<String> {
        self.retrieval
            .source_filter
            .clone()
            .or_else(|| self.document.source_id())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(path) = std::env::var("RAG_DB_PATH") {
        if !path.is_empty() {
            config.db.path = PathBuf::from(path);
        }
    }
    if let Ok(path) = std::env::var("RAG_DOCUMENT_PATH") {
        if !path.is_empty() {
            config.document.path = Some(PathBuf::from(path));
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.db.collection.trim().is_empty() {
        anyhow::bail!("db.collection must not be empty");
    }
    if config.db.index.trim().is_empty() {
        anyhow::bail!("db.index must not be empty");
    }

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }
    crate::tokens::check_encoding(&config.chunking.encoding)?;

    // Validate retrieval
    let r = &config.retrieval;
    if r.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    match (r.exact, r.num_candidates) {
        (false, None) => {
            anyhow::bail!("retrieval.num_candidates is required when retrieval.exact = false")
        }
        (false, Some(n)) if n < r.limit => anyhow::bail!(
            "retrieval.num_candidates ({}) must be >= retrieval.limit ({})",
            n,
            r.limit
        ),
        (false, Some(n)) if n > MAX_NUM_CANDIDATES => anyhow::bail!(
            "retrieval.num_candidates must be <= {}",
            MAX_NUM_CANDIDATES
        ),
        _ => {}
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.max_concurrency == Some(0) {
        anyhow::bail!("embedding.max_concurrency must be > 0 when set");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
