//! Ingestion pipeline orchestration.
//!
//! Runs the single-document flow: load → chunk → embed → (wipe) → insert.
//!
//! Embedding is fail-fast: every chunk is embedded concurrently and any
//! failure aborts the run before the store is touched. Once embeddings are
//! in hand the collection is optionally wiped and the batch is inserted
//! record by record, so a failing record does not undo the others. The
//! report carries the number actually inserted.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::{split_document, RecursiveSplitter};
use crate::config::Config;
use crate::embedding::{self, embed_all, Embedder};
use crate::error::PipelineError;
use crate::loader;
use crate::models::{Chunk, Document, EmbeddedChunk};
use crate::store::sqlite::SqliteStore;
use crate::store::{provision_index, InsertMode, VectorIndex, VectorStore};
use crate::tokens::{Gpt2TokenCounter, TokenCounter};

/// Parameters for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Vector index the records are validated against.
    pub index: String,
    /// Source identifier stored on each record. Defaults to the file name.
    pub source: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Delete every record of the collection before inserting.
    pub replace_existing: bool,
    pub insert_mode: InsertMode,
    pub max_concurrency: Option<usize>,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            index: config.db.index.clone(),
            source: config.document.source.clone(),
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            replace_existing: config.ingest.replace_existing,
            insert_mode: config.ingest.insert_mode,
            max_concurrency: config.embedding.max_concurrency,
        }
    }
}

/// A loaded and chunked document, not yet embedded.
#[derive(Debug)]
pub struct ChunkPlan {
    pub document: Document,
    pub source: String,
    pub chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn total_tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.token_count).sum()
    }

    pub fn max_chunk_tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.token_count).max().unwrap_or(0)
    }
}

/// Summary of a completed ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document: String,
    pub source: String,
    pub pages: usize,
    pub chunks: usize,
    pub tokens: usize,
    /// Records removed by the pre-insert wipe.
    pub deleted: u64,
    pub inserted: u64,
    pub failed: usize,
}

/// Load and chunk `path` without embedding or writing anything.
pub fn plan_document(
    counter: &dyn TokenCounter,
    options: &IngestOptions,
    path: &Path,
) -> Result<ChunkPlan, PipelineError> {
    let document = loader::load_document(path)?;
    let source = options
        .source
        .clone()
        .unwrap_or_else(|| document.name.clone());

    let splitter = RecursiveSplitter::new(options.chunk_size, options.chunk_overlap, counter)?;
    let chunks = split_document(&document, &source, &splitter)?;

    info!(
        document = %document.name,
        pages = document.pages.len(),
        chunks = chunks.len(),
        encoding = counter.encoding_name(),
        "chunked document"
    );

    Ok(ChunkPlan {
        document,
        source,
        chunks,
    })
}

/// Ingest one document into `store`.
pub async fn ingest_document(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    counter: &dyn TokenCounter,
    options: &IngestOptions,
    path: &Path,
) -> Result<IngestReport, PipelineError> {
    let plan = plan_document(counter, options, path)?;
    let tokens = plan.total_tokens();
    let ChunkPlan {
        document,
        source,
        chunks,
    } = plan;

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embed_all(embedder, &texts, options.max_concurrency).await?;
    info!(count = embeddings.len(), model = embedder.model_name(), "embedded chunks");

    let records: Vec<EmbeddedChunk> = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| {
            let metadata = chunk.metadata_json(Some(&document.sha256));
            EmbeddedChunk {
                id: Uuid::new_v4().to_string(),
                chunk,
                embedding,
                metadata,
            }
        })
        .collect();

    let definition = VectorIndex::cosine(
        &options.index,
        store.collection(),
        embedder.dims(),
        embedder.model_name(),
    );
    if provision_index(store, &definition).await? {
        info!(index = %options.index, dims = definition.dims, "provisioned vector index");
    }

    let deleted = if options.replace_existing {
        let n = store.delete_all().await?;
        info!(collection = store.collection(), deleted = n, "cleared collection");
        n
    } else {
        0
    };

    let report = store
        .insert_many(&options.index, &records, options.insert_mode)
        .await?;
    for failure in &report.failures {
        warn!(
            id = %failure.id,
            position = failure.position,
            error = %failure.error,
            "record was not inserted"
        );
    }
    info!(
        inserted = report.inserted,
        failed = report.failures.len(),
        "inserted records"
    );

    Ok(IngestReport {
        document: document.name,
        source,
        pages: document.pages.len(),
        chunks: records.len(),
        tokens,
        deleted,
        inserted: report.inserted,
        failed: report.failures.len(),
    })
}

/// CLI entry point for `rag ingest`.
pub async fn run_ingest(
    config: &Config,
    file: Option<PathBuf>,
    append: bool,
    dry_run: bool,
) -> Result<()> {
    let mut options = IngestOptions::from_config(config);
    let path = match file {
        Some(path) => {
            // The configured source name belongs to the configured document.
            options.source = None;
            path
        }
        None => match config.document.path.clone() {
            Some(path) => path,
            None => bail!("No document to ingest. Set [document].path or pass --file."),
        },
    };
    if append {
        options.replace_existing = false;
    }

    let counter = Gpt2TokenCounter::for_encoding(&config.chunking.encoding)?;

    if dry_run {
        let plan = plan_document(&counter, &options, &path)?;
        println!("ingest {} (dry-run)", plan.document.name);
        println!("  pages: {}", plan.document.pages.len());
        println!("  chunks: {}", plan.chunks.len());
        println!("  tokens: {}", plan.total_tokens());
        println!("  largest chunk: {} tokens", plan.max_chunk_tokens());
        return Ok(());
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let store = SqliteStore::connect(&config.db).await?;

    let result = ingest_document(&store, embedder.as_ref(), &counter, &options, &path).await;
    store.close().await;
    let report = result?;

    if let Some(filter) = config.effective_source_filter() {
        if filter != report.source {
            warn!(
                source = %report.source,
                source_filter = %filter,
                "ingested source does not match the configured retrieval filter; \
                 query with --source or --all-sources"
            );
        }
    }

    println!("ingest {}", report.document);
    println!("  pages: {}", report.pages);
    println!("  chunks: {}", report.chunks);
    println!("  deleted: {}", report.deleted);
    println!("  inserted: {}", report.inserted);
    println!("  failed: {}", report.failed);
    println!("ok");

    Ok(())
}
