//! Storage abstraction for chunk records and their vector index.
//!
//! The [`VectorStore`] trait covers everything the ingestion and query
//! pipelines need from a backend: provisioning the vector index, wiping the
//! collection, bulk insertion with per-record failure reporting, and
//! similarity search. Backends:
//!
//! | Backend | Module |
//! |---------|--------|
//! | SQLite (persistent, used by the CLI) | [`sqlite`] |
//! | In-memory (tests) | [`memory`] |
//!
//! Both backends share the ranking logic in [`rank`], so exact and
//! approximate search behave identically regardless of where records live.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::embedding::cosine_similarity;
use crate::models::EmbeddedChunk;
use crate::quantize::BinaryCode;

/// Similarity function recorded with every index.
pub const SIMILARITY_COSINE: &str = "cosine";
/// Record field holding the embedding.
pub const EMBEDDING_PATH: &str = "embedding";

/// How a bulk insert reacts to a failing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    /// Keep inserting after a failure; report every failed record.
    #[default]
    Unordered,
    /// Stop at the first failure. Records before it stay inserted.
    Ordered,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("vector index '{index}' not found on collection '{collection}' (run `rag init`)")]
    IndexNotFound { index: String, collection: String },
    #[error("vector index '{index}' already exists with {existing}; requested {requested}")]
    IndexConflict {
        index: String,
        existing: String,
        requested: String,
    },
    #[error("vector index '{index}' expects {expected} dimensions, got {actual}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },
    #[error("vector index '{index}' was built with model '{expected}', got '{actual}'")]
    ModelMismatch {
        index: String,
        expected: String,
        actual: String,
    },
    #[error("duplicate record id: {0}")]
    DuplicateId(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Definition of a vector index over a collection's `embedding` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorIndex {
    pub name: String,
    pub collection: String,
    pub path: String,
    pub dims: usize,
    pub similarity: String,
    /// Embedding model whose vectors the index holds.
    pub model: String,
}

impl VectorIndex {
    pub fn cosine(
        name: impl Into<String>,
        collection: impl Into<String>,
        dims: usize,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            path: EMBEDDING_PATH.to_string(),
            dims,
            similarity: SIMILARITY_COSINE.to_string(),
            model: model.into(),
        }
    }

    fn describe(&self) -> String {
        format!("{} dims, model '{}'", self.dims, self.model)
    }

    /// Check a redefinition against this index.
    ///
    /// Re-provisioning with identical parameters is a no-op; anything else is
    /// an [`StoreError::IndexConflict`].
    pub fn ensure_compatible(&self, requested: &VectorIndex) -> Result<(), StoreError> {
        if self.dims == requested.dims
            && self.model == requested.model
            && self.similarity == requested.similarity
        {
            Ok(())
        } else {
            Err(StoreError::IndexConflict {
                index: self.name.clone(),
                existing: self.describe(),
                requested: requested.describe(),
            })
        }
    }

    /// Check a query vector against this index.
    pub fn check_query(&self, model: &str, vector: &[f32]) -> Result<(), StoreError> {
        if self.model != model {
            return Err(StoreError::ModelMismatch {
                index: self.name.clone(),
                expected: self.model.clone(),
                actual: model.to_string(),
            });
        }
        self.check_dims(vector.len())
    }

    pub fn check_dims(&self, actual: usize) -> Result<(), StoreError> {
        if actual != self.dims {
            return Err(StoreError::DimensionMismatch {
                index: self.name.clone(),
                expected: self.dims,
                actual,
            });
        }
        Ok(())
    }
}

/// A record that failed to insert.
#[derive(Debug)]
pub struct InsertFailure {
    /// Position of the record in the submitted batch.
    pub position: usize,
    pub id: String,
    pub error: StoreError,
}

/// Outcome of a bulk insert.
#[derive(Debug, Default)]
pub struct InsertReport {
    pub inserted: u64,
    pub failures: Vec<InsertFailure>,
}

/// One similarity query against a vector index.
#[derive(Debug, Clone)]
pub struct VectorQuery<'a> {
    pub index: &'a str,
    pub query_vector: &'a [f32],
    /// Model that produced `query_vector`; must match the index.
    pub model: &'a str,
    /// Size of the approximate candidate pool. `None` for exact search.
    pub num_candidates: Option<u32>,
    pub exact: bool,
    pub limit: u32,
    /// Equality filter on the record's `source`.
    pub filter: Option<&'a str>,
}

/// A stored record with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub id: String,
    pub source: String,
    pub chunk_index: i64,
    pub page: u32,
    pub text: String,
    pub metadata: serde_json::Value,
    pub score: f64,
}

/// Abstract storage backend for one collection.
///
/// Inserts are not atomic: a bulk insert may leave some records written and
/// report the rest in [`InsertReport::failures`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Collection this store reads and writes.
    fn collection(&self) -> &str;

    /// Create the index if absent. Idempotent for identical definitions.
    async fn create_index(&self, index: &VectorIndex) -> Result<(), StoreError>;

    async fn get_index(&self, name: &str) -> Result<Option<VectorIndex>, StoreError>;

    /// Remove the index definition. Records are kept.
    async fn drop_index(&self, name: &str) -> Result<bool, StoreError>;

    /// Delete every record in the collection. Returns the number removed.
    async fn delete_all(&self) -> Result<u64, StoreError>;

    /// Insert records, validating each embedding against `index`.
    async fn insert_many(
        &self,
        index: &str,
        records: &[EmbeddedChunk],
        mode: InsertMode,
    ) -> Result<InsertReport, StoreError>;

    /// Number of records, optionally restricted to one source.
    async fn count(&self, source: Option<&str>) -> Result<u64, StoreError>;

    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<ScoredRecord>, StoreError>;
}

/// Ensure `definition` exists on `store`. Returns `true` if it was created,
/// `false` if an identical index was already there.
pub async fn provision_index(
    store: &dyn VectorStore,
    definition: &VectorIndex,
) -> Result<bool, StoreError> {
    match store.get_index(&definition.name).await? {
        Some(existing) => existing.ensure_compatible(definition).map(|()| false),
        None => {
            store.create_index(definition).await?;
            Ok(true)
        }
    }
}

/// A record loaded for ranking: its payload, its code, and a lazily used
/// full-precision embedding.
pub(crate) struct Candidate {
    pub record: ScoredRecord,
    pub code: BinaryCode,
    pub embedding: Vec<f32>,
}

/// Rank candidates for `query`, returning at most `limit` records by
/// descending cosine similarity.
///
/// Exact search scores every candidate. Approximate search first orders by
/// Hamming distance between sign-bit codes, keeps the closest
/// `num_candidates`, and scores only those. Ties keep insertion order.
pub(crate) fn rank(query: &VectorQuery<'_>, mut candidates: Vec<Candidate>) -> Vec<ScoredRecord> {
    if !query.exact {
        if let Some(pool) = query.num_candidates {
            let code = BinaryCode::quantize(query.query_vector);
            candidates.sort_by_key(|c| c.code.hamming_distance(&code));
            candidates.truncate(pool as usize);
        }
    }

    let mut scored: Vec<ScoredRecord> = candidates
        .into_iter()
        .map(|c| {
            let mut record = c.record;
            record.score = cosine_similarity(query.query_vector, &c.embedding) as f64;
            record
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(query.limit as usize);
    scored
}
