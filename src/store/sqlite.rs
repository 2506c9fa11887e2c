//! SQLite-backed [`VectorStore`] implementation.
//!
//! Records live in the `records` table, scoped by `collection`; index
//! definitions live in `vector_indexes`. Every record stores its embedding as
//! a little-endian `f32` BLOB and its sign-bit code as a second BLOB, so
//! approximate search can rank by Hamming distance before decoding any
//! full-precision vector. Records are tagged with the embedding model of the
//! index they were inserted through; searches only see records whose model
//! and dimensions match the current index definition.
//!
//! Bulk inserts run one statement per record outside a transaction: a
//! failing record does not roll back the ones before it.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::config::DbConfig;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::EmbeddedChunk;
use crate::quantize::BinaryCode;
use crate::{db, migrate};

use super::{
    rank, Candidate, InsertFailure, InsertMode, InsertReport, ScoredRecord, StoreError,
    VectorIndex, VectorQuery, VectorStore,
};

/// Per-source record totals for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,
    pub records: u64,
    /// Unix timestamp of the newest record.
    pub last_ingested: i64,
}

/// SQLite implementation of the [`VectorStore`] trait for one collection.
pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database and ensure the schema exists.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            collection: config.collection.clone(),
        })
    }

    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool, waiting for in-flight statements.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Record counts per source, largest first.
    pub async fn source_summaries(&self) -> Result<Vec<SourceSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT source, COUNT(*) AS n, MAX(created_at) AS last_ingested
            FROM records
            WHERE collection = ?
            GROUP BY source
            ORDER BY n DESC, source ASC
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                SourceSummary {
                    source: row.get("source"),
                    records: n as u64,
                    last_ingested: row.get("last_ingested"),
                }
            })
            .collect())
    }

    /// Every index defined on this collection.
    pub async fn list_indexes(&self) -> Result<Vec<VectorIndex>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, collection, path, dims, similarity, model FROM vector_indexes WHERE collection = ? ORDER BY name",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(index_from_row).collect())
    }

    async fn require_index(&self, name: &str) -> Result<VectorIndex, StoreError> {
        self.get_index(name)
            .await?
            .ok_or_else(|| StoreError::IndexNotFound {
                index: name.to_string(),
                collection: self.collection.clone(),
            })
    }

    async fn insert_one(&self, record: &EmbeddedChunk, model: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let chunk = &record.chunk;
        let code = BinaryCode::quantize(&record.embedding);

        let result = sqlx::query(
            r#"
            INSERT INTO records (id, collection, source, chunk_index, page, text,
                                 token_count, overlap_prev, metadata_json, model,
                                 embedding, code, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&self.collection)
        .bind(&chunk.source)
        .bind(chunk.chunk_index)
        .bind(chunk.page as i64)
        .bind(&chunk.text)
        .bind(chunk.token_count as i64)
        .bind(chunk.overlap_prev as i64)
        .bind(record.metadata.to_string())
        .bind(model)
        .bind(vec_to_blob(&record.embedding))
        .bind(code.to_bytes())
        .bind(record.embedding.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateId(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn index_from_row(row: &sqlx::sqlite::SqliteRow) -> VectorIndex {
    let dims: i64 = row.get("dims");
    VectorIndex {
        name: row.get("name"),
        collection: row.get("collection"),
        path: row.get("path"),
        dims: dims as usize,
        similarity: row.get("similarity"),
        model: row.get("model"),
    }
}

fn candidate_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Candidate, StoreError> {
    let id: String = row.get("id");
    let dims: i64 = row.get("dims");
    let page: i64 = row.get("page");
    let metadata_json: String = row.get("metadata_json");
    let embedding_blob: Vec<u8> = row.get("embedding");
    let code_blob: Vec<u8> = row.get("code");

    let code = BinaryCode::from_bytes(&code_blob, dims as usize).ok_or_else(|| {
        StoreError::Corrupt {
            id: id.clone(),
            reason: format!("code length {} does not match {} dims", code_blob.len(), dims),
        }
    })?;

    let metadata = serde_json::from_str(&metadata_json).map_err(|e| StoreError::Corrupt {
        id: id.clone(),
        reason: format!("invalid metadata JSON: {}", e),
    })?;

    Ok(Candidate {
        record: ScoredRecord {
            id,
            source: row.get("source"),
            chunk_index: row.get("chunk_index"),
            page: page as u32,
            text: row.get("text"),
            metadata,
            score: 0.0,
        },
        code,
        embedding: blob_to_vec(&embedding_blob),
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn create_index(&self, index: &VectorIndex) -> Result<(), StoreError> {
        if let Some(existing) = self.get_index(&index.name).await? {
            return existing.ensure_compatible(index);
        }

        sqlx::query(
            r#"
            INSERT INTO vector_indexes (name, collection, path, dims, similarity, model, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&index.name)
        .bind(&self.collection)
        .bind(&index.path)
        .bind(index.dims as i64)
        .bind(&index.similarity)
        .bind(&index.model)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_index(&self, name: &str) -> Result<Option<VectorIndex>, StoreError> {
        let row = sqlx::query(
            "SELECT name, collection, path, dims, similarity, model FROM vector_indexes WHERE collection = ? AND name = ?",
        )
        .bind(&self.collection)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(index_from_row))
    }

    async fn drop_index(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM vector_indexes WHERE collection = ? AND name = ?")
            .bind(&self.collection)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_many(
        &self,
        index: &str,
        records: &[EmbeddedChunk],
        mode: InsertMode,
    ) -> Result<InsertReport, StoreError> {
        let index = self.require_index(index).await?;
        let mut report = InsertReport::default();

        for (position, record) in records.iter().enumerate() {
            let outcome = match index.check_dims(record.embedding.len()) {
                Ok(()) => self.insert_one(record, &index.model).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => report.inserted += 1,
                Err(error) => {
                    debug!(id = %record.id, position, error = %error, "record insert failed");
                    report.failures.push(InsertFailure {
                        position,
                        id: record.id.clone(),
                        error,
                    });
                    if mode == InsertMode::Ordered {
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn count(&self, source: Option<&str>) -> Result<u64, StoreError> {
        let n: i64 = match source {
            Some(s) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ? AND source = ?")
                    .bind(&self.collection)
                    .bind(s)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
                    .bind(&self.collection)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(n as u64)
    }

    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<ScoredRecord>, StoreError> {
        let index = self.require_index(query.index).await?;
        index.check_query(query.model, query.query_vector)?;

        let rows = sqlx::query(
            r#"
            SELECT id, source, chunk_index, page, text, metadata_json, embedding, code, dims
            FROM records
            WHERE collection = ? AND model = ? AND dims = ? AND (? IS NULL OR source = ?)
            ORDER BY rowid
            "#,
        )
        .bind(&self.collection)
        .bind(&index.model)
        .bind(index.dims as i64)
        .bind(query.filter)
        .bind(query.filter)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .map(candidate_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            scanned = candidates.len(),
            exact = query.exact,
            num_candidates = ?query.num_candidates,
            "vector search"
        );

        Ok(rank(query, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> SqliteStore {
        let config = DbConfig {
            path: dir.path().join("data/rag.sqlite"),
            collection: "test".to_string(),
            index: "vector_index".to_string(),
        };
        SqliteStore::connect(&config).await.unwrap()
    }

    fn record(id: &str, chunk_index: i64, embedding: Vec<f32>) -> EmbeddedChunk {
        let chunk = Chunk {
            text: format!("chunk {}", chunk_index),
            token_count: 2,
            source: "manual.pdf".to_string(),
            overlap_prev: 0,
            page: 3,
            chunk_index,
            lines: None,
        };
        let metadata = chunk.metadata_json(None);
        EmbeddedChunk {
            id: id.to_string(),
            chunk,
            embedding,
            metadata,
        }
    }

    #[tokio::test]
    async fn index_provisioning_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let idx = VectorIndex::cosine("vector_index", "test", 3, "m");
        store.create_index(&idx).await.unwrap();
        store.create_index(&idx).await.unwrap();
        assert_eq!(store.list_indexes().await.unwrap(), vec![idx.clone()]);

        let changed = VectorIndex::cosine("vector_index", "test", 4, "m");
        assert!(matches!(
            store.create_index(&changed).await,
            Err(StoreError::IndexConflict { .. })
        ));
        assert!(store.drop_index("vector_index").await.unwrap());
        assert!(store.get_index("vector_index").await.unwrap().is_none());
        store.close().await;
    }

    #[tokio::test]
    async fn duplicate_ids_fail_without_rolling_back() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .create_index(&VectorIndex::cosine("vector_index", "test", 2, "m"))
            .await
            .unwrap();

        let batch = vec![
            record("a", 0, vec![1.0, 0.0]),
            record("a", 1, vec![0.0, 1.0]),
            record("b", 2, vec![0.5, 0.5]),
        ];
        let report = store
            .insert_many("vector_index", &batch, InsertMode::Unordered)
            .await
            .unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, StoreError::DuplicateId(_)));
        assert_eq!(store.count(None).await.unwrap(), 2);
        assert_eq!(store.count(Some("manual.pdf")).await.unwrap(), 2);
        assert_eq!(store.count(Some("other.pdf")).await.unwrap(), 0);

        let summaries = store.source_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].source, "manual.pdf");
        assert_eq!(summaries[0].records, 2);
        store.close().await;
    }

    #[tokio::test]
    async fn search_round_trips_record_fields() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .create_index(&VectorIndex::cosine("vector_index", "test", 2, "m"))
            .await
            .unwrap();
        store
            .insert_many(
                "vector_index",
                &[record("a", 0, vec![1.0, 0.0]), record("b", 1, vec![0.0, 1.0])],
                InsertMode::Unordered,
            )
            .await
            .unwrap();

        let q = [0.0, 1.0];
        let results = store
            .vector_search(&VectorQuery {
                index: "vector_index",
                query_vector: &q,
                model: "m",
                num_candidates: Some(10),
                exact: false,
                limit: 1,
                filter: Some("manual.pdf"),
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
        assert_eq!(results[0].page, 3);
        assert_eq!(results[0].text, "chunk 1");
        assert_eq!(results[0].metadata["chunk_index"], 1);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        store.close().await;
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .create_index(&VectorIndex::cosine("vector_index", "test", 2, "m"))
            .await
            .unwrap();
        store
            .insert_many("vector_index", &[record("a", 0, vec![1.0, 0.0])], InsertMode::Unordered)
            .await
            .unwrap();

        let other = SqliteStore::new(store.pool().clone(), "other");
        assert_eq!(other.count(None).await.unwrap(), 0);
        assert_eq!(other.delete_all().await.unwrap(), 0);
        assert!(other.get_index("vector_index").await.unwrap().is_none());
        assert_eq!(store.count(None).await.unwrap(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn search_without_index_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let q = [1.0];
        let err = store
            .vector_search(&VectorQuery {
                index: "vector_index",
                query_vector: &q,
                model: "m",
                num_candidates: None,
                exact: true,
                limit: 1,
                filter: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IndexNotFound { .. }));
        store.close().await;
    }

    #[tokio::test]
    async fn replaced_model_hides_old_records() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .create_index(&VectorIndex::cosine("vector_index", "test", 2, "model-a"))
            .await
            .unwrap();
        store
            .insert_many("vector_index", &[record("a", 0, vec![1.0, 0.0])], InsertMode::Unordered)
            .await
            .unwrap();

        store.drop_index("vector_index").await.unwrap();
        store
            .create_index(&VectorIndex::cosine("vector_index", "test", 2, "model-b"))
            .await
            .unwrap();

        let q = [1.0, 0.0];
        let query = VectorQuery {
            index: "vector_index",
            query_vector: &q,
            model: "model-b",
            num_candidates: None,
            exact: true,
            limit: 5,
            filter: None,
        };
        assert!(store.vector_search(&query).await.unwrap().is_empty());

        store
            .insert_many("vector_index", &[record("b", 1, vec![0.0, 1.0])], InsertMode::Unordered)
            .await
            .unwrap();
        let results = store.vector_search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
        store.close().await;
    }

    #[tokio::test]
    async fn corrupt_metadata_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .create_index(&VectorIndex::cosine("vector_index", "test", 2, "m"))
            .await
            .unwrap();
        store
            .insert_many("vector_index", &[record("a", 0, vec![1.0, 0.0])], InsertMode::Unordered)
            .await
            .unwrap();
        sqlx::query("UPDATE records SET metadata_json = 'not json' WHERE id = 'a'")
            .execute(store.pool())
            .await
            .unwrap();

        let q = [1.0, 0.0];
        let err = store
            .vector_search(&VectorQuery {
                index: "vector_index",
                query_vector: &q,
                model: "m",
                num_candidates: None,
                exact: true,
                limit: 1,
                filter: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "a"));
        store.close().await;
    }
}
