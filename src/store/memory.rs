//! In-memory [`VectorStore`] implementation for tests.
//!
//! Records and index definitions live in `Vec`/`HashMap` behind
//! `std::sync::RwLock`. Search goes through the same [`rank`](super::rank)
//! routine as the SQLite backend.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::models::EmbeddedChunk;
use crate::quantize::BinaryCode;

use super::{
    rank, Candidate, InsertFailure, InsertMode, InsertReport, ScoredRecord, StoreError,
    VectorIndex, VectorQuery, VectorStore,
};

struct StoredRecord {
    id: String,
    source: String,
    chunk_index: i64,
    page: u32,
    text: String,
    metadata: serde_json::Value,
    model: String,
    embedding: Vec<f32>,
    code: BinaryCode,
}

/// In-memory store scoped to one collection.
pub struct InMemoryStore {
    collection: String,
    indexes: RwLock<HashMap<String, VectorIndex>>,
    records: RwLock<Vec<StoredRecord>>,
}

impl InMemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            indexes: RwLock::new(HashMap::new()),
            records: RwLock::new(Vec::new()),
        }
    }

    fn read_records(&self) -> RwLockReadGuard<'_, Vec<StoredRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, Vec<StoredRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    fn index(&self, name: &str) -> Result<VectorIndex, StoreError> {
        self.indexes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::IndexNotFound {
                index: name.to_string(),
                collection: self.collection.clone(),
            })
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn create_index(&self, index: &VectorIndex) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = indexes.get(&index.name) {
            return existing.ensure_compatible(index);
        }
        indexes.insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn get_index(&self, name: &str) -> Result<Option<VectorIndex>, StoreError> {
        Ok(self
            .indexes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned())
    }

    async fn drop_index(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .indexes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some())
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut records = self.write_records();
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }

    async fn insert_many(
        &self,
        index: &str,
        batch: &[EmbeddedChunk],
        mode: InsertMode,
    ) -> Result<InsertReport, StoreError> {
        let index = self.index(index)?;
        let mut records = self.write_records();
        let mut ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut report = InsertReport::default();

        for (position, record) in batch.iter().enumerate() {
            let outcome = index.check_dims(record.embedding.len()).and_then(|()| {
                if ids.contains(&record.id) {
                    Err(StoreError::DuplicateId(record.id.clone()))
                } else {
                    Ok(())
                }
            });

            match outcome {
                Ok(()) => {
                    ids.insert(record.id.clone());
                    records.push(StoredRecord {
                        id: record.id.clone(),
                        source: record.chunk.source.clone(),
                        chunk_index: record.chunk.chunk_index,
                        page: record.chunk.page,
                        text: record.chunk.text.clone(),
                        metadata: record.metadata.clone(),
                        model: index.model.clone(),
                        code: BinaryCode::quantize(&record.embedding),
                        embedding: record.embedding.clone(),
                    });
                    report.inserted += 1;
                }
                Err(error) => {
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
        let records = self.read_records();
        let n = match source {
            Some(s) => records.iter().filter(|r| r.source == s).count(),
            None => records.len(),
        };
        Ok(n as u64)
    }

    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<ScoredRecord>, StoreError> {
        let index = self.index(query.index)?;
        index.check_query(query.model, query.query_vector)?;

        let records = self.read_records();
        let candidates = records
            .iter()
            .filter(|r| r.model == index.model && r.embedding.len() == index.dims)
            .filter(|r| query.filter.map_or(true, |f| r.source == f))
            .map(|r| Candidate {
                record: ScoredRecord {
                    id: r.id.clone(),
                    source: r.source.clone(),
                    chunk_index: r.chunk_index,
                    page: r.page,
                    text: r.text.clone(),
                    metadata: r.metadata.clone(),
                    score: 0.0,
                },
                code: r.code.clone(),
                embedding: r.embedding.clone(),
            })
            .collect();

        Ok(rank(query, candidates))
    }
}
