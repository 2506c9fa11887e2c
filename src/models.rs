//! Core data models used throughout the pipeline.
//!
//! These types represent the document, chunks, stored records, and query
//! results that flow through ingestion and retrieval.

use serde::Serialize;
use std::path::PathBuf;

/// A loaded source document, partitioned into pages.
#[derive(Debug, Clone)]
pub struct Document {
    /// File name; the default source identifier.
    pub name: String,
    pub path: PathBuf,
    /// SHA-256 of the raw file bytes.
    pub sha256: String,
    pub pages: Vec<Page>,
}

impl Document {
    /// Total extracted text length across pages, in bytes.
    pub fn text_len(&self) -> usize {
        self.pages.iter().map(|p| p.text.len()).sum()
    }
}

/// One page of extracted text. Page numbers start at 1.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

/// Inclusive 1-based line span of a chunk within its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRange {
    pub from: u32,
    pub to: u32,
}

/// A contiguous span of a document's text, sized in tokens.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub token_count: usize,
    /// Identifier of the document this chunk came from.
    pub source: String,
    /// Tokens shared with the preceding chunk.
    pub overlap_prev: usize,
    pub page: u32,
    pub chunk_index: i64,
    pub lines: Option<LineRange>,
}

impl Chunk {
    /// Metadata persisted alongside the chunk, shaped like a loader's
    /// document metadata (`source`, `page`, `loc.lines`).
    pub fn metadata_json(&self, document_sha256: Option<&str>) -> serde_json::Value {
        let mut loc = serde_json::json!({ "pageNumber": self.page });
        if let Some(lines) = self.lines {
            loc["lines"] = serde_json::json!({ "from": lines.from, "to": lines.to });
        }
        let mut meta = serde_json::json!({
            "source": self.source,
            "chunk_index": self.chunk_index,
            "token_count": self.token_count,
            "overlap_prev": self.overlap_prev,
            "loc": loc,
        });
        if let Some(hash) = document_sha256 {
            meta["document_sha256"] = serde_json::Value::String(hash.to_string());
        }
        meta
    }
}

/// A chunk paired with its embedding, ready to persist.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// Document wrapper returned by the `document` projection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultDocument {
    pub page_content: String,
    pub metadata: serde_json::Value,
}

/// One retrieved chunk, scoped to a single query.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryResult {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<ResultDocument>,
}

/// A chat message sent to the completion provider.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}
