//! # RAG Harness
//!
//! A minimal retrieval-augmented generation pipeline over a single document.
//!
//! One document (typically a PDF) is loaded page by page, split into
//! overlapping token-sized chunks, embedded, and stored in SQLite next to a
//! vector index definition. At query time the question is embedded, the
//! closest chunks are retrieved (exact or approximate search), and a grounded
//! prompt is sent to a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌───────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedder │──▶│  SQLite   │
//! │ PDF/text │   │ GPT-2   │   │ fan-out  │   │ records + │
//! └──────────┘   └─────────┘   └──────────┘   │  index    │
//!                                             └─────┬─────┘
//!                 ┌──────────┐   ┌──────────┐       │
//!   question ───▶ │ Retrieve │──▶│  Prompt  │──▶ chat model
//!                 │ ENN/ANN  │   │ template │
//!                 └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                              # create schema + vector index
//! rag ingest                            # load, chunk, embed, insert
//! rag search "surface wind limits"      # inspect retrieved chunks
//! rag ask "Who approves HLZ surveys?"   # grounded answer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Document loading (PDF, text) |
//! | [`tokens`] | Token counting |
//! | [`chunk`] | Recursive token-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`quantize`] | Binary codes for approximate search |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Retrieval |
//! | [`prompt`] | Grounded prompt template |
//! | [`completion`] | Chat completion clients |
//! | [`ask`] | Question answering pipeline |
//! | [`error`] | Pipeline error type |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema and index provisioning |
//! | [`stats`] | Store statistics |

pub mod ask;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod quantize;
pub mod search;
pub mod stats;
pub mod store;
pub mod tokens;
