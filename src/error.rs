//! Pipeline-level error type.
//!
//! Each stage has its own error enum; [`PipelineError`] wraps whichever one
//! stopped the run and names the stage it came from.

use thiserror::Error;

use crate::chunk::ChunkError;
use crate::completion::CompletionError;
use crate::embedding::EmbedError;
use crate::loader::LoadError;
use crate::search::SearchError;
use crate::store::StoreError;
use crate::tokens::TokenizeError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl PipelineError {
    /// Name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Load(_) => "load",
            PipelineError::Chunk(_) | PipelineError::Tokenize(_) => "chunk",
            PipelineError::Embed(_) => "embed",
            PipelineError::Store(_) => "store",
            PipelineError::Search(_) => "search",
            PipelineError::Completion(_) => "completion",
        }
    }
}
