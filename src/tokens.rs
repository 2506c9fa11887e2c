//! Token counting for chunk sizing.
//!
//! Chunk budgets are expressed in model tokens, not characters: a fixed
//! character ratio misestimates token counts for non-English or structured
//! text. [`Gpt2TokenCounter`] uses the GPT-2 byte-pair encoding (the
//! `r50k_base` rank table).

use thiserror::Error;
use tiktoken_rs::CoreBPE;

/// Encoding names accepted by [`Gpt2TokenCounter::for_encoding`].
const GPT2_ALIASES: &[&str] = &["gpt2", "r50k_base"];

#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("unknown token encoding: '{0}' (supported: gpt2, r50k_base)")]
    UnknownEncoding(String),
    #[error("failed to initialise token encoding '{encoding}': {message}")]
    Init { encoding: String, message: String },
    #[error("token counting failed: {0}")]
    Count(String),
}

/// A pluggable token length function.
///
/// Implementations must be deterministic: the same input always yields the
/// same count, and the empty string counts as zero tokens.
pub trait TokenCounter: Send + Sync {
    /// Name of the encoding (e.g. `"gpt2"`).
    fn encoding_name(&self) -> &str;
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> Result<usize, TokenizeError>;
}

/// GPT-2 byte-pair encoding counter.
pub struct Gpt2TokenCounter {
    bpe: CoreBPE,
}

impl Gpt2TokenCounter {
    pub fn new() -> Result<Self, TokenizeError> {
        let bpe = tiktoken_rs::r50k_base().map_err(|e| TokenizeError::Init {
            encoding: "gpt2".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { bpe })
    }

    /// Build the counter named by `chunking.encoding`.
    pub fn for_encoding(name: &str) -> Result<Self, TokenizeError> {
        check_encoding(name)?;
        Self::new()
    }
}

impl TokenCounter for Gpt2TokenCounter {
    fn encoding_name(&self) -> &str {
        "gpt2"
    }

    fn count(&self, text: &str) -> Result<usize, TokenizeError> {
        if text.is_empty() {
            return Ok(0);
        }
        Ok(self.bpe.encode_ordinary(text).len())
    }
}

/// Reject encoding names this build cannot count with.
pub fn check_encoding(name: &str) -> Result<(), TokenizeError> {
    if GPT2_ALIASES.contains(&name) {
        Ok(())
    } else {
        Err(TokenizeError::UnknownEncoding(name.to_string()))
    }
}
