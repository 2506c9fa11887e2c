//! Token-aware recursive text chunker.
//!
//! Splits page text into overlapping chunks whose token length (measured by a
//! pluggable [`TokenCounter`]) never exceeds `chunk_size`. Splitting prefers
//! paragraph boundaries, then line boundaries, then word boundaries, and only
//! falls back to individual characters when a piece is still too large.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs in
//!    the text (`""` always matches and means "every character").
//! 2. Split on it, keeping each separator attached to the piece that follows
//!    it, so that every chunk is a contiguous span of the source text.
//! 3. Pieces shorter than `chunk_size` tokens are merged greedily into a
//!    window; when the next piece would overflow, the window is emitted and
//!    trimmed from the front until at most `chunk_overlap` tokens remain.
//!    Those trailing tokens open the next chunk.
//! 4. Pieces of `chunk_size` tokens or more are split again with the next
//!    separator in the list.
//!
//! Token length is always measured on the candidate text itself, never
//! estimated from character counts.

use std::collections::VecDeque;

use thiserror::Error;

use crate::models::{Chunk, Document, LineRange};
use crate::tokens::{TokenCounter, TokenizeError};

/// Separators in priority order: paragraph, line, word, character.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunking parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
}

/// A chunk of text produced by [`RecursiveSplitter::split_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub token_count: usize,
    /// Tokens carried over from the preceding chunk.
    pub overlap_prev: usize,
}

/// Recursive separator-based splitter with a token length function.
pub struct RecursiveSplitter<'a> {
    chunk_size: usize,
    chunk_overlap: usize,
    counter: &'a dyn TokenCounter,
}

impl<'a> RecursiveSplitter<'a> {
    pub fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        counter: &'a dyn TokenCounter,
    ) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidParams(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkError::InvalidParams(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            counter,
        })
    }

    /// Split `text` into ordered, overlapping chunks.
    ///
    /// Whitespace-only input yields no chunks; text that already fits in one
    /// chunk is returned whole.
    pub fn split_text(&self, text: &str) -> Result<Vec<TextChunk>, ChunkError> {
        if self.len(text)? <= self.chunk_size {
            return Ok(self.finish(text, 0)?.into_iter().collect());
        }
        self.split_recursive(text, &DEFAULT_SEPARATORS)
    }

    fn len(&self, text: &str) -> Result<usize, ChunkError> {
        Ok(self.counter.count(text)?)
    }

    fn split_recursive(
        &self,
        text: &str,
        separators: &[&str],
    ) -> Result<Vec<TextChunk>, ChunkError> {
        let mut out = Vec::new();

        let mut separator = "";
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                break;
            }
            if text.contains(*sep) {
                separator = *sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        // Each piece is counted once; merging works from these counts.
        let mut fitting: Vec<(&str, usize)> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            let tokens = self.len(piece)?;
            if tokens < self.chunk_size {
                fitting.push((piece, tokens));
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(&fitting)?);
                fitting.clear();
            }
            if finer.is_empty() {
                // Indivisible at this level; emit as-is.
                if let Some(chunk) = self.finish(piece, 0)? {
                    out.push(chunk);
                }
            } else {
                out.extend(self.split_recursive(piece, finer)?);
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(&fitting)?);
        }

        Ok(out)
    }

    /// Greedily merge adjacent pieces into chunks with overlap.
    ///
    /// The window size is tracked as the sum of piece counts rather than by
    /// re-encoding the joined window for every piece. [`finish`](Self::finish)
    /// records the exact count once per emitted chunk.
    fn merge(&self, pieces: &[(&str, usize)]) -> Result<Vec<TextChunk>, ChunkError> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;
        let mut carried = 0usize;

        for &(piece, tokens) in pieces {
            if !window.is_empty() && total + tokens > self.chunk_size {
                if let Some(chunk) = self.finish(&join(&window), carried)? {
                    chunks.push(chunk);
                }

                while let Some(&(_, front)) = window.front() {
                    if total > self.chunk_overlap || total + tokens > self.chunk_size {
                        window.pop_front();
                        total -= front;
                    } else {
                        break;
                    }
                }

                carried = if window.is_empty() {
                    0
                } else {
                    self.len(join(&window).trim())?
                };
            }
            window.push_back((piece, tokens));
            total += tokens;
        }

        if let Some(chunk) = self.finish(&join(&window), carried)? {
            chunks.push(chunk);
        }

        Ok(chunks)
    }

    fn finish(&self, raw: &str, carried: usize) -> Result<Option<TextChunk>, ChunkError> {
        let text = raw.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let token_count = self.len(text)?;
        Ok(Some(TextChunk {
            text: text.to_string(),
            token_count,
            overlap_prev: carried.min(token_count),
        }))
    }
}

fn join(window: &VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(piece, _)| *piece).collect()
}

/// Split `text` at every occurrence of `separator`, attaching the separator
/// to the start of the following piece. An empty separator splits into
/// individual characters. Empty pieces are dropped.
fn split_keep_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Chunk every page of `document`, tagging chunks with `source`.
///
/// Chunk indices are contiguous across the whole document, starting at 0.
/// Pages whose text is blank produce no chunks.
pub fn split_document(
    document: &Document,
    source: &str,
    splitter: &RecursiveSplitter<'_>,
) -> Result<Vec<Chunk>, ChunkError> {
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for page in &document.pages {
        let mut cursor = 0usize;
        for piece in splitter.split_text(&page.text)? {
            let lines = locate(&page.text, &piece.text, &mut cursor);
            chunks.push(Chunk {
                text: piece.text,
                token_count: piece.token_count,
                source: source.to_string(),
                overlap_prev: piece.overlap_prev,
                page: page.number,
                chunk_index,
                lines,
            });
            chunk_index += 1;
        }
    }

    Ok(chunks)
}

/// Find `needle` in `haystack` at or after `cursor` and return its line span.
/// Advances `cursor` past the match start so overlapping successors are found
/// in order.
fn locate(haystack: &str, needle: &str, cursor: &mut usize) -> Option<LineRange> {
    let start = haystack
        .get(*cursor..)
        .and_then(|rest| rest.find(needle))
        .map(|pos| *cursor + pos)
        .or_else(|| haystack.find(needle))?;

    let first_char_len = needle.chars().next().map(char::len_utf8).unwrap_or(1);
    *cursor = start + first_char_len;

    let from = haystack[..start].matches('\n').count() as u32 + 1;
    let to = from + needle.matches('\n').count() as u32;
    Some(LineRange { from, to })
}
