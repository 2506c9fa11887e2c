//! Sign-bit binary codes for approximate vector search.
//!
//! Each dimension becomes one bit (`1` if the value is `>= 0.0`), packed into
//! `u64` words. Hamming distance between codes is a cheap proxy for angular
//! distance: approximate search ranks every record by Hamming distance,
//! keeps the best `num_candidates`, and reranks only those with exact cosine
//! similarity.
//!
//! A 1536-dimension embedding packs into 24 words (192 bytes).

/// Packed sign bits of an embedding vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryCode {
    words: Vec<u64>,
    dims: usize,
}

impl BinaryCode {
    pub fn quantize(vector: &[f32]) -> Self {
        let dims = vector.len();
        let mut words = vec![0u64; dims.div_ceil(64)];
        for (i, &v) in vector.iter().enumerate() {
            if v >= 0.0 {
                words[i / 64] |= 1u64 << (i % 64);
            }
        }
        Self { words, dims }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of differing bits. Codes of different dimensionality are
    /// maximally distant.
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        if self.dims != other.dims {
            return u32::MAX;
        }
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Little-endian byte encoding for BLOB storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * 8);
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Decode a code written by [`to_bytes`](Self::to_bytes).
    ///
    /// Returns `None` if the byte length does not match `dims`.
    pub fn from_bytes(bytes: &[u8], dims: usize) -> Option<Self> {
        if bytes.len() != dims.div_ceil(64) * 8 {
            return None;
        }
        let words = bytes
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                u64::from_le_bytes(buf)
            })
            .collect();
        Some(Self { words, dims })
    }
}
