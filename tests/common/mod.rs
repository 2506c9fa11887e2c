//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rag_harness::completion::{CompletionClient, CompletionError};
use rag_harness::embedding::{EmbedError, Embedder};
use rag_harness::models::ChatMessage;

pub const DIMS: usize = 64;

/// Deterministic bag-of-words embedder: every lowercase word is hashed into
/// one of [`DIMS`] buckets. Texts sharing vocabulary score close together.
///
/// Texts containing `POISON` fail; texts containing `SHORTVEC` come back
/// with too few dimensions.
pub struct KeywordEmbedder {
    model: String,
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::with_model("keyword-test")
    }

    pub fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    // Centre around zero so sign-bit codes carry information.
    let mean = v.iter().sum::<f32>() / DIMS as f32;
    v.iter().map(|x| x - mean).collect()
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("POISON") {
            return Err(EmbedError::Api {
                status: 500,
                body: "poisoned input".to_string(),
            });
        }
        let mut v = keyword_vector(text);
        if text.contains("SHORTVEC") {
            v.truncate(DIMS / 2);
        }
        Ok(v)
    }
}

/// Completion client that records every request and returns a fixed reply.
pub struct RecordingCompleter {
    reply: String,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordingCompleter {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> String {
        let requests = self.requests.lock().unwrap();
        requests
            .last()
            .and_then(|m| m.first())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionClient for RecordingCompleter {
    fn model_name(&self) -> &str {
        "recording-test"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

/// Three pages of manual-style text, separated by form feeds.
pub const MANUAL: &str = "Chapter 1. Airdrop Operations\n\n\
1.1 Surface wind limits for CDS airdrops from C-130 aircraft are 13 knots. \
High-velocity CDS drops allow surface winds up to 17 knots when the drop zone is approved for them.\n\n\
1.2 Personnel drops require the drop zone controller to report winds every 15 minutes \
and to abort the drop if gusts exceed the published limits.\
\x0c\
Chapter 2. Landing Zones\n\n\
2.1 Helicopter landing zone (HLZ) surveys are approved by the wing commander or a designated \
representative with current survey certification.\n\n\
2.2 Landing zone markings use panels that must be visible from three nautical miles in daylight.\
\x0c\
Chapter 3. Equipment\n\n\
3.1 Parachute inspections occur every 180 days and are recorded in the rigger log.\n\n\
3.2 Damaged containers are tagged, removed from service, and reported to the aerial delivery office.";
