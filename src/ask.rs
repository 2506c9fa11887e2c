//! Grounded question answering: retrieve → build prompt → complete.
//!
//! Every step runs sequentially. The answer is returned exactly as the model
//! produced it.

use anyhow::Result;
use tracing::{info, warn};

use crate::completion::{self, CompletionClient};
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::error::PipelineError;
use crate::models::QueryResult;
use crate::prompt::{build_prompt, Prompt};
use crate::search::{retrieve, QueryOverrides, RetrievalOptions};
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

/// A generated answer together with what it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub model: String,
    pub prompt: Prompt,
    pub context: Vec<QueryResult>,
}

/// Answer `question` from the chunks retrieved for it.
pub async fn answer(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    completer: &dyn CompletionClient,
    question: &str,
    options: &RetrievalOptions,
    corpus_name: &str,
) -> Result<Answer, PipelineError> {
    let context = retrieve(store, embedder, question, options).await?;
    if context.is_empty() {
        warn!(
            source_filter = ?options.source_filter,
            "no context retrieved; the model will be asked to decline"
        );
    }

    let prompt = build_prompt(question, &context, corpus_name);
    let text = completer.complete(&prompt.messages()).await?;
    info!(
        model = completer.model_name(),
        context = context.len(),
        chars = text.len(),
        "generated answer"
    );

    Ok(Answer {
        text,
        model: completer.model_name().to_string(),
        prompt,
        context,
    })
}

/// CLI entry point for `rag ask`.
pub async fn run_ask(
    config: &Config,
    question: &str,
    overrides: &QueryOverrides,
    show_context: bool,
) -> Result<()> {
    let options = RetrievalOptions::from_config(config).with_overrides(overrides);
    let embedder = embedding::create_embedder(&config.embedding)?;
    let completer = completion::create_completion_client(&config.generation)?;
    let corpus = config.document.corpus_label();
    let store = SqliteStore::connect(&config.db).await?;

    let result = answer(
        &store,
        embedder.as_ref(),
        completer.as_ref(),
        question,
        &options,
        &corpus,
    )
    .await;
    store.close().await;
    let answer = result?;

    if show_context {
        println!("context ({} chunks):", answer.context.len());
        for (i, item) in answer.context.iter().enumerate() {
            match item.score {
                Some(score) => println!("  [{}] ({:.4}) {}", i + 1, score, item.text.trim()),
                None => println!("  [{}] {}", i + 1, item.text.trim()),
            }
        }
        println!("---");
    }
    println!("{}", answer.text);

    Ok(())
}
