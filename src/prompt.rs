//! Grounded prompt assembly.
//!
//! The retrieved chunk texts are joined in retrieval order into a single
//! context block and placed, together with the literal question, into a
//! fixed instruction template. The template restricts the model to the
//! supplied context, tells it to decline questions about anything other than
//! the ingested corpus, to admit when it does not know, to label any outside
//! knowledge, and to cite the section or chapter the answer comes from.

use crate::models::{ChatMessage, QueryResult};

/// Separator placed between consecutive chunk texts in the context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// A rendered single-turn prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub question: String,
    pub context: String,
    pub text: String,
}

impl Prompt {
    /// The prompt as the only message of a chat request.
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![ChatMessage::user(self.text.clone())]
    }
}

fn instructions(corpus_name: &str) -> String {
    format!(
        "Answer the following question based on the given context. \
If the user doesn't ask something answerable with the provided context, let the user know \
we can answer questions about {corpus} only. \
If you don't know the answer, just say that you don't know; don't try to make up an answer. \
Acknowledge limitations when the context provided is incomplete or does not contain relevant \
information to answer the question. \
If you need to fill knowledge gaps using information outside of the context, clearly attribute it as such. \
Make sure to provide the location (section/chapter) of the document where the answer can be found.",
        corpus = corpus_name
    )
}

/// Build the prompt for `question` from `results`.
pub fn build_prompt(question: &str, results: &[QueryResult], corpus_name: &str) -> Prompt {
    let context = results
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    let text = format!(
        "{}\nQuestion: {{{}}}\nContext: {{{}}}\n",
        instructions(corpus_name),
        question,
        context
    );

    Prompt {
        question: question.to_string(),
        context,
        text,
    }
}
