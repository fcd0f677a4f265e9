//! Answer generation from retrieved context.

use async_trait::async_trait;
use std::fmt::Write as _;

use crate::document::RetrievedDocument;
use crate::error::Result;

/// Characters of each document shown in the stub generator's summary.
pub const PREVIEW_CHARS: usize = 180;

/// A backend that turns a query and its retrieved documents into an answer.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Produce an answer to `query` grounded in `documents`.
    async fn generate(&self, query: &str, documents: &[RetrievedDocument]) -> Result<String>;
}

/// Offline generator that summarises the retrieved documents without
/// calling any model. Lets the whole pipeline run end to end in tests and
/// smoke runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyGenerator;

impl DummyGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Generator for DummyGenerator {
    fn name(&self) -> &str {
        "dummy"
    }

    async fn generate(&self, query: &str, documents: &[RetrievedDocument]) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "[DUMMY ANSWER] (offline smoke run)");
        let _ = writeln!(out, "Question: {query}");
        let _ = writeln!(out);
        let _ = writeln!(out, "Top-k documents consulted:");
        for (i, doc) in documents.iter().enumerate() {
            let meta = &doc.metadata;
            let _ = writeln!(
                out,
                "- [{}] doc_id={}, chunk_id={}, source={} :: {}...",
                i + 1,
                meta.doc_id,
                meta.chunk_index,
                meta.source_tag.as_deref().unwrap_or(""),
                preview(&doc.text, PREVIEW_CHARS)
            );
        }
        let _ = writeln!(out);
        out.push_str(
            "Final answer (dummy): the documents above cover the requirements and conditions relevant to this question.",
        );
        Ok(out)
    }
}

/// First `max_chars` characters of `text` with newlines collapsed to spaces.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }).take(max_chars).collect()
}

/// Build the user message for a model-backed generator: numbered context
/// entries followed by the question.
pub fn generation_prompt(query: &str, documents: &[RetrievedDocument]) -> String {
    let mut prompt = String::from("Context:\n");
    if documents.is_empty() {
        prompt.push_str("(no documents were retrieved)\n");
    }
    for (i, doc) in documents.iter().enumerate() {
        let meta = &doc.metadata;
        let _ = writeln!(
            prompt,
            "[{}] doc_id={}, chunk_id={}, source={}\n{}\n",
            i + 1,
            meta.doc_id,
            meta.chunk_index,
            meta.source_tag.as_deref().unwrap_or("-"),
            doc.text.trim()
        );
    }
    let _ = write!(prompt, "\nQuestion: {query}");
    prompt
}

#[cfg(feature = "openai")]
pub use self::openai_backend::OpenAiGenerator;

#[cfg(feature = "openai")]
mod openai_backend {
    use async_trait::async_trait;
    use tracing::debug;

    use super::{Generator, generation_prompt};
    use crate::document::RetrievedDocument;
    use crate::error::Result;
    use crate::openai::OpenAiChatClient;

    const GENERATION_SYSTEM_PROMPT: &str = "You are a senior bid consultant who reads public \
    procurement documents (RFPs). Answer the question using only the provided context. Cite the \
    context entries you rely on by their number, and say plainly when the context does not \
    contain the answer.";

    /// A [`Generator`] that asks a chat model once per query.
    pub struct OpenAiGenerator {
        client: OpenAiChatClient,
    }

    impl OpenAiGenerator {
        pub fn new(client: OpenAiChatClient) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Generator for OpenAiGenerator {
        fn name(&self) -> &str {
            "openai"
        }

        async fn generate(&self, query: &str, documents: &[RetrievedDocument]) -> Result<String> {
            debug!(model = self.client.model(), documents = documents.len(), "generating answer");
            self.client
                .complete(Some(GENERATION_SYSTEM_PROMPT), &generation_prompt(query, documents))
                .await
        }
    }
}
