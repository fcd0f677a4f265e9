//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rfp_rag::{
    Chunk, EmbeddingProvider, Generator, InMemoryVectorStore, Indexer, Judge, JudgeScores,
    RagError, Result, RetrievedDocument, Retriever, VectorStore,
};

/// Returns fixed vectors for known texts and a zero vector for anything else.
pub struct ScriptedEmbedder {
    dimensions: usize,
    table: HashMap<String, Vec<f32>>,
    /// Fail every call after this many `embed_batch` calls.
    fail_after_batches: Option<usize>,
    batches: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, table: HashMap::new(), fail_after_batches: None, batches: AtomicUsize::new(0) }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimensions);
        self.table.insert(text.to_string(), vector);
        self
    }

    pub fn failing_after(mut self, batches: usize) -> Self {
        self.fail_after_batches = Some(batches);
        self
    }

    fn lookup(&self, text: &str) -> Vec<f32> {
        self.table.get(text).cloned().unwrap_or_else(|| vec![0.0; self.dimensions])
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.lookup(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let n = self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_after_batches.is_some_and(|limit| n >= limit) {
            return Err(RagError::EmbeddingError {
                provider: "scripted".into(),
                message: "scripted failure".into(),
            });
        }
        Ok(texts.iter().map(|t| self.lookup(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Answers with the number of documents it was given.
pub struct CountingGenerator;

#[async_trait]
impl Generator for CountingGenerator {
    fn name(&self) -> &str {
        "counting"
    }

    async fn generate(&self, _query: &str, documents: &[RetrievedDocument]) -> Result<String> {
        Ok(documents.len().to_string())
    }
}

/// Scores every answer 4/4/4, except for queries listed in `failures`,
/// which fail with the paired error.
pub struct ScriptedJudge {
    pub failures: HashMap<String, fn() -> RagError>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self { failures: HashMap::new() }
    }

    pub fn failing_on(mut self, query: &str, error: fn() -> RagError) -> Self {
        self.failures.insert(query.to_string(), error);
        self
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn judge(&self, query: &str, _answer: &str) -> Result<JudgeScores> {
        if let Some(error) = self.failures.get(query) {
            return Err(error());
        }
        Ok(JudgeScores {
            accuracy: 4,
            completeness: 4,
            professionalism: 4,
            rationale: "scripted".into(),
        })
    }
}

pub fn malformed() -> RagError {
    RagError::MalformedResponse { backend: "scripted".into(), message: "no JSON object".into() }
}

pub fn chunk(doc_id: &str, chunk_index: usize, source: Option<&str>, text: &str) -> Chunk {
    Chunk {
        doc_id: doc_id.into(),
        chunk_index,
        text: text.into(),
        source_tag: source.map(Into::into),
    }
}

/// Three-dimensional fixture: query `"q"` points along the x axis and the
/// chunks for projects P9, P1, P3, P2 sit at decreasing cosine similarity.
pub fn ranked_fixture() -> (Arc<ScriptedEmbedder>, Vec<Chunk>) {
    let embedder = ScriptedEmbedder::new(3)
        .with("q", vec![1.0, 0.0, 0.0])
        .with("other", vec![0.0, 0.0, 1.0])
        .with("nine", vec![1.0, 0.0, 0.0])
        .with("one", vec![0.8, 0.6, 0.0])
        .with("three", vec![0.6, 0.8, 0.0])
        .with("two", vec![0.0, 0.0, 1.0]);
    let chunks = vec![
        chunk("d2", 0, Some("P2"), "two"),
        chunk("d3", 0, Some("P3"), "three"),
        chunk("d1", 0, Some("P1"), "one"),
        chunk("d9", 0, Some("P9"), "nine"),
    ];
    (Arc::new(embedder), chunks)
}

/// Index `chunks` into a fresh in-memory store under `alias` and return a
/// retriever over it.
pub async fn indexed_retriever(
    embedder: Arc<dyn EmbeddingProvider>,
    chunks: &[Chunk],
    alias: &str,
    top_k: usize,
) -> Retriever {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    Indexer::builder()
        .embedding_provider(embedder.clone())
        .vector_store(store.clone())
        .batch_size(2)
        .build()
        .unwrap()
        .rebuild(alias, chunks)
        .await
        .unwrap();
    Retriever::new(embedder, store, alias, top_k).unwrap()
}
