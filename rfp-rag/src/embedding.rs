//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::Result;

/// Text used to probe an embedding backend for its output dimensionality.
pub const DIMENSION_PROBE: &str = "embedding dimension probe";

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (deterministic stub,
/// local encoder, ...) behind a unified async interface. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it, but must return exactly what
/// per-item calls would.
///
/// # Example
///
/// ```rust,ignore
/// use rfp_rag::EmbeddingProvider;
///
/// let provider = DeterministicEmbeddingProvider::new(384);
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    /// Constant for the lifetime of the provider.
    fn dimensions(&self) -> usize;
}

/// Scale `v` to unit L2 norm in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}
