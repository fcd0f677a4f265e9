//! Query-time retrieval: embed a query once and search the index.

use std::sync::Arc;

use tracing::{debug, error};

use crate::document::RetrievedDocument;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// A long-lived search service over one default collection.
///
/// The embedding provider and store connection are expensive to set up, so
/// construct a `Retriever` once and share it (it is cheap to clone). Changing
/// the backends means constructing a new one.
///
/// # Example
///
/// ```rust,ignore
/// let retriever = Retriever::new(embedder, store, "rfp_recursive_DUMMY", 5)?;
/// let docs = retriever.search("data platform build-out", None, None).await?;
/// ```
#[derive(Clone)]
pub struct Retriever {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    collection: String,
    top_k: usize,
}

impl Retriever {
    /// Create a retriever searching `collection` (a collection or alias)
    /// with `top_k` results by default.
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        top_k: usize,
    ) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".into()));
        }
        Ok(Self { embedding_provider, vector_store, collection: collection.into(), top_k })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Return up to `k` documents most similar to `query`, best first.
    ///
    /// `k` and `collection` fall back to the retriever's defaults when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if the collection does not exist, and
    /// [`RagError::PipelineError`] if embedding or search fails otherwise.
    pub async fn search(
        &self,
        query: &str,
        k: Option<usize>,
        collection: Option<&str>,
    ) -> Result<Vec<RetrievedDocument>> {
        let k = k.unwrap_or(self.top_k);
        let collection = collection.unwrap_or(&self.collection);

        let embedding = self.embedding_provider.embed(query).await.map_err(|e| {
            error!(error = %e, "embedding failed during query");
            RagError::PipelineError(format!("query embedding failed: {e}"))
        })?;

        let results = self.vector_store.search(collection, &embedding, k).await.map_err(|e| {
            error!(collection, error = %e, "vector store search failed");
            match e {
                RagError::NotFound(_) => e,
                e => RagError::PipelineError(format!("search failed in collection '{collection}': {e}")),
            }
        })?;

        debug!(collection, k, result_count = results.len(), "search completed");
        Ok(results)
    }
}
