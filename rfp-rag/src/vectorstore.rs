//! Vector store trait for storing and searching chunk embeddings.

use async_trait::async_trait;
use tracing::debug;

use crate::document::{IndexedDocument, RetrievedDocument};
use crate::error::{RagError, Result};

/// A storage backend for chunk embeddings with cosine-similarity search.
///
/// Implementations manage named collections of [`IndexedDocument`]s. A
/// collection may also be reached through an alias, which lets a rebuild load
/// a fresh collection and repoint readers only once it is complete.
///
/// # Example
///
/// ```rust,ignore
/// use rfp_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.recreate_collection("rfp", 1024).await?;
/// store.upsert_batched("rfp", &docs, 128).await?;
/// let results = store.search("rfp", &query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Create a named collection. No-op if it already exists.
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()>;

    /// Delete a named collection and all its data. Deleting a collection
    /// that does not exist succeeds.
    ///
    /// If `name` is an alias, the alias is dropped and the collection behind
    /// it is deleted, so a later [`create_collection`](Self::create_collection)
    /// of `name` is what searches on `name` reach.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Delete `name` if present, then create it empty with `dimensions`.
    async fn recreate_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        if let Err(e) = self.delete_collection(name).await {
            debug!(collection = name, error = %e, "ignoring failure to delete collection before recreate");
        }
        self.create_collection(name, dimensions).await
    }

    /// Upsert documents into a collection. A document whose
    /// `(doc_id, chunk_index)` already exists replaces it in place.
    async fn upsert(&self, collection: &str, documents: &[IndexedDocument]) -> Result<()>;

    /// Upsert documents in fixed-size batches.
    ///
    /// Batches are not individually transactional. A failed call is recovered
    /// by recreating the collection and loading again.
    async fn upsert_batched(
        &self,
        collection: &str,
        documents: &[IndexedDocument],
        batch_size: usize,
    ) -> Result<()> {
        if batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".into()));
        }
        for (i, batch) in documents.chunks(batch_size).enumerate() {
            self.upsert(collection, batch).await?;
            debug!(collection, batch = i, size = batch.len(), "upserted batch");
        }
        Ok(())
    }

    /// Search for the `top_k` most similar documents to the given embedding.
    ///
    /// `collection` may be a collection name or an alias. Results are
    /// ordered by descending score; equal scores keep insertion order.
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>>;

    /// Number of documents in a collection (or the collection behind an alias).
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Point `alias` at `collection`, returning the collection it pointed at
    /// before, if any.
    async fn point_alias(&self, alias: &str, collection: &str) -> Result<Option<String>>;

    /// Persist pending state. Stores that write through do nothing.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
