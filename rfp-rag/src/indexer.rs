//! Index building: embed chunks and bulk-load them into a collection.
//!
//! The [`Indexer`] coordinates the chunk → embed → store workflow by
//! composing an [`EmbeddingProvider`] and a [`VectorStore`]. It offers two
//! ways to (re)build an index:
//!
//! - [`Indexer::load`] recreates a named collection in place and bulk-loads it.
//! - [`Indexer::rebuild`] loads a fresh versioned collection and repoints an
//!   alias only once loading has finished, so readers never observe a
//!   half-built index.
//!
//! # Example
//!
//! ```rust,ignore
//! use rfp_rag::{Indexer, InMemoryVectorStore, DeterministicEmbeddingProvider};
//!
//! let indexer = Indexer::builder()
//!     .embedding_provider(Arc::new(DeterministicEmbeddingProvider::new(1024)))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .batch_size(128)
//!     .build()?;
//!
//! let report = indexer.rebuild("rfp_recursive_DUMMY", &chunks).await?;
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::document::{Chunk, ChunkMode, IndexedDocument};
use crate::embedding::{DIMENSION_PROBE, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// Outcome of a completed index load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// The concrete collection that received the documents.
    pub collection: String,
    /// The alias repointed at `collection`, for [`Indexer::rebuild`].
    pub alias: Option<String>,
    /// The collection the alias pointed at before the swap.
    pub previous: Option<String>,
    /// Whether `previous` was deleted after the swap.
    pub previous_deleted: bool,
    pub indexed: usize,
    /// Chunks dropped because their text was blank.
    pub skipped: usize,
    pub dimensions: usize,
}

/// Embeds chunks and loads them into a [`VectorStore`].
///
/// Construct one via [`Indexer::builder()`].
pub struct Indexer {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    batch_size: usize,
    mode: ChunkMode,
    retain_previous: bool,
}

impl Indexer {
    /// Create a new [`IndexerBuilder`].
    pub fn builder() -> IndexerBuilder {
        IndexerBuilder::default()
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Embed the sentinel probe once and return the provider's dimensionality.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if the probe vector's length does
    /// not match what the provider reports.
    pub async fn probe_dimensions(&self) -> Result<usize> {
        let probe = self.embedding_provider.embed(DIMENSION_PROBE).await?;
        let reported = self.embedding_provider.dimensions();
        if probe.len() != reported || probe.is_empty() {
            return Err(RagError::EmbeddingError {
                provider: self.embedding_provider.name().to_string(),
                message: format!(
                    "probe returned {} dimensions but provider reports {reported}",
                    probe.len()
                ),
            });
        }
        debug!(provider = self.embedding_provider.name(), dimensions = reported, "probed embedding dimensions");
        Ok(reported)
    }

    /// Recreate `collection` and bulk-load `chunks` into it.
    ///
    /// Readers of `collection` can observe it empty or partially loaded while
    /// this runs; use [`rebuild`](Self::rebuild) when that matters.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyInput`] if no chunk has usable text, and
    /// [`RagError::PipelineError`] if embedding or storage fails.
    pub async fn load(&self, collection: &str, chunks: &[Chunk]) -> Result<IndexReport> {
        let (usable, skipped) = usable_chunks(chunks)?;
        let dimensions = self.probe_dimensions().await?;
        let indexed = self.load_into(collection, &usable, dimensions).await?;
        self.flush().await?;

        info!(collection, indexed, skipped, dimensions, "loaded collection");
        Ok(IndexReport {
            collection: collection.to_string(),
            alias: None,
            previous: None,
            previous_deleted: false,
            indexed,
            skipped,
            dimensions,
        })
    }

    /// Load `chunks` into a fresh collection named `{alias}__{timestamp}`,
    /// then point `alias` at it.
    ///
    /// The collection previously behind `alias` is deleted after the swap
    /// unless the indexer was built with `retain_previous`. If loading or the
    /// alias swap fails, the new collection is deleted and `alias` is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyInput`] if no chunk has usable text, and
    /// [`RagError::PipelineError`] if embedding or storage fails.
    pub async fn rebuild(&self, alias: &str, chunks: &[Chunk]) -> Result<IndexReport> {
        let (usable, skipped) = usable_chunks(chunks)?;
        let dimensions = self.probe_dimensions().await?;
        let collection = format!("{alias}__{}", Utc::now().format("%Y%m%d%H%M%S%f"));

        let indexed = match self.load_into(&collection, &usable, dimensions).await {
            Ok(indexed) => indexed,
            Err(e) => {
                self.discard(&collection).await;
                return Err(e);
            }
        };

        let previous = match self.vector_store.point_alias(alias, &collection).await {
            Ok(previous) => previous,
            Err(e) => {
                error!(alias, collection, error = %e, "failed to repoint alias");
                self.discard(&collection).await;
                return Err(RagError::PipelineError(format!(
                    "failed to point alias '{alias}' at '{collection}': {e}"
                )));
            }
        };

        let mut previous_deleted = false;
        if let Some(old) = previous.as_deref().filter(|old| *old != collection) {
            if self.retain_previous {
                debug!(alias, previous = old, "retaining superseded collection");
            } else {
                self.vector_store.delete_collection(old).await.map_err(|e| {
                    error!(collection = old, error = %e, "failed to delete superseded collection");
                    RagError::PipelineError(format!("failed to delete collection '{old}': {e}"))
                })?;
                previous_deleted = true;
            }
        }
        self.flush().await?;

        info!(alias, collection, indexed, skipped, dimensions, previous = ?previous, "rebuilt index");
        Ok(IndexReport {
            collection,
            alias: Some(alias.to_string()),
            previous,
            previous_deleted,
            indexed,
            skipped,
            dimensions,
        })
    }

    async fn load_into(&self, collection: &str, chunks: &[&Chunk], dimensions: usize) -> Result<usize> {
        self.vector_store.recreate_collection(collection, dimensions).await.map_err(|e| {
            error!(collection, error = %e, "failed to create collection");
            RagError::PipelineError(format!("failed to create collection '{collection}': {e}"))
        })?;

        let mut ordinal = 0u64;
        for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let embeddings = self.embedding_provider.embed_batch(&texts).await.map_err(|e| {
                error!(collection, batch = batch_index, error = %e, "embedding failed during indexing");
                RagError::PipelineError(format!("embedding failed for batch {batch_index}: {e}"))
            })?;
            if embeddings.len() != batch.len() {
                return Err(RagError::PipelineError(format!(
                    "embedding backend returned {} vectors for {} texts",
                    embeddings.len(),
                    batch.len()
                )));
            }

            let documents: Vec<IndexedDocument> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| {
                    let doc = IndexedDocument::from_chunk(chunk, self.mode, embedding, ordinal);
                    ordinal += 1;
                    doc
                })
                .collect();

            self.vector_store.upsert(collection, &documents).await.map_err(|e| {
                error!(collection, batch = batch_index, error = %e, "upsert failed during indexing");
                RagError::PipelineError(format!("upsert failed for batch {batch_index}: {e}"))
            })?;
            debug!(collection, batch = batch_index, size = documents.len(), "indexed batch");
        }

        Ok(ordinal as usize)
    }

    /// Best-effort removal of a collection that never went live.
    async fn discard(&self, collection: &str) {
        if let Err(e) = self.vector_store.delete_collection(collection).await {
            warn!(collection, error = %e, "failed to delete partial collection");
        }
    }

    async fn flush(&self) -> Result<()> {
        self.vector_store.flush().await.map_err(|e| {
            error!(store = self.vector_store.name(), error = %e, "failed to flush vector store");
            RagError::PipelineError(format!("failed to persist vector store: {e}"))
        })
    }
}

fn usable_chunks(chunks: &[Chunk]) -> Result<(Vec<&Chunk>, usize)> {
    let usable: Vec<&Chunk> = chunks.iter().filter(|c| !c.text.trim().is_empty()).collect();
    if usable.is_empty() {
        return Err(RagError::EmptyInput(format!(
            "no chunk with usable text among {} chunks",
            chunks.len()
        )));
    }
    let skipped = chunks.len() - usable.len();
    Ok((usable, skipped))
}

/// Builder for constructing an [`Indexer`].
///
/// The embedding provider and vector store are required. The batch size
/// defaults to 128 and the chunk mode to [`ChunkMode::Recursive`].
pub struct IndexerBuilder {
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    batch_size: usize,
    mode: ChunkMode,
    retain_previous: bool,
}

impl Default for IndexerBuilder {
    fn default() -> Self {
        Self {
            embedding_provider: None,
            vector_store: None,
            batch_size: 128,
            mode: ChunkMode::default(),
            retain_previous: false,
        }
    }
}

impl IndexerBuilder {
    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the number of chunks embedded and upserted per batch.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the chunking strategy tag stored with every document.
    pub fn mode(mut self, mode: ChunkMode) -> Self {
        self.mode = mode;
        self
    }

    /// Keep the collection an alias pointed at before a rebuild.
    pub fn retain_previous(mut self, retain: bool) -> Self {
        self.retain_previous = retain;
        self
    }

    /// Build the [`Indexer`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing or
    /// the batch size is zero.
    pub fn build(self) -> Result<Indexer> {
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".into()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".into()))?;
        if self.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".into()));
        }
        Ok(Indexer {
            embedding_provider,
            vector_store,
            batch_size: self.batch_size,
            mode: self.mode,
            retain_previous: self.retain_previous,
        })
    }
}
