//! Qdrant vector store backend.
//!
//! Provides [`QdrantVectorStore`] which implements [`VectorStore`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//!
//! Point ids are derived from the chunk key `(doc_id, chunk_index)`, so
//! upserting a chunk again replaces its point. The chunk metadata and the load
//! ordinal are stored as flat payload fields (`text`, `doc_id`, `chunk_index`,
//! `source`, `mode`, `ordinal`).
//!
//! # Example
//!
//! ```rust,ignore
//! use rfp_rag::qdrant::QdrantVectorStore;
//!
//! let store = QdrantVectorStore::new("http://localhost:6334")?;
//! store.recreate_collection("rfp_recursive_DUMMY", 1024).await?;
//! let results = store.search("rfp_recursive_DUMMY", &query_embedding, 5).await?;
//! ```

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateAliasBuilder, CreateCollectionBuilder, Distance, PointStruct,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::document::{ChunkMetadata, IndexedDocument, RetrievedDocument};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "qdrant";

/// Numeric point id for a document, taken from the SHA-256 of its chunk key.
fn point_id(doc: &IndexedDocument) -> u64 {
    let digest = Sha256::digest(doc.id().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// A [`VectorStore`] backed by [Qdrant](https://qdrant.tech/).
///
/// Collections use cosine distance. Qdrant resolves aliases natively, so a
/// search against an alias reaches the collection it currently points at.
pub struct QdrantVectorStore {
    client: Qdrant,
}

impl QdrantVectorStore {
    /// Create a new Qdrant vector store connecting to the given URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(Self::map_err)?;
        Ok(Self { client })
    }

    /// Create a new Qdrant vector store from an existing client.
    pub fn from_client(client: Qdrant) -> Self {
        Self { client }
    }

    fn map_err(e: qdrant_client::QdrantError) -> RagError {
        RagError::VectorStoreError { backend: BACKEND.to_string(), message: e.to_string() }
    }

    fn extract_string(value: &QdrantValue) -> Option<String> {
        match &value.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn extract_integer(value: &QdrantValue) -> Option<i64> {
        match &value.kind {
            Some(Kind::IntegerValue(n)) => Some(*n),
            _ => None,
        }
    }

    fn to_point(doc: &IndexedDocument) -> Result<PointStruct> {
        let payload = Payload::try_from(serde_json::json!({
            "text": doc.text,
            "doc_id": doc.metadata.doc_id,
            "chunk_index": doc.metadata.chunk_index,
            "source": doc.metadata.source_tag,
            "mode": doc.metadata.mode.as_str(),
            "ordinal": doc.ordinal,
        }))
        .map_err(Self::map_err)?;
        Ok(PointStruct::new(point_id(doc), doc.embedding.clone(), payload))
    }

    /// Convert a scored point back to a result, plus its ordinal for tie-breaking.
    fn from_point(point: ScoredPoint) -> (u64, RetrievedDocument) {
        let ordinal = point
            .payload
            .get("ordinal")
            .and_then(Self::extract_integer)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(u64::MAX);
        let field = |key: &str| point.payload.get(key).and_then(Self::extract_string);

        let metadata = ChunkMetadata {
            doc_id: field("doc_id").unwrap_or_default(),
            chunk_index: point
                .payload
                .get("chunk_index")
                .and_then(Self::extract_integer)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or_default(),
            source_tag: field("source"),
            mode: field("mode").and_then(|m| m.parse().ok()).unwrap_or_default(),
        };
        let text = field("text").unwrap_or_default();
        (ordinal, RetrievedDocument { text, metadata, score: point.score })
    }

    async fn current_target(&self, alias: &str) -> Result<Option<String>> {
        let response = self.client.list_aliases().await.map_err(Self::map_err)?;
        Ok(response
            .aliases
            .into_iter()
            .find(|a| a.alias_name == alias)
            .map(|a| a.collection_name))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        if self.client.collection_exists(name).await.map_err(Self::map_err)? {
            debug!(collection = name, "qdrant collection already exists, skipping creation");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await
            .map_err(Self::map_err)?;

        debug!(collection = name, dimensions, "created qdrant collection");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let target = match self.current_target(name).await? {
            Some(target) => {
                self.client.delete_alias(name).await.map_err(Self::map_err)?;
                debug!(alias = name, collection = %target, "dropped qdrant alias");
                target
            }
            None => name.to_string(),
        };
        if !self.client.collection_exists(&target).await.map_err(Self::map_err)? {
            return Ok(());
        }
        self.client.delete_collection(&target).await.map_err(Self::map_err)?;
        debug!(collection = %target, "deleted qdrant collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, documents: &[IndexedDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let points = documents.iter().map(Self::to_point).collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(Self::map_err)?;

        debug!(collection, count = documents.len(), "upserted documents to qdrant");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, embedding.to_vec(), top_k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(Self::map_err)?;

        let mut results: Vec<(u64, RetrievedDocument)> =
            response.result.into_iter().map(Self::from_point).collect();
        // Qdrant does not guarantee an order among equal scores.
        results.sort_by(|a, b| b.1.score.total_cmp(&a.1.score).then(a.0.cmp(&b.0)));

        Ok(results.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await
            .map_err(Self::map_err)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or_default())
    }

    async fn point_alias(&self, alias: &str, collection: &str) -> Result<Option<String>> {
        let previous = self.current_target(alias).await?;
        if previous.is_none() && self.client.collection_exists(alias).await.map_err(Self::map_err)? {
            self.client.delete_collection(alias).await.map_err(Self::map_err)?;
            debug!(alias, "replaced concrete collection with alias");
        }
        if previous.is_some() {
            self.client.delete_alias(alias).await.map_err(Self::map_err)?;
        }
        self.client
            .create_alias(CreateAliasBuilder::new(collection, alias))
            .await
            .map_err(Self::map_err)?;

        info!(alias, collection, previous = ?previous, "pointed qdrant alias");
        Ok(previous)
    }
}
