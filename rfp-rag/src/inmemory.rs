//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by
//! insertion-ordered collections protected by a `tokio::sync::RwLock`. It can
//! optionally be persisted to a JSON snapshot so that separate processes
//! share one index.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::document::{IndexedDocument, RetrievedDocument};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "memory";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    dimensions: usize,
    documents: Vec<IndexedDocument>,
    /// Document id → position in `documents`.
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl Collection {
    fn new(dimensions: usize) -> Self {
        Self { dimensions, ..Default::default() }
    }

    fn reindex(&mut self) {
        self.positions =
            self.documents.iter().enumerate().map(|(i, doc)| (doc.id(), i)).collect();
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    collections: BTreeMap<String, Collection>,
    aliases: BTreeMap<String, String>,
}

impl State {
    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    fn collection(&self, name: &str) -> Result<&Collection> {
        let resolved = self.resolve(name);
        self.collections.get(resolved).ok_or_else(|| missing(name))
    }
}

fn missing(name: &str) -> RagError {
    RagError::NotFound(format!("collection '{name}'"))
}

/// An in-memory vector store using cosine similarity for search.
///
/// Documents keep their insertion order, so results with equal scores are
/// always returned in the order they were loaded.
///
/// # Example
///
/// ```rust,ignore
/// use rfp_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("docs", 1024).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    state: RwLock<State>,
    snapshot: Option<PathBuf>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted at `path`, starting empty if the file does not
    /// exist yet. [`flush`](VectorStore::flush) writes the snapshot back.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let mut state: State = serde_json::from_reader(std::io::BufReader::new(
                std::fs::File::open(&path)?,
            ))?;
            state.collections.values_mut().for_each(Collection::reindex);
            info!(path = %path.display(), collections = state.collections.len(), "opened vector store snapshot");
            state
        } else {
            debug!(path = %path.display(), "no vector store snapshot yet, starting empty");
            State::default()
        };
        Ok(Self { state: RwLock::new(state), snapshot: Some(path) })
    }

    /// The snapshot file backing this store, if any.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Names of the concrete collections, sorted. Aliases are not included.
    pub async fn collection_names(&self) -> Vec<String> {
        self.state.read().await.collections.keys().cloned().collect()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let mut state = self.state.write().await;
        state.collections.entry(name.to_string()).or_insert_with(|| Collection::new(dimensions));
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let target = match state.aliases.remove(name) {
            Some(target) => {
                debug!(alias = name, collection = %target, "dropped alias");
                target
            }
            None => name.to_string(),
        };
        if state.collections.remove(&target).is_some() {
            state.aliases.retain(|_, t| *t != target);
            debug!(collection = %target, "deleted collection");
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, documents: &[IndexedDocument]) -> Result<()> {
        let mut state = self.state.write().await;
        let store = state.collections.get_mut(collection).ok_or_else(|| missing(collection))?;

        for doc in documents {
            if doc.embedding.len() != store.dimensions {
                return Err(RagError::VectorStoreError {
                    backend: BACKEND.to_string(),
                    message: format!(
                        "document '{}' has {} dimensions, collection '{collection}' expects {}",
                        doc.id(),
                        doc.embedding.len(),
                        store.dimensions
                    ),
                });
            }
            let id = doc.id();
            match store.positions.get(&id) {
                Some(&pos) => store.documents[pos] = doc.clone(),
                None => {
                    store.positions.insert(id, store.documents.len());
                    store.documents.push(doc.clone());
                }
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let state = self.state.read().await;
        let store = state.collection(collection)?;

        let mut scored: Vec<(usize, f32)> = store
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (i, cosine_similarity(&doc.embedding, embedding)))
            .collect();

        // Stable sort: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let doc = &store.documents[i];
                RetrievedDocument { text: doc.text.clone(), metadata: doc.metadata.clone(), score }
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.collection(collection)?.documents.len())
    }

    async fn point_alias(&self, alias: &str, collection: &str) -> Result<Option<String>> {
        let mut state = self.state.write().await;
        if !state.collections.contains_key(collection) {
            return Err(missing(collection));
        }
        if state.collections.remove(alias).is_some() {
            debug!(alias, "replaced concrete collection with alias");
        }
        Ok(state.aliases.insert(alias.to_string(), collection.to_string()))
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!(path = %path.display(), bytes = bytes.len(), "saved vector store snapshot");
        Ok(())
    }
}
