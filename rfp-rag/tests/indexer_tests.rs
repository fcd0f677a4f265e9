//! Bulk loading and alias-swap rebuilds.

mod common;

use std::sync::Arc;

use common::{ScriptedEmbedder, chunk, ranked_fixture};
use rfp_rag::{
    DeterministicEmbeddingProvider, EmbeddingProvider, Indexer, InMemoryVectorStore, RagError,
    Retriever, VectorStore,
};

fn indexer(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Indexer {
    Indexer::builder().embedding_provider(embedder).vector_store(store).batch_size(2).build().unwrap()
}

fn sources(docs: &[rfp_rag::RetrievedDocument]) -> Vec<String> {
    docs.iter().filter_map(|d| d.metadata.source_tag.clone()).collect()
}

#[tokio::test]
async fn load_then_search_ranks_by_similarity() {
    let (embedder, chunks) = ranked_fixture();
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());

    let report = indexer(embedder.clone(), store.clone()).load("rfp", &chunks).await.unwrap();
    assert_eq!(report.collection, "rfp");
    assert_eq!(report.indexed, 4);
    assert_eq!(report.dimensions, 3);
    assert_eq!(report.alias, None);

    let retriever = Retriever::new(embedder, store, "rfp", 3).unwrap();
    let hits = retriever.search("q", None, None).await.unwrap();
    assert_eq!(sources(&hits), vec!["P9", "P1", "P3"]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn rebuilding_twice_gives_identical_results() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(32));
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let chunks: Vec<_> = (0..9)
        .map(|i| chunk(&format!("d{i}"), 0, Some(&format!("P{i}")), &format!("section {i} of the tender")))
        .collect();
    let indexer = indexer(embedder.clone(), store.clone());
    let retriever = Retriever::new(embedder, store.clone(), "rfp", 5).unwrap();

    let first_report = indexer.rebuild("rfp", &chunks).await.unwrap();
    let first = retriever.search("maintenance of the network", None, None).await.unwrap();
    let second_report = indexer.rebuild("rfp", &chunks).await.unwrap();
    let second = retriever.search("maintenance of the network", None, None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.count("rfp").await.unwrap(), 9);
    assert_ne!(first_report.collection, second_report.collection);
    assert_eq!(second_report.previous.as_deref(), Some(first_report.collection.as_str()));
    assert!(second_report.previous_deleted);
    assert!(matches!(
        store.count(&first_report.collection).await,
        Err(RagError::NotFound(_))
    ));
}

#[tokio::test]
async fn retained_previous_collection_stays_searchable() {
    let (embedder, chunks) = ranked_fixture();
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let indexer = Indexer::builder()
        .embedding_provider(embedder)
        .vector_store(store.clone())
        .retain_previous(true)
        .build()
        .unwrap();

    let first = indexer.rebuild("rfp", &chunks).await.unwrap();
    let second = indexer.rebuild("rfp", &chunks[..2]).await.unwrap();

    assert!(first.collection.starts_with("rfp__"));
    assert!(!second.previous_deleted);
    assert_eq!(store.count(&first.collection).await.unwrap(), 4);
    assert_eq!(store.count("rfp").await.unwrap(), 2);
}

#[tokio::test]
async fn blank_chunks_are_skipped_and_counted() {
    let (embedder, mut chunks) = ranked_fixture();
    chunks.push(chunk("d5", 0, Some("P5"), "   "));
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());

    let report = indexer(embedder, store.clone()).rebuild("rfp", &chunks).await.unwrap();
    assert_eq!(report.indexed, 4);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.count("rfp").await.unwrap(), 4);
}

#[tokio::test]
async fn empty_input_leaves_alias_untouched() {
    let (embedder, chunks) = ranked_fixture();
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let indexer = indexer(embedder, store.clone());
    indexer.rebuild("rfp", &chunks).await.unwrap();

    let err = indexer.rebuild("rfp", &[]).await.unwrap_err();
    assert!(matches!(err, RagError::EmptyInput(_)));
    let err = indexer.rebuild("rfp", &[chunk("d1", 0, None, "\n\t ")]).await.unwrap_err();
    assert!(matches!(err, RagError::EmptyInput(_)));
    assert_eq!(store.count("rfp").await.unwrap(), 4);
}

#[tokio::test]
async fn failed_rebuild_drops_partial_collection_and_keeps_alias() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("store.json");
    let (embedder, chunks) = ranked_fixture();
    let store = Arc::new(InMemoryVectorStore::open(&snapshot).unwrap());

    let good = indexer(embedder, store.clone()).rebuild("rfp", &chunks).await.unwrap();

    // Two batches of two: the first lands, the second fails.
    let flaky: Arc<dyn EmbeddingProvider> = Arc::new(ScriptedEmbedder::new(3).failing_after(1));
    let err = indexer(flaky, store.clone()).rebuild("rfp", &chunks).await.unwrap_err();
    assert!(matches!(err, RagError::PipelineError(_)));

    assert_eq!(store.count("rfp").await.unwrap(), 4);
    store.flush().await.unwrap();
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot).unwrap()).unwrap();
    let collections: Vec<&String> = saved["collections"].as_object().unwrap().keys().collect();
    assert_eq!(collections, vec![&good.collection]);
    assert_eq!(saved["aliases"]["rfp"], good.collection.as_str());
}

struct LyingEmbedder;

#[async_trait::async_trait]
impl EmbeddingProvider for LyingEmbedder {
    fn name(&self) -> &str {
        "lying"
    }

    async fn embed(&self, _text: &str) -> rfp_rag::Result<Vec<f32>> {
        Ok(vec![0.5; 4])
    }

    fn dimensions(&self) -> usize {
        8
    }
}

#[tokio::test]
async fn probe_rejects_inconsistent_dimensions() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let indexer = indexer(Arc::new(LyingEmbedder), store);

    assert!(matches!(indexer.probe_dimensions().await, Err(RagError::EmbeddingError { .. })));
    let err = indexer.load("rfp", &[chunk("d", 0, None, "text")]).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingError { .. }));
}

#[tokio::test]
async fn builder_requires_backends_and_positive_batch() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    assert!(matches!(
        Indexer::builder().vector_store(store.clone()).build(),
        Err(RagError::ConfigError(_))
    ));
    assert!(matches!(
        Indexer::builder()
            .embedding_provider(Arc::new(DeterministicEmbeddingProvider::new(4)))
            .vector_store(store)
            .batch_size(0)
            .build(),
        Err(RagError::ConfigError(_))
    ));
}

#[tokio::test]
async fn snapshot_is_shared_between_processes() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("index.json");
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(16));
    let chunks = vec![chunk("a", 0, Some("P1"), "alpha"), chunk("b", 0, Some("P2"), "beta")];

    {
        let store = Arc::new(InMemoryVectorStore::open(&snapshot).unwrap());
        indexer(embedder.clone(), store).rebuild("rfp", &chunks).await.unwrap();
    }

    let reopened: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::open(&snapshot).unwrap());
    let retriever = Retriever::new(embedder, reopened, "rfp", 1).unwrap();
    let hits = retriever.search("beta", None, None).await.unwrap();
    assert_eq!(hits[0].metadata.doc_id, "b");
    assert_eq!(hits[0].text, "beta");
}

#[tokio::test]
async fn in_place_load_replaces_an_aliased_index() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(16));
    let store = Arc::new(InMemoryVectorStore::new());
    let indexer = indexer(embedder.clone(), store.clone());

    let built = indexer.rebuild("rfp", &[chunk("OLD", 0, Some("P_OLD"), "old text")]).await.unwrap();
    let loaded = indexer.load("rfp", &[chunk("NEW", 0, Some("P_NEW"), "new text")]).await.unwrap();
    assert_eq!(loaded.collection, "rfp");

    let retriever = Retriever::new(embedder, store.clone(), "rfp", 5).unwrap();
    let hits = retriever.search("new text", None, None).await.unwrap();
    assert_eq!(sources(&hits), vec!["P_NEW"]);
    assert!(matches!(store.count(&built.collection).await, Err(RagError::NotFound(_))));
}

/// Delegates to an in-memory store but refuses to repoint aliases.
struct AliasRefusingStore(InMemoryVectorStore);

#[async_trait::async_trait]
impl VectorStore for AliasRefusingStore {
    fn name(&self) -> &str {
        "alias-refusing"
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> rfp_rag::Result<()> {
        self.0.create_collection(name, dimensions).await
    }

    async fn delete_collection(&self, name: &str) -> rfp_rag::Result<()> {
        self.0.delete_collection(name).await
    }

    async fn upsert(&self, collection: &str, documents: &[rfp_rag::IndexedDocument]) -> rfp_rag::Result<()> {
        self.0.upsert(collection, documents).await
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> rfp_rag::Result<Vec<rfp_rag::RetrievedDocument>> {
        self.0.search(collection, embedding, top_k).await
    }

    async fn count(&self, collection: &str) -> rfp_rag::Result<usize> {
        self.0.count(collection).await
    }

    async fn point_alias(&self, _alias: &str, _collection: &str) -> rfp_rag::Result<Option<String>> {
        Err(RagError::VectorStoreError { backend: "alias-refusing".into(), message: "aliases disabled".into() })
    }
}

#[tokio::test]
async fn failed_alias_swap_drops_the_new_collection() {
    let (embedder, chunks) = ranked_fixture();
    let store = Arc::new(AliasRefusingStore(InMemoryVectorStore::new()));

    let err = indexer(embedder, store.clone()).rebuild("rfp", &chunks).await.unwrap_err();
    assert!(matches!(err, RagError::PipelineError(_)));

    assert!(matches!(store.count("rfp").await, Err(RagError::NotFound(_))));
    let leftover = store.0.collection_names().await;
    assert!(leftover.is_empty(), "leaked collections: {leftover:?}");
}
