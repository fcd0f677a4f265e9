//! Construct backend instances from [`Settings`].
//!
//! Each function is meant to be called once at startup; the returned
//! `Arc`s are then shared. Selecting a backend whose cargo feature was not
//! compiled in is a [`RagError::ConfigError`], never a silent fallback.

use std::sync::Arc;

use tracing::info;

use crate::config::{
    EmbeddingBackend, GeneratorBackend, JudgeBackend, Settings, VectorStoreBackend,
};
use crate::deterministic::DeterministicEmbeddingProvider;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{DummyGenerator, Generator};
use crate::inmemory::InMemoryVectorStore;
use crate::judge::{DummyJudge, Judge};
use crate::retriever::Retriever;
use crate::vectorstore::VectorStore;

#[cfg(not(all(feature = "hf", feature = "qdrant", feature = "openai")))]
fn feature_missing(key: &str, value: &str, feature: &str) -> RagError {
    RagError::ConfigError(format!(
        "{key}={value} requires rfp-rag to be built with the `{feature}` feature"
    ))
}

/// The embedding provider selected by `EMBEDDINGS_BACKEND`.
pub fn embedding_provider(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    let embeddings = &settings.embeddings;
    let provider: Arc<dyn EmbeddingProvider> = match embeddings.backend {
        EmbeddingBackend::Dummy => Arc::new(
            DeterministicEmbeddingProvider::new(embeddings.dimensions)
                .with_normalize(embeddings.normalize),
        ),
        #[cfg(feature = "hf")]
        EmbeddingBackend::Hf => Arc::new(crate::candle::CandleEmbeddingProvider::load(
            &embeddings.model_dir,
            embeddings.device,
            embeddings.normalize,
        )?),
        #[cfg(not(feature = "hf"))]
        EmbeddingBackend::Hf => return Err(feature_missing("EMBEDDINGS_BACKEND", "hf", "hf")),
    };
    info!(backend = provider.name(), dimensions = provider.dimensions(), "embedding backend ready");
    Ok(provider)
}

/// The vector store selected by `VECTOR_STORE_BACKEND`.
pub fn vector_store(settings: &Settings) -> Result<Arc<dyn VectorStore>> {
    let store = &settings.vector_store;
    let backend: Arc<dyn VectorStore> = match store.backend {
        VectorStoreBackend::Memory => Arc::new(InMemoryVectorStore::open(&store.snapshot_path)?),
        #[cfg(feature = "qdrant")]
        VectorStoreBackend::Qdrant => {
            Arc::new(crate::qdrant::QdrantVectorStore::new(&store.qdrant_url)?)
        }
        #[cfg(not(feature = "qdrant"))]
        VectorStoreBackend::Qdrant => {
            return Err(feature_missing("VECTOR_STORE_BACKEND", "qdrant", "qdrant"));
        }
    };
    info!(backend = backend.name(), collection = %store.collection, "vector store ready");
    Ok(backend)
}

/// A retriever over the configured collection with the configured `top_k`.
pub fn retriever(settings: &Settings) -> Result<Retriever> {
    Retriever::new(
        embedding_provider(settings)?,
        vector_store(settings)?,
        settings.vector_store.collection.clone(),
        settings.rag.top_k,
    )
}

#[cfg(feature = "openai")]
fn chat_client(settings: &Settings, key: &str, model: &str) -> Result<crate::openai::OpenAiChatClient> {
    let api_key = settings.llm.api_key.clone().ok_or_else(|| {
        RagError::ConfigError(format!("OPENAI_API_KEY is required when {key}=openai"))
    })?;
    Ok(crate::openai::OpenAiChatClient::new(api_key, model)?
        .with_base_url(&settings.llm.base_url)
        .with_retry(settings.llm.retry))
}

/// The answer generator selected by `GENERATOR_BACKEND`.
pub fn generator(settings: &Settings) -> Result<Arc<dyn Generator>> {
    let generator: Arc<dyn Generator> = match settings.generator_backend {
        GeneratorBackend::Dummy => Arc::new(DummyGenerator::new()),
        #[cfg(feature = "openai")]
        GeneratorBackend::OpenAi => Arc::new(crate::generation::OpenAiGenerator::new(
            chat_client(settings, "GENERATOR_BACKEND", &settings.generator_model)?,
        )),
        #[cfg(not(feature = "openai"))]
        GeneratorBackend::OpenAi => {
            return Err(feature_missing("GENERATOR_BACKEND", "openai", "openai"));
        }
    };
    info!(backend = generator.name(), "generator ready");
    Ok(generator)
}

/// The judge selected by `JUDGE_BACKEND`.
pub fn judge(settings: &Settings) -> Result<Arc<dyn Judge>> {
    let judge: Arc<dyn Judge> = match settings.judge_backend {
        JudgeBackend::Dummy => Arc::new(DummyJudge::new()),
        #[cfg(feature = "openai")]
        JudgeBackend::OpenAi => Arc::new(crate::judge::OpenAiJudge::new(chat_client(
            settings,
            "JUDGE_BACKEND",
            &settings.judge_model,
        )?)),
        #[cfg(not(feature = "openai"))]
        JudgeBackend::OpenAi => return Err(feature_missing("JUDGE_BACKEND", "openai", "openai")),
    };
    info!(backend = judge.name(), "judge ready");
    Ok(judge)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| map.get(key).cloned()).unwrap()
    }

    #[test]
    fn defaults_build_offline_backends() {
        let s = settings(&[("EMBEDDING_DIM", "16")]);
        let embedder = embedding_provider(&s).unwrap();
        assert_eq!(embedder.name(), "dummy");
        assert_eq!(embedder.dimensions(), 16);
        assert_eq!(generator(&s).unwrap().name(), "dummy");
        assert_eq!(judge(&s).unwrap().name(), "dummy");
    }

    #[cfg(not(feature = "openai"))]
    #[test]
    fn llm_backend_without_feature_is_a_config_error() {
        let s = settings(&[("JUDGE_BACKEND", "openai")]);
        assert!(matches!(judge(&s), Err(RagError::ConfigError(msg)) if msg.contains("openai")));
    }

    #[cfg(feature = "openai")]
    #[test]
    fn llm_backend_without_key_is_a_config_error() {
        let s = settings(&[("GENERATOR_BACKEND", "openai")]);
        assert!(matches!(generator(&s), Err(RagError::ConfigError(msg)) if msg.contains("OPENAI_API_KEY")));
    }
}
