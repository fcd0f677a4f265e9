//! # rfp-rag
//!
//! Retrieval, answer generation and evaluation over a corpus of procurement
//! documents (requests for proposals).
//!
//! The crate is organised leaves first:
//!
//! - [`chunking`] splits document text into overlapping windows.
//! - [`embedding`] turns text into vectors ([`DeterministicEmbeddingProvider`]
//!   offline, a candle encoder with the `hf` feature).
//! - [`vectorstore`] stores and searches vectors ([`InMemoryVectorStore`],
//!   Qdrant with the `qdrant` feature); [`Indexer`] loads chunks into it.
//! - [`Retriever`] embeds a query and searches one collection.
//! - [`generation`] and [`judge`] turn retrieved context into an answer and
//!   score it (offline stubs, or an OpenAI-compatible model with `openai`).
//! - [`eval`] runs labelled queries through all of the above and reports
//!   Hit@K, MRR@K and mean judge scores.
//!
//! Backends are selected once from [`Settings`] through the [`backends`]
//! factory.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rfp_rag::*;
//!
//! let embedder: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(1024));
//! let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
//!
//! let chunks = chunk_corpus(&RecursiveChunker::default(), &documents);
//! Indexer::builder()
//!     .embedding_provider(embedder.clone())
//!     .vector_store(store.clone())
//!     .build()?
//!     .rebuild("rfp", &chunks)
//!     .await?;
//!
//! let retriever = Retriever::new(embedder, store, "rfp", 5)?;
//! let hits = retriever.search("network maintenance terms", None, None).await?;
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Backend |
//! |---------|---------|
//! | `openai` | OpenAI-compatible chat completions for generation and judging |
//! | `qdrant` | Qdrant vector store |
//! | `hf` | Local XLM-RoBERTa / BGE-M3 encoder on candle |
//! | `cuda`, `metal` | GPU acceleration for `hf` |

pub mod backends;
pub mod chunking;
pub mod config;
pub mod dataset;
pub mod deterministic;
pub mod document;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod generation;
pub mod indexer;
pub mod inmemory;
pub mod judge;
pub mod rag;
pub mod retriever;
pub mod retry;
pub mod vectorstore;

#[cfg(feature = "hf")]
pub mod candle;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use chunking::{Chunker, RecursiveChunker, chunk_corpus};
pub use config::{RagConfig, RagConfigBuilder, Settings};
pub use deterministic::DeterministicEmbeddingProvider;
pub use document::{Chunk, ChunkMetadata, ChunkMode, IndexedDocument, RetrievedDocument, SourceDocument};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use eval::{
    CancelFlag, EvalEvent, EvalFailure, EvalOptions, EvalQuery, EvalRecord, EvalReport, EvalSummary,
    Evaluator, RelevanceLevel,
};
pub use generation::{DummyGenerator, Generator};
pub use indexer::{IndexReport, Indexer, IndexerBuilder};
pub use inmemory::InMemoryVectorStore;
pub use judge::{DummyJudge, Judge, JudgeScores};
pub use rag::RagService;
pub use retriever::Retriever;
pub use retry::RetryPolicy;
pub use vectorstore::VectorStore;
