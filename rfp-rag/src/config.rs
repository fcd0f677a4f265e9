//! Configuration for chunking, retrieval, backends and evaluation.
//!
//! [`RagConfig`] holds the validated numeric knobs of the pipeline.
//! [`Settings`] aggregates every recognised environment key; build it once
//! with [`Settings::from_env`] and hand it to the [`backends`](crate::backends)
//! factory.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::ChunkMode;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// Configuration parameters for chunking, retrieval and indexing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Default number of documents returned by the retriever.
    pub top_k: usize,
    /// Number of documents embedded and upserted per batch while indexing.
    pub batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 150, top_k: 5, batch_size: 128 }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the default number of results returned by the retriever.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the indexing batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `batch_size == 0`
    pub fn build(self) -> Result<RagConfig> {
        if self.config.chunk_overlap >= self.config.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.config.chunk_overlap, self.config.chunk_size
            )));
        }
        if self.config.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if self.config.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        Ok(self.config)
    }
}

// ── Backend selectors ──────────────────────────────────────────────

fn parse_selector<T: Copy>(kind: &str, value: &str, options: &[(&str, T)]) -> Result<T> {
    let wanted = value.trim().to_ascii_lowercase();
    options.iter().find(|(name, _)| *name == wanted).map(|(_, v)| *v).ok_or_else(|| {
        let accepted: Vec<&str> = options.iter().map(|(name, _)| *name).collect();
        RagError::ConfigError(format!(
            "unknown {kind} '{value}' (accepted: {})",
            accepted.join(", ")
        ))
    })
}

/// Which embedding implementation to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Hash-seeded deterministic vectors; no model required.
    #[default]
    Dummy,
    /// Local transformer encoder loaded with candle.
    Hf,
}

impl EmbeddingBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dummy => "dummy",
            Self::Hf => "hf",
        }
    }
}

impl FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        parse_selector("EMBEDDINGS_BACKEND", s, &[("dummy", Self::Dummy), ("hf", Self::Hf)])
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which answer generator to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeneratorBackend {
    #[default]
    Dummy,
    OpenAi,
}

impl GeneratorBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dummy => "dummy",
            Self::OpenAi => "openai",
        }
    }
}

impl FromStr for GeneratorBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        parse_selector("GENERATOR_BACKEND", s, &[("dummy", Self::Dummy), ("openai", Self::OpenAi)])
    }
}

impl fmt::Display for GeneratorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which answer judge to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JudgeBackend {
    #[default]
    Dummy,
    OpenAi,
}

impl JudgeBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dummy => "dummy",
            Self::OpenAi => "openai",
        }
    }
}

impl FromStr for JudgeBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        parse_selector("JUDGE_BACKEND", s, &[("dummy", Self::Dummy), ("openai", Self::OpenAi)])
    }
}

impl fmt::Display for JudgeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which vector store to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VectorStoreBackend {
    /// In-process store, optionally persisted to a JSON snapshot.
    #[default]
    Memory,
    Qdrant,
}

impl VectorStoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Qdrant => "qdrant",
        }
    }
}

impl FromStr for VectorStoreBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        parse_selector("VECTOR_STORE_BACKEND", s, &[("memory", Self::Memory), ("qdrant", Self::Qdrant)])
    }
}

impl fmt::Display for VectorStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute device requested for the local encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DevicePreference {
    /// CUDA if available, then Metal, then CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl FromStr for DevicePreference {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        parse_selector(
            "EMBEDDING_DEVICE",
            s,
            &[("auto", Self::Auto), ("cpu", Self::Cpu), ("cuda", Self::Cuda), ("metal", Self::Metal)],
        )
    }
}

// ── Settings ───────────────────────────────────────────────────────

/// Embedding backend selection and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    /// Dimensionality of the deterministic backend.
    pub dimensions: usize,
    pub normalize: bool,
    /// Directory holding `config.json`, `tokenizer.json` and weights for `hf`.
    pub model_dir: PathBuf,
    pub device: DevicePreference,
}

/// Connection parameters shared by the LLM-backed generator and judge.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorStoreSettings {
    pub backend: VectorStoreBackend,
    /// Snapshot file of the memory backend.
    pub snapshot_path: PathBuf,
    pub qdrant_url: String,
    /// Collection (or alias) searched by the retriever and rebuilt by the indexer.
    pub collection: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalSettings {
    /// Labelled query table.
    pub path: PathBuf,
    /// K used for Hit@K and MRR@K.
    pub top_k: usize,
    /// Per-query results table.
    pub out: PathBuf,
    /// Line-delimited JSON log of answers and judgements.
    pub judgments_out: PathBuf,
}

/// Every recognised configuration key, parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub rag: RagConfig,
    pub mode: ChunkMode,
    pub data_dir: PathBuf,
    pub outputs_dir: PathBuf,
    /// Full-text corpus table read by the chunker.
    pub corpus_path: PathBuf,
    pub embeddings: EmbeddingSettings,
    pub generator_backend: GeneratorBackend,
    pub generator_model: String,
    pub judge_backend: JudgeBackend,
    pub judge_model: String,
    pub llm: LlmSettings,
    pub vector_store: VectorStoreSettings,
    pub eval: EvalSettings,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let top_k = match env.string("RAG_TOP_K") {
            Some(_) => env.parse("RAG_TOP_K", 5usize)?,
            None => env.parse("TOP_K", 5usize)?,
        };
        let rag = RagConfig::builder()
            .chunk_size(env.parse("CHUNK_SIZE", 1000)?)
            .chunk_overlap(env.parse("CHUNK_OVERLAP", 150)?)
            .top_k(top_k)
            .batch_size(env.parse("INDEX_BATCH_SIZE", 128)?)
            .build()?;

        let data_dir = PathBuf::from(env.string("DATA_DIR").unwrap_or_else(|| "data".into()));
        let outputs_dir =
            PathBuf::from(env.string("OUTPUTS_DIR").unwrap_or_else(|| "outputs".into()));

        let embeddings = EmbeddingSettings {
            backend: env.select("EMBEDDINGS_BACKEND", EmbeddingBackend::Dummy)?,
            dimensions: env.parse("EMBEDDING_DIM", 1024)?,
            normalize: env.flag("EMBEDDING_NORMALIZE", true)?,
            model_dir: env.path("EMBEDDING_MODEL_DIR", PathBuf::from("models/bge-m3")),
            device: env.select("EMBEDDING_DEVICE", DevicePreference::Auto)?,
        };
        if embeddings.dimensions == 0 {
            return Err(RagError::ConfigError("EMBEDDING_DIM must be greater than zero".into()));
        }

        let llm = LlmSettings {
            api_key: env.string("OPENAI_API_KEY"),
            base_url: env
                .string("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            retry: RetryPolicy {
                max_retries: env.parse("LLM_MAX_RETRIES", 2)?,
                base_delay: Duration::from_millis(env.parse("LLM_RETRY_BACKOFF_MS", 500)?),
                timeout: Duration::from_secs(env.parse("LLM_TIMEOUT_SECS", 60)?),
            },
        };

        let vector_store = VectorStoreSettings {
            backend: env.select("VECTOR_STORE_BACKEND", VectorStoreBackend::Memory)?,
            snapshot_path: env.path("VECTOR_STORE_PATH", outputs_dir.join("vector_store.json")),
            qdrant_url: env.string("QDRANT_URL").unwrap_or_else(|| "http://localhost:6334".into()),
            collection: env
                .string("QDRANT_COLLECTION")
                .unwrap_or_else(|| "rfp_recursive_DUMMY".into()),
        };

        let eval = EvalSettings {
            path: env.path("EVAL_PATH", data_dir.join("eval_queries.csv")),
            top_k: env.parse("EVAL_TOP_K", 5)?,
            out: env.path("EVAL_OUT", outputs_dir.join("eval_mixed_results.csv")),
            judgments_out: env
                .path("EVAL_JUDGMENTS_OUT", outputs_dir.join("eval_mixed_judgments.jsonl")),
        };
        if eval.top_k == 0 {
            return Err(RagError::ConfigError("EVAL_TOP_K must be greater than zero".into()));
        }

        Ok(Self {
            rag,
            mode: env.select("RAG_MODE", ChunkMode::Recursive)?,
            corpus_path: env.path("CORPUS_PATH", data_dir.join("data_list_fulltext.csv")),
            data_dir,
            outputs_dir,
            embeddings,
            generator_backend: env.select("GENERATOR_BACKEND", GeneratorBackend::Dummy)?,
            generator_model: env.string("GENERATOR_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            judge_backend: env.select("JUDGE_BACKEND", JudgeBackend::Dummy)?,
            judge_model: env.string("JUDGE_MODEL").unwrap_or_else(|| "gpt-5-mini".into()),
            llm,
            vector_store,
            eval,
        })
    }

    /// Chunk table for the given chunking mode.
    pub fn chunks_path(&self, mode: ChunkMode) -> PathBuf {
        self.data_dir.join(format!("data_list_chunks_{mode}.csv"))
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn path(&self, key: &str, default: PathBuf) -> PathBuf {
        self.string(key).map(PathBuf::from).unwrap_or(default)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| RagError::ConfigError(format!("{key}='{raw}' is invalid: {e}"))),
        }
    }

    fn select<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr<Err = RagError>,
    {
        self.string(key).map_or(Ok(default), |raw| raw.parse())
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.string(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(RagError::ConfigError(format!("{key}='{v}' is not a boolean"))),
        }
    }
}
