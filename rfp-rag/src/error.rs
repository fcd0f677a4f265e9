//! Error types for the `rfp-rag` crate.

use thiserror::Error;

/// Errors that can occur in retrieval, generation and evaluation.
#[derive(Debug, Error)]
pub enum RagError {
    /// An invalid or unknown configuration value, or an input table missing
    /// required columns. Never retried.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A file, collection or referenced document that the operation needed
    /// does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A generation or judge backend could not be reached, timed out, or
    /// answered with a transient failure after all retries were spent.
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable {
        /// The backend that failed.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A backend answered, but the reply could not be interpreted.
    #[error("Malformed response ({backend}): {message}")]
    MalformedResponse {
        /// The backend that produced the reply.
        backend: String,
        /// A description of what was wrong with it.
        message: String,
    },

    /// There was nothing to work on: no usable chunks, no queries, or no
    /// successfully evaluated query to summarise.
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error in indexing or query orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Whether a single query may fail with this error without invalidating
    /// the rest of an evaluation run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. } | Self::MalformedResponse { .. })
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
