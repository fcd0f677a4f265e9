//! Data types for documents, chunks, and search results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// A full-text record supplied by the corpus loader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    /// Identifier of the document (e.g. the tender notice number).
    pub doc_id: String,
    /// The full text. `None` when the loader had no usable text for the row.
    pub text: Option<String>,
    /// Optional source tag, usually the project id the document belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
}

impl SourceDocument {
    /// Create a document with text and no source tag.
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { doc_id: doc_id.into(), text: Some(text.into()), source_tag: None }
    }

    /// Attach a source tag.
    pub fn with_source(mut self, source_tag: impl Into<String>) -> Self {
        self.source_tag = Some(source_tag.into());
        self
    }
}

/// A bounded slice of a document's text, the atomic retrieval unit.
///
/// Uniquely identified by `(doc_id, chunk_index)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// The ID of the parent [`SourceDocument`].
    pub doc_id: String,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Source tag inherited from the parent document.
    pub source_tag: Option<String>,
}

impl Chunk {
    /// Stable identifier `{doc_id}_{chunk_index}`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.doc_id, self.chunk_index)
    }
}

/// The chunking strategy that produced an indexed document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    #[default]
    Recursive,
    Semantic,
}

impl ChunkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recursive => "recursive",
            Self::Semantic => "semantic",
        }
    }
}

impl fmt::Display for ChunkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "semantic" => Ok(Self::Semantic),
            other => Err(RagError::ConfigError(format!(
                "unknown chunk mode '{other}' (expected 'recursive' or 'semantic')"
            ))),
        }
    }
}

/// Typed metadata carried from chunking through indexing and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub chunk_index: usize,
    pub source_tag: Option<String>,
    pub mode: ChunkMode,
}

/// A [`Chunk`] with its embedding, as stored in a vector store collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument {
    /// Position in the bulk load that produced this document. Stores that
    /// cannot keep insertion order natively use it to break score ties.
    pub ordinal: u64,
    /// The text content of the chunk.
    pub text: String,
    /// The vector embedding for this chunk's text.
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl IndexedDocument {
    /// Build an indexed document from a chunk and its embedding.
    pub fn from_chunk(chunk: &Chunk, mode: ChunkMode, embedding: Vec<f32>, ordinal: u64) -> Self {
        Self {
            ordinal,
            text: chunk.text.clone(),
            embedding,
            metadata: ChunkMetadata {
                doc_id: chunk.doc_id.clone(),
                chunk_index: chunk.chunk_index,
                source_tag: chunk.source_tag.clone(),
                mode,
            },
        }
    }

    /// Stable identifier `{doc_id}_{chunk_index}`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.metadata.doc_id, self.metadata.chunk_index)
    }
}

/// A search hit, ranked by descending similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    /// The text content of the retrieved chunk.
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
}
