//! Document chunking.
//!
//! [`RecursiveChunker`] splits on the coarsest separator present in the text
//! (paragraph breaks, then line breaks, then spaces, then single characters)
//! and greedily merges the pieces back into windows of at most `chunk_size`
//! characters, carrying up to `chunk_overlap` characters of trailing context
//! into the next window.
//!
//! Sizes are measured in Unicode scalar values, never bytes, so multi-byte
//! scripts are never split inside a character.

use tracing::debug;

use crate::document::{Chunk, SourceDocument};

/// Separators tried in order, coarsest first. The empty separator splits into
/// single characters and always applies.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has no text or only whitespace.
    fn chunk(&self, document: &SourceDocument) -> Vec<Chunk>;
}

/// Splits text hierarchically: paragraphs → lines → words → characters.
///
/// # Example
///
/// ```rust
/// use rfp_rag::{Chunker, RecursiveChunker, SourceDocument};
///
/// let chunker = RecursiveChunker::new(40, 10);
/// let doc = SourceDocument::new("20240101", "First paragraph.\n\nSecond paragraph is here.");
/// let chunks = chunker.chunk(&doc);
/// assert!(chunks.iter().all(|c| c.text.chars().count() <= 40));
/// assert_eq!(chunks[0].chunk_index, 0);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker` with [`DEFAULT_SEPARATORS`].
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk (at least 1)
    /// * `chunk_overlap`: characters of context repeated between adjacent chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the separator hierarchy. An empty string is appended if missing
    /// so that every piece can always be brought under `chunk_size`.
    pub fn with_separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.separators = separators.into_iter().map(Into::into).collect();
        if self.separators.last().is_none_or(|s| !s.is_empty()) {
            self.separators.push(String::new());
        }
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split raw text into chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (position, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map(|(i, sep)| (i, *sep))
            .unwrap_or((separators.len(), ""));
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                let piece = piece.trim();
                if !piece.is_empty() {
                    chunks.push(piece.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }

        chunks
    }

    /// Greedily merge small pieces into windows of at most `chunk_size`
    /// characters, keeping up to `chunk_overlap` characters of the previous
    /// window at the start of the next.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: Vec<(&str, usize)> = Vec::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window);
                while !window.is_empty()
                    && (total > self.chunk_overlap || total + len > self.chunk_size)
                {
                    total -= window.remove(0).1;
                }
            }
            window.push((piece, len));
            total += len;
        }
        push_trimmed(&mut chunks, &window);

        chunks
    }
}

impl Default for RecursiveChunker {
    fn default() -> Self {
        Self::new(1000, 150)
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &SourceDocument) -> Vec<Chunk> {
        let Some(text) = document.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            debug!(doc_id = %document.doc_id, "skipping document without text");
            return Vec::new();
        };

        self.split_text(text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                doc_id: document.doc_id.clone(),
                chunk_index,
                text,
                source_tag: document.source_tag.clone(),
            })
            .collect()
    }
}

/// Chunk every document of a corpus, preserving corpus order.
pub fn chunk_corpus(chunker: &dyn Chunker, documents: &[SourceDocument]) -> Vec<Chunk> {
    documents.iter().flat_map(|doc| chunker.chunk(doc)).collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_trimmed(chunks: &mut Vec<String>, window: &[(&str, usize)]) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split `text` at `separator`, attaching each separator to the start of the
/// piece that follows it. The empty separator yields single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_attaches_to_following_piece() {
        assert_eq!(split_keeping_separator("a b c", " "), vec!["a", " b", " c"]);
        assert_eq!(split_keeping_separator(" a", " "), vec![" a"]);
        assert_eq!(split_keeping_separator("가나", ""), vec!["가", "나"]);
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = RecursiveChunker::new(100, 10);
        assert_eq!(chunker.split_text("  hello world  "), vec!["hello world".to_string()]);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let chunker = RecursiveChunker::new(30, 0);
        let text = "alpha beta gamma\n\ndelta epsilon zeta\n\neta theta";
        assert_eq!(
            chunker.split_text(text),
            vec!["alpha beta gamma", "delta epsilon zeta", "eta theta"]
        );
    }

    #[test]
    fn falls_back_to_characters_for_unbroken_text() {
        let chunker = RecursiveChunker::new(4, 1);
        let chunks = chunker.split_text("abcdefghij");
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(chunks.first().map(String::as_str), Some("abcd"));
        assert!(chunks[1].starts_with('d'));
    }

    #[test]
    fn words_overlap_between_windows() {
        let chunker = RecursiveChunker::new(11, 5);
        let chunks = chunker.split_text("aaaa bbbb cccc dddd");
        assert_eq!(chunks, vec!["aaaa bbbb", "bbbb cccc", "cccc dddd"]);
    }
}
