//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`TokenChunker`], which
//! splits text into windows of a fixed number of tokens where consecutive
//! windows share `chunk_overlap` tokens.

use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::tokenizer::{Tokenizer, WhitespaceTokenizer};

/// A contiguous slice of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    /// The segment text, equal to `source[start..end]`.
    pub text: String,
    /// Byte offset of the first character in the source text.
    pub start: usize,
    /// Byte offset one past the last character in the source text.
    pub end: usize,
}

/// A strategy for splitting document text into ordered segments.
///
/// Implementations must be deterministic: identical input and configuration
/// always produce identical segments. Segments are returned in document
/// order and together cover the whole text.
pub trait Chunker: Send + Sync {
    /// Split `text` into segments.
    ///
    /// Returns an empty `Vec` if the text contains no tokens.
    fn split(&self, text: &str) -> Vec<TextSegment>;
}

/// Splits text into windows of `chunk_size` tokens overlapping by `chunk_overlap`.
///
/// The overlap is at most half the chunk size, so every token belongs to at
/// most two segments. The last segment may be shorter than `chunk_size`;
/// text shorter than `chunk_size` produces exactly one segment.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::TokenChunker;
///
/// let chunker = TokenChunker::new(256, 32)?;
/// let segments = chunker.split(&document.text);
/// ```
#[derive(Clone)]
pub struct TokenChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenChunker {
    /// Create a chunker counting whitespace-separated tokens.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size` is zero or
    /// `chunk_overlap` exceeds half of it.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::with_tokenizer(chunk_size, chunk_overlap, Arc::new(WhitespaceTokenizer))
    }

    /// Create a chunker that counts tokens with `tokenizer`.
    ///
    /// # Errors
    ///
    /// See [`TokenChunker::new`].
    pub fn with_tokenizer(
        chunk_size: usize,
        chunk_overlap: usize,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap * 2 > chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be at most half of chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap, tokenizer })
    }

    /// Target number of tokens per segment.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of tokens shared by consecutive segments.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl std::fmt::Debug for TokenChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenChunker")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish()
    }
}

impl Chunker for TokenChunker {
    fn split(&self, text: &str) -> Vec<TextSegment> {
        let spans = self.tokenizer.spans(text);
        if spans.is_empty() {
            return Vec::new();
        }

        let step = self.chunk_size - self.chunk_overlap;
        let mut segments = Vec::new();
        let mut first_token = 0;

        loop {
            let last_token = (first_token + self.chunk_size).min(spans.len());
            let start = spans[first_token].start;
            let end = spans[last_token - 1].end;
            segments.push(TextSegment { text: text[start..end].to_string(), start, end });

            if last_token == spans.len() {
                break;
            }
            first_token += step;
        }

        segments
    }
}
