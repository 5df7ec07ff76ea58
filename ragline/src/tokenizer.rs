//! Token counting shared by chunking, context assembly and prompt budgeting.

use std::ops::Range;

/// Splits text into tokens.
///
/// Spans returned by [`spans`](Tokenizer::spans) must tile the input: the
/// first span starts at byte 0, each span starts where the previous one
/// ended, and the last span ends at `text.len()`. Text without tokens yields
/// no spans.
pub trait Tokenizer: Send + Sync {
    /// Byte ranges of every token, covering the whole text.
    fn spans(&self, text: &str) -> Vec<Range<usize>>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.spans(text).len()
    }
}

/// Treats each run of non-whitespace characters as one token.
///
/// Whitespace following a word belongs to that word's span; leading
/// whitespace belongs to the first span.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl WhitespaceTokenizer {
    fn token_starts(text: &str) -> impl Iterator<Item = usize> + '_ {
        let mut prev_whitespace = true;
        text.char_indices().filter_map(move |(i, c)| {
            let whitespace = c.is_whitespace();
            let starts = !whitespace && prev_whitespace;
            prev_whitespace = whitespace;
            starts.then_some(i)
        })
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut starts: Vec<usize> = Self::token_starts(text).collect();
        let Some(first) = starts.first_mut() else {
            return Vec::new();
        };
        *first = 0;

        let mut spans = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            spans.push(start..end);
        }
        spans
    }

    fn count(&self, text: &str) -> usize {
        Self::token_starts(text).count()
    }
}
