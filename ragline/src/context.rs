//! Packing retrieved chunks into a bounded context block.

use std::collections::HashMap;
use std::iter;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{RetrievalResult, RetrievedChunk};
use crate::tokenizer::{Tokenizer, WhitespaceTokenizer};

const SEPARATOR: &str = "\n\n";

/// A document referenced by an assembled context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// The cited document.
    pub doc_id: String,
    /// Its curated metadata, e.g. `file_name` and `page`.
    pub metadata: HashMap<String, String>,
}

/// Result of [`ContextAssembler::assemble`].
#[derive(Debug, Clone, PartialEq)]
pub enum AssembledContext {
    /// Nothing was retrieved or nothing fit the budget.
    Empty,
    /// Text to place in front of the question.
    Context {
        /// Retrieved texts joined by blank lines.
        text: String,
        /// One entry per source document, in first-referenced order.
        citations: Vec<Citation>,
        /// Hits that contributed to `text`, best first.
        sources: Vec<RetrievedChunk>,
    },
}

impl AssembledContext {
    /// Whether no context was produced.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The context text, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::Context { text, .. } => Some(text),
        }
    }

    /// Cited documents; empty for [`AssembledContext::Empty`].
    pub fn citations(&self) -> &[Citation] {
        match self {
            Self::Empty => &[],
            Self::Context { citations, .. } => citations,
        }
    }
}

/// Greedily packs retrieved texts under a token budget.
///
/// Hits are taken best first. For each hit its previous texts, its own text
/// and its next texts are considered in document order. A piece already
/// contained in the context is skipped; the first piece that would push the
/// context past the budget ends assembly.
#[derive(Clone)]
pub struct ContextAssembler {
    tokenizer: Arc<dyn Tokenizer>,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(Arc::new(WhitespaceTokenizer))
    }
}

impl ContextAssembler {
    /// Create an assembler counting tokens with `tokenizer`.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Build the context for `result` using at most `token_budget` tokens.
    pub fn assemble(&self, result: &RetrievalResult, token_budget: usize) -> AssembledContext {
        let mut text = String::new();
        let mut sources: Vec<RetrievedChunk> = Vec::new();
        let mut citations: Vec<Citation> = Vec::new();

        for hit in &result.chunks {
            let pieces = hit
                .previous_texts
                .iter()
                .flat_map(|texts| texts.iter().rev())
                .chain(iter::once(&hit.text))
                .chain(hit.next_texts.iter().flatten());

            let mut referenced = false;
            let mut exhausted = false;
            for piece in pieces.map(|p| p.trim()).filter(|p| !p.is_empty()) {
                if text.contains(piece) {
                    referenced = true;
                    continue;
                }
                let candidate =
                    if text.is_empty() { piece.to_string() } else { format!("{text}{SEPARATOR}{piece}") };
                if self.tokenizer.count(&candidate) > token_budget {
                    exhausted = true;
                    break;
                }
                text = candidate;
                referenced = true;
            }

            if referenced {
                if !citations.iter().any(|c| c.doc_id == hit.doc_id()) {
                    citations.push(Citation {
                        doc_id: hit.doc_id().to_string(),
                        metadata: hit.document.doc_metadata.clone().unwrap_or_default(),
                    });
                }
                sources.push(hit.clone());
            }
            if exhausted {
                debug!(token_budget, included = sources.len(), "context budget exhausted");
                break;
            }
        }

        if text.is_empty() {
            return AssembledContext::Empty;
        }
        AssembledContext::Context { text, citations, sources }
    }
}

impl std::fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAssembler").finish_non_exhaustive()
    }
}
