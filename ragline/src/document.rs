//! Data types for documents, chunks, filters and retrieval results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata keys removed before a document summary is shown to callers.
const CURATED_KEYS: &[&str] = &["doc_id", "window", "original_text"];

/// A parsed unit of a file (for example one page) with its metadata.
///
/// Documents are immutable once created. The `doc_id` is generated when the
/// document is built, which the ingestion pipeline only does after parsing
/// of the whole file succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub doc_id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata: `file_name`, `page`, plus parser-specific fields.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document with a freshly generated id.
    pub fn new(text: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        Self { doc_id: Uuid::new_v4().to_string(), text: text.into(), metadata }
    }

    /// The `file_name` metadata entry, if present.
    pub fn file_name(&self) -> Option<&str> {
        self.metadata.get("file_name").map(String::as_str)
    }

    /// Summary of this document for API responses.
    pub fn to_ingested(&self) -> IngestedDoc {
        IngestedDoc::new(self.doc_id.clone(), self.metadata.clone())
    }
}

/// A segment of a [`Document`] with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk, derived from `doc_id` and `chunk_index`.
    pub chunk_id: String,
    /// The ID of the parent [`Document`].
    pub doc_id: String,
    /// Position of the chunk within its document, contiguous from zero.
    pub chunk_index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Byte offset of the chunk's first character in the document text.
    pub start: usize,
    /// Byte offset one past the chunk's last character in the document text.
    pub end: usize,
    /// The vector embedding for this chunk's text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Metadata inherited from the parent document plus `chunk_index`.
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Deterministic chunk id for position `chunk_index` of `doc_id`.
    ///
    /// Ids are UUIDs so that they are valid point ids for every backend.
    pub fn make_id(doc_id: &str, chunk_index: usize) -> String {
        let namespace = Uuid::parse_str(doc_id)
            .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, doc_id.as_bytes()));
        Uuid::new_v5(&namespace, chunk_index.to_string().as_bytes()).to_string()
    }
}

/// A [`Chunk`] returned by a vector store search, paired with its similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// The matched chunk. Backends may leave `embedding` empty.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// Restricts retrieval to a set of documents.
///
/// An absent filter (`Option::None` at the call site) means unrestricted;
/// a present filter with an empty list matches no document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextFilter {
    /// Documents that retrieval may return chunks from.
    #[serde(alias = "docs_ids")]
    pub document_ids: Vec<String>,
}

impl ContextFilter {
    /// Create a filter allowing the given documents.
    pub fn new<I, S>(document_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { document_ids: document_ids.into_iter().map(Into::into).collect() }
    }

    /// Whether chunks of `doc_id` pass the filter.
    pub fn allows(&self, doc_id: &str) -> bool {
        self.document_ids.iter().any(|id| id == doc_id)
    }
}

/// Whether `doc_id` passes an optional filter.
pub(crate) fn filter_allows(filter: Option<&ContextFilter>, doc_id: &str) -> bool {
    filter.is_none_or(|f| f.allows(doc_id))
}

/// Summary of an ingested document: its id and curated metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestedDoc {
    /// Always `"ingest.document"`.
    pub object: String,
    /// The ID of the document.
    pub doc_id: String,
    /// Metadata without internal bookkeeping keys.
    pub doc_metadata: Option<HashMap<String, String>>,
}

impl IngestedDoc {
    /// Build a summary, removing internal metadata keys.
    pub fn new(doc_id: impl Into<String>, mut metadata: HashMap<String, String>) -> Self {
        for key in CURATED_KEYS {
            metadata.remove(*key);
        }
        metadata.remove("chunk_index");
        Self { object: "ingest.document".to_string(), doc_id: doc_id.into(), doc_metadata: Some(metadata) }
    }
}

/// A chunk as returned to callers of retrieval, with optional neighbours.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    /// Always `"context.chunk"`.
    pub object: String,
    /// The similarity score (higher is more relevant).
    pub score: f32,
    /// The document this chunk belongs to.
    pub document: IngestedDoc,
    /// The text content of the chunk.
    pub text: String,
    /// Identifier of the chunk in the index.
    pub chunk_id: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Texts of the preceding chunks, nearest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_texts: Option<Vec<String>>,
    /// Texts of the following chunks, nearest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_texts: Option<Vec<String>>,
}

impl RetrievedChunk {
    /// Convert a search hit into a retrieval result entry.
    pub fn from_scored(scored: ScoredChunk) -> Self {
        let ScoredChunk { chunk, score } = scored;
        Self {
            object: "context.chunk".to_string(),
            score,
            document: IngestedDoc::new(chunk.doc_id.clone(), chunk.metadata),
            text: chunk.text,
            chunk_id: chunk.chunk_id,
            chunk_index: chunk.chunk_index,
            previous_texts: None,
            next_texts: None,
        }
    }

    /// The owning document's id.
    pub fn doc_id(&self) -> &str {
        &self.document.doc_id
    }
}

/// Ranked output of the retriever.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// Hits in descending score order.
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    /// Whether nothing matched.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of hits, not counting neighbours.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}
