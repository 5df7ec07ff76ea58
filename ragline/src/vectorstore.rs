//! Vector store trait for storing and searching chunk embeddings.

use std::ops::Range;

use async_trait::async_trait;

use crate::document::{Chunk, ContextFilter, IngestedDoc, ScoredChunk};
use crate::error::Result;

/// A storage backend for chunk embeddings with similarity search.
///
/// Each call is one atomic round trip: a search never observes half of an
/// upsert or half of a [`delete_document`](VectorStore::delete_document).
/// Implementations must be safe for concurrent use from many tasks.
///
/// The embedding dimension is fixed by [`create_collection`](VectorStore::create_collection)
/// or, failing that, by the first upsert; later vectors of another dimension
/// are rejected with [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch).
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection(384).await?;
/// store.upsert(&chunks).await?;
/// let hits = store.search(&query_embedding, 5, None).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare storage for vectors of `dimensions` entries. No-op if it already
    /// exists with the same dimension.
    async fn create_collection(&self, dimensions: usize) -> Result<()>;

    /// Insert or replace chunks. Chunks must have embeddings set.
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()>;

    /// Return at most `limit` chunks most similar to `embedding`.
    ///
    /// Results are ordered by descending score, ties broken by ascending
    /// `chunk_id`. When `filter` is present only chunks of the listed
    /// documents are considered.
    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&ContextFilter>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Remove every chunk of `doc_id`, returning how many were removed.
    async fn delete_document(&self, doc_id: &str) -> Result<usize>;

    /// Chunks of `doc_id` whose `chunk_index` falls in `indices`, ascending.
    ///
    /// Indices outside the document are skipped without error.
    async fn get_chunks(&self, doc_id: &str, indices: Range<usize>) -> Result<Vec<Chunk>>;

    /// Every document with at least one stored chunk.
    async fn list_documents(&self) -> Result<Vec<IngestedDoc>>;
}

/// Order search hits by descending score, then ascending chunk id.
pub(crate) fn rank(hits: &mut [ScoredChunk]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
}
