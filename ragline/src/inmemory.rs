//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by
//! maps protected by a single `tokio::sync::RwLock`. Every operation takes
//! the lock once, so deletes and upserts are atomic with respect to searches.
//! It is suitable for development, testing, and small corpora.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Chunk, ContextFilter, IngestedDoc, ScoredChunk, filter_allows};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorStore, rank};

#[derive(Debug, Default)]
struct Inner {
    dimensions: Option<usize>,
    /// doc_id → chunk_index → chunk
    documents: HashMap<String, BTreeMap<usize, Chunk>>,
}

impl Inner {
    fn check_dimensions(&self, actual: usize) -> Result<()> {
        match self.dimensions {
            Some(expected) if expected != actual => {
                Err(RagError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }
}

/// An in-memory vector store using cosine similarity for search.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection(384).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<Inner>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored chunks.
    pub async fn len(&self) -> usize {
        self.inner.read().await.documents.values().map(BTreeMap::len).sum()
    }

    /// Whether no chunks are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, dimensions: usize) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_dimensions(dimensions)?;
        inner.dimensions = Some(dimensions);
        Ok(())
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        let Some(first) = chunks.first() else {
            return Ok(());
        };

        let mut inner = self.inner.write().await;
        let dimensions = inner.dimensions.unwrap_or(first.embedding.len());
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimensions) {
            return Err(RagError::DimensionMismatch { expected: dimensions, actual: bad.embedding.len() });
        }
        inner.dimensions = Some(dimensions);

        for chunk in chunks {
            inner
                .documents
                .entry(chunk.doc_id.clone())
                .or_default()
                .insert(chunk.chunk_index, chunk.clone());
        }
        debug!(count = chunks.len(), "upserted chunks in memory");
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&ContextFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let inner = self.inner.read().await;
        inner.check_dimensions(embedding.len())?;

        let mut scored: Vec<ScoredChunk> = inner
            .documents
            .iter()
            .filter(|(doc_id, _)| filter_allows(filter, doc_id))
            .flat_map(|(_, chunks)| chunks.values())
            .map(|chunk| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(&chunk.embedding, embedding),
            })
            .collect();

        rank(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_document(&self, doc_id: &str) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let removed = inner.documents.remove(doc_id).map_or(0, |chunks| chunks.len());
        debug!(doc_id, removed, "deleted document from memory");
        Ok(removed)
    }

    async fn get_chunks(&self, doc_id: &str, indices: Range<usize>) -> Result<Vec<Chunk>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        Ok(inner
            .documents
            .get(doc_id)
            .map(|chunks| chunks.range(indices).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_documents(&self) -> Result<Vec<IngestedDoc>> {
        let inner = self.inner.read().await;
        let mut docs: Vec<IngestedDoc> = inner
            .documents
            .iter()
            .filter_map(|(doc_id, chunks)| {
                chunks.values().next().map(|c| IngestedDoc::new(doc_id.clone(), c.metadata.clone()))
            })
            .collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc_id: &str, index: usize, embedding: Vec<f32>) -> Chunk {
        Chunk {
            chunk_id: format!("{doc_id}-{index}"),
            doc_id: doc_id.to_string(),
            chunk_index: index,
            text: format!("{doc_id} chunk {index}"),
            start: 0,
            end: 0,
            embedding,
            metadata: HashMap::from([("file_name".to_string(), format!("{doc_id}.txt"))]),
        }
    }

    #[tokio::test]
    async fn ties_break_by_chunk_id() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(&[chunk("b", 0, vec![1.0, 0.0]), chunk("a", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a-0", "b-0"]);
    }

    #[tokio::test]
    async fn rejects_mixed_dimensions() {
        let store = InMemoryVectorStore::new();
        store.create_collection(2).await.unwrap();
        let err = store.upsert(&[chunk("a", 0, vec![1.0, 0.0, 0.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }));
        assert!(store.create_collection(3).await.is_err());
        assert!(store.search(&[1.0], 1, None).await.is_err());
    }

    #[tokio::test]
    async fn rejected_upsert_writes_nothing() {
        let store = InMemoryVectorStore::new();
        let err = store.upsert(&[chunk("a", 0, vec![1.0, 0.0]), chunk("a", 1, vec![1.0])]).await;
        assert!(err.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn filter_restricts_documents() {
        let store = InMemoryVectorStore::new();
        store.upsert(&[chunk("a", 0, vec![1.0, 0.0]), chunk("b", 0, vec![1.0, 0.1])]).await.unwrap();
        let filter = ContextFilter::new(["b"]);
        let hits = store.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.doc_id, "b");
    }

    #[tokio::test]
    async fn neighbours_stop_at_edges() {
        let store = InMemoryVectorStore::new();
        let chunks: Vec<Chunk> = (0..3).map(|i| chunk("a", i, vec![1.0, i as f32])).collect();
        store.upsert(&chunks).await.unwrap();
        let got = store.get_chunks("a", 1..10).await.unwrap();
        assert_eq!(got.iter().map(|c| c.chunk_index).collect::<Vec<_>>(), vec![1, 2]);
        assert!(store.get_chunks("missing", 0..2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_whole_document() {
        let store = InMemoryVectorStore::new();
        let mut chunks: Vec<Chunk> = (0..4).map(|i| chunk("a", i, vec![1.0, 0.0])).collect();
        chunks.push(chunk("b", 0, vec![0.0, 1.0]));
        store.upsert(&chunks).await.unwrap();

        assert_eq!(store.delete_document("a").await.unwrap(), 4);
        assert_eq!(store.delete_document("a").await.unwrap(), 0);
        let docs = store.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "b");
    }
}
