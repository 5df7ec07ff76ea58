//! Query-time retrieval: embed → search → expand neighbours.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::document::{ContextFilter, RetrievalResult, RetrievedChunk};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::vectorstore::VectorStore;

/// Finds the chunks most relevant to a query.
///
/// Retrieval is read-only and safe to run from many tasks at once.
///
/// # Example
///
/// ```rust,ignore
/// let retriever = Retriever::new(embedder, store);
/// let filter = ContextFilter::new([doc_id]);
/// let result = retriever.retrieve("What color is the sky?", 10, 1, Some(&filter)).await?;
/// ```
#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    vector_store: Arc<dyn VectorStore>,
    similarity_threshold: Option<f32>,
}

impl Retriever {
    /// Create a retriever over `vector_store`, embedding queries with `embedder`.
    pub fn new(embedder: Embedder, vector_store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, vector_store, similarity_threshold: None }
    }

    /// Drop hits scoring below `threshold`.
    pub fn with_similarity_threshold(mut self, threshold: Option<f32>) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Retrieve at most `limit` chunks for `query`, best first.
    ///
    /// With `prev_next_chunks > 0` every hit also carries the texts of up to
    /// that many preceding and following chunks of its document, nearest
    /// first in both directions; fewer are returned at document edges. Neighbours do not count against `limit`.
    ///
    /// A filter with no document ids matches nothing and returns an empty
    /// result without touching the embedder or the index.
    ///
    /// # Errors
    ///
    /// Returns the embedder's or vector store's error.
    pub async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        prev_next_chunks: usize,
        filter: Option<&ContextFilter>,
    ) -> Result<RetrievalResult> {
        if limit == 0 || filter.is_some_and(|f| f.document_ids.is_empty()) {
            debug!(limit, "retrieval short-circuited");
            return Ok(RetrievalResult::default());
        }

        let query_embedding = self.embedder.embed_query(query).await.map_err(|e| {
            error!(error = %e, "embedding failed during retrieval");
            e
        })?;

        let hits = self.vector_store.search(&query_embedding, limit, filter).await.map_err(|e| {
            error!(error = %e, "vector store search failed");
            e
        })?;

        let mut chunks = Vec::with_capacity(hits.len());
        for hit in hits {
            if self.similarity_threshold.is_some_and(|t| hit.score < t) {
                continue;
            }
            let mut retrieved = RetrievedChunk::from_scored(hit);
            if prev_next_chunks > 0 {
                self.expand(&mut retrieved, prev_next_chunks).await?;
            }
            chunks.push(retrieved);
        }

        info!(result_count = chunks.len(), limit, prev_next_chunks, "retrieval completed");
        Ok(RetrievalResult { chunks })
    }

    async fn expand(&self, retrieved: &mut RetrievedChunk, n: usize) -> Result<()> {
        let index = retrieved.chunk_index;
        let doc_id = retrieved.doc_id().to_string();

        let after = index.saturating_add(1);
        let previous = self.vector_store.get_chunks(&doc_id, index.saturating_sub(n)..index).await?;
        let next = self.vector_store.get_chunks(&doc_id, after..after.saturating_add(n)).await?;

        retrieved.previous_texts = Some(previous.into_iter().rev().map(|c| c.text).collect());
        retrieved.next_texts = Some(next.into_iter().map(|c| c.text).collect());
        Ok(())
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder)
            .field("similarity_threshold", &self.similarity_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::Chunk;
    use crate::hashing::HashingEmbeddingProvider;
    use crate::inmemory::InMemoryVectorStore;

    async fn seeded() -> (Retriever, Arc<InMemoryVectorStore>) {
        let provider = HashingEmbeddingProvider::new(64);
        let embedder = Embedder::new(Arc::new(provider), 8);
        let store = Arc::new(InMemoryVectorStore::new());

        let texts = ["alpha one", "bravo two", "charlie three", "delta four"];
        let vectors = embedder.embed(&texts).await.unwrap();
        let chunks: Vec<Chunk> = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, embedding))| Chunk {
                chunk_id: Chunk::make_id("doc", i),
                doc_id: "doc".to_string(),
                chunk_index: i,
                text: (*text).to_string(),
                start: 0,
                end: text.len(),
                embedding,
                metadata: HashMap::new(),
            })
            .collect();
        store.upsert(&chunks).await.unwrap();
        (Retriever::new(embedder, store.clone()), store)
    }

    #[tokio::test]
    async fn neighbours_are_clipped_at_document_edges() {
        let (retriever, _) = seeded().await;
        let result = retriever.retrieve("alpha one", 1, 2, None).await.unwrap();
        let top = &result.chunks[0];
        assert_eq!(top.text, "alpha one");
        assert_eq!(top.previous_texts.as_deref(), Some(&[][..]));
        assert_eq!(top.next_texts.clone().unwrap(), vec!["bravo two", "charlie three"]);

        let result = retriever.retrieve("delta four", 1, 2, None).await.unwrap();
        let top = &result.chunks[0];
        assert_eq!(top.previous_texts.clone().unwrap(), vec!["charlie three", "bravo two"]);
        assert!(top.next_texts.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbounded_neighbour_count_returns_whole_document() {
        let (retriever, _) = seeded().await;
        let result = retriever.retrieve("bravo two", 1, usize::MAX, None).await.unwrap();
        let top = &result.chunks[0];
        assert_eq!(top.chunk_index, 1);
        assert_eq!(top.previous_texts.clone().unwrap(), vec!["alpha one"]);
        assert_eq!(top.next_texts.clone().unwrap(), vec!["charlie three", "delta four"]);
    }

    #[tokio::test]
    async fn empty_filter_matches_nothing() {
        let (retriever, _) = seeded().await;
        let result =
            retriever.retrieve("alpha", 5, 0, Some(&ContextFilter::default())).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn threshold_drops_weak_hits() {
        let (retriever, _) = seeded().await;
        let retriever = retriever.with_similarity_threshold(Some(0.9));
        let result = retriever.retrieve("charlie three", 4, 0, None).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.chunks[0].chunk_index, 2);
        assert!(result.chunks[0].previous_texts.is_none());
    }
}
