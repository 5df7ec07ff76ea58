//! Embedding providers and the shared [`Embedder`] handle.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// Providers report an unreachable or unloaded model as
/// [`RagError::EmbeddingUnavailable`]; they never substitute zero vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Short provider name used in logs and errors.
    fn name(&self) -> &str {
        "embedding"
    }
}

/// Shared, cheaply cloneable handle to one embedding provider.
///
/// Construct it once at startup and clone it into the ingestion pipeline and
/// the retriever. Every call checks the provider's output: the number of
/// vectors must match the number of inputs and every vector must have
/// [`dimensions`](Embedder::dimensions) entries.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{Embedder, HashingEmbeddingProvider};
///
/// let embedder = Embedder::new(Arc::new(HashingEmbeddingProvider::new(256)), 32);
/// let vectors = embedder.embed(&["hello", "world"]).await?;
/// ```
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl Embedder {
    /// Wrap `provider`, sending at most `batch_size` texts per provider call.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self { provider, batch_size: batch_size.max(1) }
    }

    /// Dimension `D` of every vector this embedder returns.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Name of the wrapped provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Embed `texts`, preserving order.
    ///
    /// Empty input returns an empty `Vec` without calling the provider.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingUnavailable`] if the provider fails or
    /// returns the wrong number of vectors, and
    /// [`RagError::DimensionMismatch`] if a vector has the wrong length.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = self.dimensions();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.provider.embed_batch(batch).await.map_err(|e| {
                error!(provider = self.provider.name(), error = %e, "embedding batch failed");
                match e {
                    RagError::EmbeddingUnavailable { .. } => e,
                    other => RagError::EmbeddingUnavailable {
                        provider: self.provider.name().to_string(),
                        message: other.to_string(),
                    },
                }
            })?;

            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingUnavailable {
                    provider: self.provider.name().to_string(),
                    message: format!(
                        "provider returned {} vectors for {} inputs",
                        embedded.len(),
                        batch.len()
                    ),
                });
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != expected) {
                return Err(RagError::DimensionMismatch { expected, actual: bad.len() });
            }
            vectors.extend(embedded);
        }

        debug!(provider = self.provider.name(), count = vectors.len(), "embedded texts");
        Ok(vectors)
    }

    /// Embed a single query text.
    ///
    /// # Errors
    ///
    /// See [`Embedder::embed`].
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text]).await?;
        vectors.pop().ok_or_else(|| RagError::EmbeddingUnavailable {
            provider: self.provider.name().to_string(),
            message: "provider returned no vector for the query".to_string(),
        })
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("provider", &self.provider.name())
            .field("dimensions", &self.dimensions())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
