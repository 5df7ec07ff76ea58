//! Qdrant vector store backend.
//!
//! Provides [`QdrantVectorStore`] which implements [`VectorStore`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC. Each
//! store is bound to one collection. Document restriction, deletion and
//! neighbour lookup are expressed as payload filters on `doc_id` and
//! `chunk_index`.
//!
//! This module is only available when the `qdrant` feature is enabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragline::qdrant::QdrantVectorStore;
//!
//! let store = QdrantVectorStore::new("http://localhost:6334", "docs")?;
//! store.create_collection(384).await?;
//! store.upsert(&chunks).await?;
//! let results = store.search(&query_embedding, 5, None).await?;
//! ```

use std::collections::HashMap;
use std::ops::Range;
use std::sync::OnceLock;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointId, PointStruct, Range as QdrantRange,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::document::{Chunk, ContextFilter, IngestedDoc, ScoredChunk};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorStore, rank};

/// Page size used when scrolling through points.
const SCROLL_PAGE: u32 = 256;

/// A [`VectorStore`] backed by [Qdrant](https://qdrant.tech/).
///
/// Wraps a [`qdrant_client::Qdrant`] client bound to one collection with
/// cosine distance. Chunks are stored as points whose payload carries
/// `doc_id`, `text`, `chunk_index`, `start`, `end` and `metadata`.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    dimensions: OnceLock<usize>,
}

impl QdrantVectorStore {
    /// Create a store for `collection` on the server at `url`.
    pub fn new(url: &str, collection: impl Into<String>) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(Self::map_err)?;
        Ok(Self::from_client(client, collection))
    }

    /// Create a store for `collection` on `http://localhost:6334`.
    pub fn default_url(collection: impl Into<String>) -> Result<Self> {
        Self::new("http://localhost:6334", collection)
    }

    /// Create a store from an existing client.
    pub fn from_client(client: Qdrant, collection: impl Into<String>) -> Self {
        Self { client, collection: collection.into(), dimensions: OnceLock::new() }
    }

    /// Name of the bound collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn map_err(e: qdrant_client::QdrantError) -> RagError {
        RagError::IndexUnavailable { backend: "qdrant".to_string(), message: e.to_string() }
    }

    /// Fix the dimension on first use and reject vectors of any other size.
    fn check_dimensions(&self, actual: usize) -> Result<()> {
        let expected = *self.dimensions.get_or_init(|| actual);
        if expected == actual {
            Ok(())
        } else {
            Err(RagError::DimensionMismatch { expected, actual })
        }
    }

    fn document_filter(doc_id: &str) -> Filter {
        Filter::must([Condition::matches("doc_id", doc_id.to_string())])
    }

    fn payload(chunk: &Chunk) -> Result<Payload> {
        let metadata: Map<String, JsonValue> = chunk
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect();
        let mut payload_map = Map::new();
        payload_map.insert("doc_id".to_string(), JsonValue::String(chunk.doc_id.clone()));
        payload_map.insert("text".to_string(), JsonValue::String(chunk.text.clone()));
        payload_map.insert("chunk_index".to_string(), JsonValue::from(chunk.chunk_index as u64));
        payload_map.insert("start".to_string(), JsonValue::from(chunk.start as u64));
        payload_map.insert("end".to_string(), JsonValue::from(chunk.end as u64));
        payload_map.insert("metadata".to_string(), JsonValue::Object(metadata));

        Payload::try_from(JsonValue::Object(payload_map)).map_err(Self::map_err)
    }

    /// Extract a string from a Qdrant payload value.
    fn extract_string(value: &QdrantValue) -> Option<String> {
        match &value.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Extract a non-negative integer from a Qdrant payload value.
    fn extract_usize(value: &QdrantValue) -> Option<usize> {
        match &value.kind {
            Some(Kind::IntegerValue(i)) => usize::try_from(*i).ok(),
            Some(Kind::DoubleValue(d)) if *d >= 0.0 => Some(*d as usize),
            _ => None,
        }
    }

    fn point_id(id: Option<&PointId>) -> String {
        id.and_then(|pid| match &pid.point_id_options {
            Some(PointIdOptions::Uuid(s)) => Some(s.clone()),
            Some(PointIdOptions::Num(n)) => Some(n.to_string()),
            None => None,
        })
        .unwrap_or_default()
    }

    fn chunk_from_point(id: Option<&PointId>, payload: &HashMap<String, QdrantValue>) -> Chunk {
        let string = |key: &str| payload.get(key).and_then(Self::extract_string).unwrap_or_default();
        let number = |key: &str| payload.get(key).and_then(Self::extract_usize).unwrap_or_default();

        let metadata: HashMap<String, String> = payload
            .get("metadata")
            .and_then(|v| match &v.kind {
                Some(Kind::StructValue(s)) => Some(
                    s.fields
                        .iter()
                        .filter_map(|(k, v)| Self::extract_string(v).map(|s| (k.clone(), s)))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();

        Chunk {
            chunk_id: Self::point_id(id),
            doc_id: string("doc_id"),
            chunk_index: number("chunk_index"),
            text: string("text"),
            start: number("start"),
            end: number("end"),
            embedding: Vec::new(),
            metadata,
        }
    }

    /// Every point matching `filter`, following scroll pages.
    async fn scroll_all(&self, filter: Filter) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(&self.collection)
                .filter(filter.clone())
                .limit(SCROLL_PAGE)
                .with_payload(true);
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }
            let response = self.client.scroll(request).await.map_err(Self::map_err)?;
            chunks.extend(
                response.result.iter().map(|p| Self::chunk_from_point(p.id.as_ref(), &p.payload)),
            );
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(chunks)
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn create_collection(&self, dimensions: usize) -> Result<()> {
        self.check_dimensions(dimensions)?;

        let collections = self.client.list_collections().await.map_err(Self::map_err)?;
        let exists = collections.collections.iter().any(|c| c.name == self.collection);
        if exists {
            debug!(collection = %self.collection, "qdrant collection already exists, skipping creation");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await
            .map_err(Self::map_err)?;
        for (field, field_type) in [("doc_id", FieldType::Keyword), ("chunk_index", FieldType::Integer)] {
            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(&self.collection, field, field_type)
                        .wait(true),
                )
                .await
                .map_err(Self::map_err)?;
        }

        debug!(collection = %self.collection, dimensions, "created qdrant collection");
        Ok(())
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        for chunk in chunks {
            self.check_dimensions(chunk.embedding.len())?;
        }

        let points = chunks
            .iter()
            .map(|chunk| {
                Ok(PointStruct::new(chunk.chunk_id.clone(), chunk.embedding.clone(), Self::payload(chunk)?))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(Self::map_err)?;

        debug!(collection = %self.collection, count = chunks.len(), "upserted chunks to qdrant");
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&ContextFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        self.check_dimensions(embedding.len())?;
        let mut request =
            SearchPointsBuilder::new(&self.collection, embedding.to_vec(), limit as u64)
                .with_payload(true);
        if let Some(filter) = filter {
            if filter.document_ids.is_empty() {
                return Ok(Vec::new());
            }
            request = request
                .filter(Filter::must([Condition::matches("doc_id", filter.document_ids.clone())]));
        }

        let response = self.client.search_points(request).await.map_err(Self::map_err)?;
        let mut results: Vec<ScoredChunk> = response
            .result
            .into_iter()
            .map(|scored| ScoredChunk {
                chunk: Self::chunk_from_point(scored.id.as_ref(), &scored.payload),
                score: scored.score,
            })
            .collect();
        rank(&mut results);
        Ok(results)
    }

    async fn delete_document(&self, doc_id: &str) -> Result<usize> {
        let count = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(Self::document_filter(doc_id))
                    .exact(true),
            )
            .await
            .map_err(Self::map_err)?
            .result
            .map_or(0, |r| r.count as usize);
        if count == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(Self::document_filter(doc_id))
                    .wait(true),
            )
            .await
            .map_err(Self::map_err)?;

        debug!(collection = %self.collection, doc_id, count, "deleted document from qdrant");
        Ok(count)
    }

    async fn get_chunks(&self, doc_id: &str, indices: Range<usize>) -> Result<Vec<Chunk>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::must([
            Condition::matches("doc_id", doc_id.to_string()),
            Condition::range(
                "chunk_index",
                QdrantRange {
                    gte: Some(indices.start as f64),
                    lt: Some(indices.end as f64),
                    ..Default::default()
                },
            ),
        ]);
        let mut chunks = self.scroll_all(filter).await?;
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn list_documents(&self) -> Result<Vec<IngestedDoc>> {
        let first_chunks =
            self.scroll_all(Filter::must([Condition::matches("chunk_index", 0i64)])).await?;
        let mut docs: Vec<IngestedDoc> =
            first_chunks.into_iter().map(|c| IngestedDoc::new(c.doc_id, c.metadata)).collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_into_chunk() {
        let chunk = Chunk {
            chunk_id: "6f1c5a2e-8f43-5a8a-9d0c-1f2e3d4c5b6a".into(),
            doc_id: "doc".into(),
            chunk_index: 3,
            text: "The sky is blue.".into(),
            start: 10,
            end: 26,
            embedding: vec![0.1, 0.2],
            metadata: HashMap::from([("file_name".to_string(), "sky.txt".to_string())]),
        };
        let payload: HashMap<String, QdrantValue> = QdrantVectorStore::payload(&chunk).unwrap().into();
        let id = PointId::from(chunk.chunk_id.clone());
        let back = QdrantVectorStore::chunk_from_point(Some(&id), &payload);
        assert_eq!(back.chunk_index, 3);
        assert_eq!(back.end, 26);
        assert_eq!(back.metadata["file_name"], "sky.txt");
        assert_eq!(back.chunk_id, chunk.chunk_id);
        assert!(back.embedding.is_empty());
    }
}
