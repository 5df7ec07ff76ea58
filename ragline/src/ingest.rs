//! Ingestion: parse → split → embed → upsert.
//!
//! The [`IngestionPipeline`] turns files into stored, embedded chunks. One
//! file is the unit of work and of failure: a file that cannot be parsed,
//! embedded or stored leaves nothing behind in the index, and in a
//! [`bulk_ingest`](IngestionPipeline::bulk_ingest) batch it does not affect
//! the other files.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragline::{Embedder, HashingEmbeddingProvider, InMemoryVectorStore, IngestionPipeline, RagConfig};
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedder(Embedder::new(Arc::new(HashingEmbeddingProvider::default()), 32))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .build()?;
//!
//! let documents = pipeline.ingest("notes.txt", std::fs::read("notes.txt")?).await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, TokenChunker};
use crate::config::{IngestMode, RagConfig};
use crate::document::{Chunk, Document, IngestedDoc};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::parser::{ParsedPage, ParserRegistry};
use crate::vectorstore::VectorStore;

/// Outcome of one file in a [`bulk_ingest`](IngestionPipeline::bulk_ingest) call.
#[derive(Debug)]
pub struct FileOutcome {
    /// Name of the file.
    pub file_name: String,
    /// Documents created from the file, or why it was rejected.
    pub result: Result<Vec<Document>>,
}

/// Per-file results of a batch, in input order.
#[derive(Debug, Default)]
pub struct BatchIngestReport {
    /// One entry per input file.
    pub outcomes: Vec<FileOutcome>,
}

impl BatchIngestReport {
    /// Documents of every file that was ingested.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()).flatten()
    }

    /// Files that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &RagError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.file_name.as_str(), e)))
    }

    /// Number of files that were ingested.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Whether every file was ingested.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Parses, splits, embeds and stores files.
///
/// Cloning is cheap; clones share the parser registry, chunker, embedder and
/// vector store. Construct one via [`IngestionPipeline::builder()`].
#[derive(Clone)]
pub struct IngestionPipeline {
    config: RagConfig,
    parsers: Arc<ParserRegistry>,
    chunker: Arc<dyn Chunker>,
    embedder: Embedder,
    vector_store: Arc<dyn VectorStore>,
}

impl IngestionPipeline {
    /// Create a new [`IngestionPipelineBuilder`].
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedder.
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Create the vector store collection with the embedder's dimensionality.
    ///
    /// # Errors
    ///
    /// Propagates the vector store error.
    pub async fn create_collection(&self) -> Result<()> {
        let dimensions = self.embedder.dimensions();
        self.vector_store.create_collection(dimensions).await.map_err(|e| {
            error!(dimensions, error = %e, "failed to create collection");
            e
        })
    }

    /// Ingest raw file bytes.
    ///
    /// Returns the documents created from the file. Documents whose text has
    /// no tokens produce no chunks and are left out.
    ///
    /// # Errors
    ///
    /// - [`RagError::UnsupportedFormat`] / [`RagError::ParseError`] if the
    ///   file cannot be parsed; no ids are assigned in that case
    /// - [`RagError::EmbeddingUnavailable`] / [`RagError::DimensionMismatch`]
    ///   if embedding fails
    /// - [`RagError::IndexUnavailable`] if storing fails; documents of this
    ///   file that were already stored are deleted again
    pub async fn ingest(&self, file_name: &str, bytes: impl Into<Vec<u8>>) -> Result<Vec<Document>> {
        let pages = self.parse(file_name, bytes.into()).await?;
        self.store_pages(file_name, pages).await
    }

    /// Resolve a parser and run it on the blocking pool.
    async fn parse(&self, file_name: &str, bytes: Vec<u8>) -> Result<Vec<ParsedPage>> {
        let parser = self.parsers.resolve(file_name, &bytes).map_err(|e| {
            warn!(file_name, error = %e, "skipping file");
            e
        })?;

        let name = file_name.to_string();
        let pages = tokio::task::spawn_blocking(move || parser.parse(&name, &bytes))
            .await
            .map_err(|e| RagError::ParseError {
                file_name: file_name.to_string(),
                message: format!("parser task failed: {e}"),
            })?
            .map_err(|e| {
                warn!(file_name, error = %e, "skipping file");
                e
            })?;
        Ok(pages)
    }

    /// Ingest already extracted text as a single document.
    ///
    /// # Errors
    ///
    /// See [`IngestionPipeline::ingest`]; parsing errors cannot occur.
    pub async fn ingest_text(&self, file_name: &str, text: &str) -> Result<Vec<Document>> {
        self.store_pages(file_name, vec![ParsedPage::new(text)]).await
    }

    /// Read a file from disk and ingest it under its base name.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ParseError`] if the file cannot be read, otherwise
    /// see [`IngestionPipeline::ingest`].
    pub async fn ingest_path(&self, path: impl AsRef<Path>) -> Result<Vec<Document>> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy(), |n| n.to_string_lossy())
            .into_owned();
        let bytes = tokio::fs::read(path).await.map_err(|e| RagError::ParseError {
            file_name: file_name.clone(),
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        self.ingest(&file_name, bytes).await
    }

    /// Ingest many files, isolating failures per file.
    ///
    /// In [`IngestMode::Simple`] files are processed one after another. In
    /// [`IngestMode::Parallel`] `worker_count` tasks drain a shared queue,
    /// each owning one file at a time. In [`IngestMode::Batch`] up to
    /// `worker_count` files are parsed at once, the chunks of all parsed
    /// files are embedded together, and each file is then stored on its own.
    /// Outcomes are reported in input order.
    pub async fn bulk_ingest(&self, files: Vec<(String, Vec<u8>)>) -> BatchIngestReport {
        let total = files.len();
        let report = match self.config.ingest_mode {
            IngestMode::Simple => {
                let mut outcomes = Vec::with_capacity(total);
                for (file_name, bytes) in files {
                    let result = self.ingest(&file_name, bytes).await;
                    outcomes.push(FileOutcome { file_name, result });
                }
                BatchIngestReport { outcomes }
            }
            IngestMode::Parallel => self.bulk_ingest_parallel(files).await,
            IngestMode::Batch => self.bulk_ingest_batch(files).await,
        };

        info!(
            file_count = total,
            succeeded = report.succeeded(),
            mode = ?self.config.ingest_mode,
            "bulk ingestion finished"
        );
        report
    }

    async fn bulk_ingest_parallel(&self, files: Vec<(String, Vec<u8>)>) -> BatchIngestReport {
        let names: Vec<String> = files.iter().map(|(name, _)| name.clone()).collect();
        let queue: Arc<Mutex<VecDeque<(usize, String, Vec<u8>)>>> = Arc::new(Mutex::new(
            files.into_iter().enumerate().map(|(i, (name, bytes))| (i, name, bytes)).collect(),
        ));

        // Results leave a worker as soon as a file is done, so a worker that
        // dies only loses the file it was holding.
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();
        for worker in 0..self.config.worker_count.min(names.len()) {
            let pipeline = self.clone();
            let queue = Arc::clone(&queue);
            let done_tx = done_tx.clone();
            workers.spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, file_name, bytes)) = next else {
                        break;
                    };
                    debug!(worker, file_name = %file_name, "worker picked file");
                    let result = pipeline.ingest(&file_name, bytes).await;
                    if done_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(done_tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "ingestion worker failed");
            }
        }

        let mut results: Vec<Option<Result<Vec<Document>>>> = names.iter().map(|_| None).collect();
        while let Some((index, result)) = done_rx.recv().await {
            results[index] = Some(result);
        }

        let outcomes = names
            .into_iter()
            .zip(results)
            .map(|(file_name, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(RagError::ParseError {
                        file_name: file_name.clone(),
                        message: "ingestion worker stopped before finishing the file".to_string(),
                    })
                });
                FileOutcome { file_name, result }
            })
            .collect();
        BatchIngestReport { outcomes }
    }

    async fn bulk_ingest_batch(&self, files: Vec<(String, Vec<u8>)>) -> BatchIngestReport {
        let parsed: Vec<(String, Result<Vec<ParsedPage>>)> = stream::iter(files)
            .map(|(file_name, bytes)| async move {
                let pages = self.parse(&file_name, bytes).await;
                (file_name, pages)
            })
            .buffered(self.config.worker_count)
            .collect()
            .await;

        let mut pending: Vec<(String, Result<PendingFile>)> = parsed
            .into_iter()
            .map(|(file_name, pages)| {
                let file = pages.map(|pages| self.prepare(&file_name, pages));
                (file_name, file)
            })
            .collect();

        let (chunk_count, embedded) = {
            let texts: Vec<&str> = pending
                .iter()
                .filter_map(|(_, file)| file.as_ref().ok())
                .flat_map(PendingFile::texts)
                .collect();
            (texts.len(), self.embedder.embed(&texts).await)
        };
        match embedded {
            Ok(embeddings) => {
                let mut embeddings = embeddings.into_iter();
                for file in pending.iter_mut().filter_map(|(_, file)| file.as_mut().ok()) {
                    file.attach(&mut embeddings);
                }
                debug!(chunk_count, "embedded batch");
            }
            Err(e) => {
                warn!(chunk_count, error = %e, "batch embedding failed, embedding files one by one");
                for (file_name, file) in &mut pending {
                    let failed = match file {
                        Ok(pending_file) => self.embed_file(file_name, pending_file).await.err(),
                        Err(_) => None,
                    };
                    if let Some(e) = failed {
                        *file = Err(e);
                    }
                }
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (file_name, file) in pending {
            let result = match file {
                Ok(file) => self.write(&file_name, file).await,
                Err(e) => Err(e),
            };
            outcomes.push(FileOutcome { file_name, result });
        }
        BatchIngestReport { outcomes }
    }

    /// Delete every chunk of a document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DocumentNotFound`] if nothing was stored under
    /// `doc_id`, or the vector store error.
    pub async fn delete(&self, doc_id: &str) -> Result<()> {
        let removed = self.vector_store.delete_document(doc_id).await?;
        if removed == 0 {
            return Err(RagError::DocumentNotFound(doc_id.to_string()));
        }
        info!(document.id = %doc_id, chunk_count = removed, "deleted document");
        Ok(())
    }

    /// Every document currently in the index.
    ///
    /// # Errors
    ///
    /// Propagates the vector store error.
    pub async fn list_ingested(&self) -> Result<Vec<IngestedDoc>> {
        self.vector_store.list_documents().await
    }

    async fn store_pages(&self, file_name: &str, pages: Vec<ParsedPage>) -> Result<Vec<Document>> {
        let mut file = self.prepare(file_name, pages);
        self.embed_file(file_name, &mut file).await?;
        self.write(file_name, file).await
    }

    /// Build documents from parsed pages and split them into chunks.
    fn prepare(&self, file_name: &str, pages: Vec<ParsedPage>) -> PendingFile {
        let mut documents = Vec::with_capacity(pages.len());
        let mut chunks: Vec<Vec<Chunk>> = Vec::with_capacity(pages.len());

        for page in pages {
            let mut metadata = page.metadata;
            metadata.insert("file_name".to_string(), file_name.to_string());
            let mut document = Document::new(page.text, metadata);
            document.metadata.insert("doc_id".to_string(), document.doc_id.clone());

            let document_chunks = self.split(&document);
            if document_chunks.is_empty() {
                debug!(document.id = %document.doc_id, file_name, "document has no tokens");
                continue;
            }
            chunks.push(document_chunks);
            documents.push(document);
        }
        PendingFile { documents, chunks }
    }

    async fn embed_file(&self, file_name: &str, file: &mut PendingFile) -> Result<()> {
        let texts: Vec<&str> = file.texts().collect();
        let embeddings = self.embedder.embed(&texts).await.map_err(|e| {
            error!(file_name, error = %e, "embedding failed during ingestion");
            e
        })?;
        file.attach(&mut embeddings.into_iter());
        Ok(())
    }

    /// Upsert the documents of one file, rolling back on the first failure.
    async fn write(&self, file_name: &str, file: PendingFile) -> Result<Vec<Document>> {
        let PendingFile { documents, chunks } = file;
        for (written, (document, document_chunks)) in documents.iter().zip(&chunks).enumerate() {
            if let Err(e) = self.vector_store.upsert(document_chunks).await {
                error!(document.id = %document.doc_id, file_name, error = %e, "upsert failed during ingestion");
                self.compensate(file_name, &documents[..=written]).await;
                return Err(e);
            }
        }

        let chunk_count: usize = chunks.iter().map(Vec::len).sum();
        info!(file_name, document_count = documents.len(), chunk_count, "ingested file");
        Ok(documents)
    }

    fn split(&self, document: &Document) -> Vec<Chunk> {
        self.chunker
            .split(&document.text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, segment)| {
                let mut metadata: HashMap<String, String> = document.metadata.clone();
                metadata.insert("chunk_index".to_string(), chunk_index.to_string());
                Chunk {
                    chunk_id: Chunk::make_id(&document.doc_id, chunk_index),
                    doc_id: document.doc_id.clone(),
                    chunk_index,
                    text: segment.text,
                    start: segment.start,
                    end: segment.end,
                    embedding: Vec::new(),
                    metadata,
                }
            })
            .collect()
    }

    /// Remove documents of a file whose ingestion did not complete.
    async fn compensate(&self, file_name: &str, documents: &[Document]) {
        for document in documents {
            match self.vector_store.delete_document(&document.doc_id).await {
                Ok(removed) => {
                    warn!(document.id = %document.doc_id, file_name, removed, "rolled back partial ingestion");
                }
                Err(e) => {
                    error!(document.id = %document.doc_id, file_name, error = %e, "rollback failed");
                }
            }
        }
    }
}

/// Documents of one file with their chunks, waiting to be embedded and stored.
struct PendingFile {
    documents: Vec<Document>,
    /// Chunks per document, parallel to `documents`.
    chunks: Vec<Vec<Chunk>>,
}

impl PendingFile {
    fn texts(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().flatten().map(|c| c.text.as_str())
    }

    fn attach(&mut self, embeddings: &mut impl Iterator<Item = Vec<f32>>) {
        for chunk in self.chunks.iter_mut().flatten() {
            chunk.embedding = embeddings.next().unwrap_or_default();
        }
    }
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("config", &self.config)
            .field("parsers", &self.parsers)
            .field("embedder", &self.embedder)
            .finish_non_exhaustive()
    }
}

/// Builder for constructing an [`IngestionPipeline`].
///
/// `embedder` and `vector_store` are required. Without an explicit chunker a
/// [`TokenChunker`] is built from the configuration; without a parser
/// registry [`ParserRegistry::with_defaults`] is used.
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    config: Option<RagConfig>,
    parsers: Option<ParserRegistry>,
    chunker: Option<Arc<dyn Chunker>>,
    embedder: Option<Embedder>,
    vector_store: Option<Arc<dyn VectorStore>>,
}

impl IngestionPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the parser registry.
    pub fn parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = Some(parsers);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the shared embedder.
    pub fn embedder(mut self, embedder: Embedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Build the [`IngestionPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing or
    /// the configuration is invalid.
    pub fn build(self) -> Result<IngestionPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedder =
            self.embedder.ok_or_else(|| RagError::ConfigError("embedder is required".to_string()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(TokenChunker::new(config.chunk_size, config.chunk_overlap)?),
        };

        Ok(IngestionPipeline {
            config,
            parsers: Arc::new(self.parsers.unwrap_or_else(ParserRegistry::with_defaults)),
            chunker,
            embedder,
            vector_store,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Range;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::chunking::TextSegment;
    use crate::document::{ContextFilter, ScoredChunk};
    use crate::embedding::EmbeddingProvider;
    use crate::hashing::HashingEmbeddingProvider;
    use crate::inmemory::InMemoryVectorStore;

    fn pipeline(store: Arc<dyn VectorStore>) -> IngestionPipeline {
        let config = RagConfig::builder().chunk_size(4).chunk_overlap(1).build().unwrap();
        IngestionPipeline::builder()
            .config(config)
            .embedder(Embedder::new(Arc::new(HashingEmbeddingProvider::new(64)), 8))
            .vector_store(store)
            .build()
            .unwrap()
    }

    fn batch_config(mode: IngestMode, workers: usize) -> RagConfig {
        RagConfig::builder()
            .chunk_size(4)
            .chunk_overlap(1)
            .ingest_mode(mode)
            .worker_count(workers)
            .build()
            .unwrap()
    }

    fn files(names: &[&str]) -> Vec<(String, Vec<u8>)> {
        names.iter().map(|name| (name.to_string(), format!("{name} w1 w2 w3 w4 w5").into_bytes())).collect()
    }

    /// Splits like [`TokenChunker`] but panics on text mentioning "boom".
    struct ExplodingChunker(TokenChunker);

    impl Chunker for ExplodingChunker {
        fn split(&self, text: &str) -> Vec<TextSegment> {
            assert!(!text.contains("boom"), "chunker exploded");
            self.0.split(text)
        }
    }

    /// Records the size of every batch it is asked to embed.
    #[derive(Default)]
    struct BatchRecorder {
        batches: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingProvider for BatchRecorder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    /// Accepts the first `ok` upserts, then fails.
    struct FlakyStore {
        inner: InMemoryVectorStore,
        ok: usize,
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        async fn create_collection(&self, dimensions: usize) -> Result<()> {
            self.inner.create_collection(dimensions).await
        }

        async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
            if self.upserts.fetch_add(1, Ordering::SeqCst) >= self.ok {
                return Err(RagError::IndexUnavailable {
                    backend: "flaky".into(),
                    message: "connection reset".into(),
                });
            }
            self.inner.upsert(chunks).await
        }

        async fn search(
            &self,
            embedding: &[f32],
            limit: usize,
            filter: Option<&ContextFilter>,
        ) -> Result<Vec<ScoredChunk>> {
            self.inner.search(embedding, limit, filter).await
        }

        async fn delete_document(&self, doc_id: &str) -> Result<usize> {
            self.inner.delete_document(doc_id).await
        }

        async fn get_chunks(&self, doc_id: &str, indices: Range<usize>) -> Result<Vec<Chunk>> {
            self.inner.get_chunks(doc_id, indices).await
        }

        async fn list_documents(&self) -> Result<Vec<IngestedDoc>> {
            self.inner.list_documents().await
        }
    }

    #[tokio::test]
    async fn chunks_carry_file_and_position_metadata() {
        let store = Arc::new(InMemoryVectorStore::new());
        let pipeline = pipeline(store.clone());
        let docs = pipeline.ingest("a.txt", "w0 w1 w2 w3 w4 w5 w6").await.unwrap();
        assert_eq!(docs.len(), 1);

        let chunks = store.get_chunks(&docs[0].doc_id, 0..10).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata["chunk_index"], "1");
        assert_eq!(chunks[1].metadata["file_name"], "a.txt");
        assert_eq!(chunks[0].chunk_id, Chunk::make_id(&docs[0].doc_id, 0));
    }

    #[tokio::test]
    async fn pages_become_separate_documents() {
        let store = Arc::new(InMemoryVectorStore::new());
        let docs = pipeline(store).ingest("book.txt", "one\u{000C}two").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].metadata["page"], "2");
        assert_ne!(docs[0].doc_id, docs[1].doc_id);
    }

    #[tokio::test]
    async fn whitespace_file_stores_nothing() {
        let store = Arc::new(InMemoryVectorStore::new());
        let docs = pipeline(store.clone()).ingest_text("blank.txt", " \n\t ").await.unwrap();
        assert!(docs.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn failed_upsert_rolls_back_the_file() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryVectorStore::new(),
            ok: 1,
            upserts: AtomicUsize::new(0),
        });
        let err = pipeline(store.clone()).ingest("book.txt", "one\u{000C}two").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn delete_unknown_document_is_not_found() {
        let pipeline = pipeline(Arc::new(InMemoryVectorStore::new()));
        let err = pipeline.delete("missing").await.unwrap_err();
        assert!(matches!(err, RagError::DocumentNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn parallel_worker_panic_keeps_finished_files() {
        let store = Arc::new(InMemoryVectorStore::new());
        let pipeline = IngestionPipeline::builder()
            .config(batch_config(IngestMode::Parallel, 1))
            .chunker(Arc::new(ExplodingChunker(TokenChunker::new(4, 1).unwrap())))
            .embedder(Embedder::new(Arc::new(HashingEmbeddingProvider::new(64)), 8))
            .vector_store(store.clone())
            .build()
            .unwrap();

        let report = pipeline.bulk_ingest(files(&["a.txt", "b.txt", "boom.txt", "c.txt"])).await;

        let ok: Vec<&str> = report
            .outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.file_name.as_str())
            .collect();
        assert_eq!(ok, vec!["a.txt", "b.txt"]);
        assert!(matches!(report.outcomes[2].result, Err(RagError::ParseError { .. })));
        assert_eq!(store.list_documents().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn batch_mode_embeds_parsed_files_together() {
        let store = Arc::new(InMemoryVectorStore::new());
        let recorder = Arc::new(BatchRecorder::default());
        let pipeline = IngestionPipeline::builder()
            .config(batch_config(IngestMode::Batch, 2))
            .embedder(Embedder::new(recorder.clone(), 64))
            .vector_store(store.clone())
            .build()
            .unwrap();

        let mut batch = files(&["a.txt", "b.txt", "c.txt"]);
        batch.insert(1, ("deck.pptx".to_string(), b"PK".to_vec()));
        let report = pipeline.bulk_ingest(batch).await;

        assert_eq!(report.succeeded(), 3);
        assert!(matches!(report.outcomes[1].result, Err(RagError::UnsupportedFormat { .. })));
        // Six tokens per file split into two chunks each.
        assert_eq!(*recorder.batches.lock().unwrap(), vec![6]);
        assert_eq!(store.len().await, 6);
    }

    #[tokio::test]
    async fn batch_mode_stores_each_file_on_its_own() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryVectorStore::new(),
            ok: 1,
            upserts: AtomicUsize::new(0),
        });
        let pipeline = IngestionPipeline::builder()
            .config(batch_config(IngestMode::Batch, 2))
            .embedder(Embedder::new(Arc::new(HashingEmbeddingProvider::new(64)), 8))
            .vector_store(store.clone())
            .build()
            .unwrap();

        let report = pipeline.bulk_ingest(files(&["a.txt", "b.txt"])).await;

        assert!(report.outcomes[0].result.is_ok());
        assert!(report.outcomes[1].result.as_ref().is_err_and(RagError::is_retryable));
        let listed = store.inner.list_documents().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].doc_id, report.outcomes[0].result.as_ref().unwrap()[0].doc_id);
    }

    #[test]
    fn builder_requires_embedder_and_store() {
        assert!(IngestionPipeline::builder().build().is_err());
        let err = IngestionPipeline::builder()
            .embedder(Embedder::new(Arc::new(HashingEmbeddingProvider::new(8)), 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("vector_store")));
    }
}
