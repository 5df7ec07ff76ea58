//! # ragline
//!
//! Retrieval-augmented generation over a private document corpus.
//!
//! ## Overview
//!
//! Files are parsed, split into overlapping token windows, embedded and
//! stored in a vector index. Questions are embedded the same way; the most
//! similar chunks are packed into a context block that is injected into the
//! prompt of a local generation model, and the answer is returned whole or
//! streamed token by token together with the sources it was based on.
//!
//! - [`IngestionPipeline`] – parse → split → embed → upsert, per file
//! - [`Retriever`] – embed → search → neighbour expansion
//! - [`ContextAssembler`] – budgeted, deduplicated context with citations
//! - [`CompletionOrchestrator`] – prompt rendering and serialised generation
//!
//! Backends plug in through traits: [`EmbeddingProvider`], [`VectorStore`],
//! [`GenerationModel`], [`DocumentParser`] and [`Tokenizer`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ragline::*;
//!
//! let config = RagConfig::builder().chunk_size(128).chunk_overlap(16).build()?;
//! let embedder = Embedder::new(Arc::new(HashingEmbeddingProvider::default()), config.embed_batch_size);
//! let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(config.clone())
//!     .embedder(embedder.clone())
//!     .vector_store(store.clone())
//!     .build()?;
//! pipeline.ingest_text("sky.txt", "The sky is blue. Grass is green.").await?;
//!
//! let orchestrator = CompletionOrchestrator::builder()
//!     .config(config)
//!     .retriever(Retriever::new(embedder, store))
//!     .model(Arc::new(my_model))
//!     .build()?;
//! let answer = orchestrator
//!     .complete(CompletionRequest::new("What color is the sky?").use_context(true))
//!     .await?;
//! ```
//!
//! ## Features
//!
//! - `openai` – [`openai::OpenAIEmbeddingProvider`] and
//!   [`openai::OpenAICompletionModel`] for OpenAI-compatible servers
//! - `qdrant` – [`qdrant::QdrantVectorStore`]

pub mod chunking;
pub mod completion;
pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod hashing;
pub mod ingest;
pub mod inmemory;
#[cfg(feature = "openai")]
pub mod openai;
pub mod parser;
pub mod prompt;
#[cfg(feature = "qdrant")]
pub mod qdrant;
pub mod response;
pub mod retriever;
pub mod telemetry;
pub mod tokenizer;
pub mod vectorstore;

pub use chunking::{Chunker, TextSegment, TokenChunker};
pub use completion::{
    CompletionOrchestrator, CompletionOrchestratorBuilder, CompletionOutcome, CompletionRequest,
    CompletionStream, RequestState,
};
pub use config::{IngestMode, RagConfig, RagConfigBuilder};
pub use context::{AssembledContext, Citation, ContextAssembler};
pub use document::{
    Chunk, ContextFilter, Document, IngestedDoc, RetrievalResult, RetrievedChunk, ScoredChunk,
};
pub use embedding::{Embedder, EmbeddingProvider};
pub use error::{RagError, Result};
pub use generation::{FinishReason, GenerationEvent, GenerationModel, GenerationParams, TokenStream};
pub use hashing::HashingEmbeddingProvider;
pub use ingest::{BatchIngestReport, FileOutcome, IngestionPipeline, IngestionPipelineBuilder};
pub use inmemory::InMemoryVectorStore;
pub use parser::{DocumentParser, JsonParser, ParsedPage, ParserRegistry, TextParser};
pub use prompt::{
    ChatMessage, DefaultPromptStyle, Llama2PromptStyle, PromptStyle, PromptStyleKind, Role,
    TagPromptStyle,
};
pub use response::{Completion, CompletionChoice, CompletionDelta, Delta, DeltaChoice};
pub use retriever::Retriever;
pub use tokenizer::{Tokenizer, WhitespaceTokenizer};
pub use vectorstore::VectorStore;
