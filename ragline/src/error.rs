//! Error types for the `ragline` crate.

use thiserror::Error;

/// Errors that can occur across ingestion, retrieval and generation.
#[derive(Debug, Error)]
pub enum RagError {
    /// No parser is registered for the file's extension or sniffed content type.
    #[error("Unsupported format for '{file_name}': {detail}")]
    UnsupportedFormat {
        /// Name of the rejected file.
        file_name: String,
        /// Extension or content type that had no handler.
        detail: String,
    },

    /// A parser was found but the content is malformed.
    #[error("Failed to parse '{file_name}': {message}")]
    ParseError {
        /// Name of the malformed file.
        file_name: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding model is not loaded, unreachable or misbehaving.
    #[error("Embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector does not match the dimension fixed for the index.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension fixed for the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// The vector index backend cannot be reached or rejected the call.
    #[error("Vector index unavailable ({backend}): {message}")]
    IndexUnavailable {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Generation did not finish within the configured deadline.
    #[error("Generation timed out after {seconds}s")]
    GenerationTimeout {
        /// The deadline that was exceeded, in seconds.
        seconds: u64,
    },

    /// The generation model failed while producing tokens.
    #[error("Generation error ({model}): {message}")]
    GenerationError {
        /// The generation model that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// A document id is not present in the index.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IndexUnavailable { .. } | Self::GenerationTimeout { .. })
    }

    /// Whether the error only concerns a single file of a batch ingest.
    pub fn is_file_scoped(&self) -> bool {
        matches!(self, Self::UnsupportedFormat { .. } | Self::ParseError { .. })
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
