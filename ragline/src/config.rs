//! Configuration for ingestion, retrieval and generation.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::prompt::PromptStyleKind;

/// How files are scheduled during bulk ingestion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// One file after another on the calling task.
    #[default]
    Simple,
    /// A fixed pool of `worker_count` tasks, each owning one file at a time.
    Parallel,
    /// Parse up to `worker_count` files concurrently, then embed the whole
    /// batch together and store it file by file.
    Batch,
}

/// Configuration parameters shared by the ingestion and query paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Target chunk size in tokens.
    pub chunk_size: usize,
    /// Number of tokens shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Maximum number of texts sent to the embedding provider per call.
    pub embed_batch_size: usize,
    /// Number of chunks retrieved for a contextual completion.
    pub similarity_top_k: usize,
    /// Hits scoring below this value are dropped. `None` keeps everything.
    pub similarity_threshold: Option<f32>,
    /// Scheduling of bulk ingestion.
    pub ingest_mode: IngestMode,
    /// Concurrency of [`IngestMode::Parallel`] and [`IngestMode::Batch`].
    pub worker_count: usize,
    /// Token budget of the model: prompt scaffolding, context and generated tokens.
    pub context_window: usize,
    /// Maximum number of tokens generated per completion.
    pub max_new_tokens: usize,
    /// Sampling temperature passed to the model.
    pub temperature: f32,
    /// Prompt template used to render messages for the model.
    pub prompt_style: PromptStyleKind,
    /// Overall deadline for one generation, in seconds.
    pub generation_timeout_secs: u64,
    /// Model name reported in completion objects.
    pub model_name: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            chunk_overlap: 32,
            embed_batch_size: 32,
            similarity_top_k: 2,
            similarity_threshold: None,
            ingest_mode: IngestMode::Simple,
            worker_count: 2,
            context_window: 3900,
            max_new_tokens: 256,
            temperature: 0.1,
            prompt_style: PromptStyleKind::Llama2,
            generation_timeout_secs: 120,
            model_name: "ragline".to_string(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap` exceeds half of `chunk_size`
    /// - `embed_batch_size`, `similarity_top_k` or `worker_count` is zero
    /// - `max_new_tokens >= context_window`
    /// - `temperature` is negative or not finite
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap * 2 > self.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be at most half of chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.similarity_top_k == 0 {
            return Err(RagError::ConfigError(
                "similarity_top_k must be greater than zero".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(RagError::ConfigError("worker_count must be greater than zero".to_string()));
        }
        if self.max_new_tokens >= self.context_window {
            return Err(RagError::ConfigError(format!(
                "max_new_tokens ({}) must be less than context_window ({})",
                self.max_new_tokens, self.context_window
            )));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(RagError::ConfigError(format!(
                "temperature ({}) must be a non-negative number",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the target chunk size in tokens.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in tokens.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of texts per embedding call.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the number of chunks retrieved for contextual completions.
    pub fn similarity_top_k(mut self, k: usize) -> Self {
        self.config.similarity_top_k = k;
        self
    }

    /// Set the minimum similarity for retrieved chunks.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Set the bulk ingestion mode.
    pub fn ingest_mode(mut self, mode: IngestMode) -> Self {
        self.config.ingest_mode = mode;
        self
    }

    /// Set the number of parallel ingestion workers.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Set the model context window in tokens.
    pub fn context_window(mut self, tokens: usize) -> Self {
        self.config.context_window = tokens;
        self
    }

    /// Set the maximum number of generated tokens.
    pub fn max_new_tokens(mut self, tokens: usize) -> Self {
        self.config.max_new_tokens = tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set the prompt template.
    pub fn prompt_style(mut self, style: PromptStyleKind) -> Self {
        self.config.prompt_style = style;
        self
    }

    /// Set the generation deadline in seconds.
    pub fn generation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.generation_timeout_secs = secs;
        self
    }

    /// Set the model name reported in completions.
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.config.model_name = name.into();
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
