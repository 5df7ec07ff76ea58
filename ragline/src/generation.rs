//! The generation model interface.
//!
//! A [`GenerationModel`] turns a rendered prompt into a stream of tokens. The
//! orchestrator owns exactly one model instance and never calls it from two
//! requests at once, so implementations need not support concurrent calls.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Why a generation ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// The model produced its end-of-sequence marker.
    Stop,
    /// `max_new_tokens` was reached.
    Length,
}

/// One item produced by a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// A generated token, already detokenized.
    Token(String),
    /// The model finished. Nothing follows this event.
    Finished(FinishReason),
}

/// Sampling parameters for one generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Upper bound on generated tokens; the orchestrator enforces it.
    pub max_new_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Token stream returned by [`GenerationModel::generate`].
///
/// A stream that ends without [`GenerationEvent::Finished`] is treated as
/// [`FinishReason::Stop`]. Dropping it must stop generation.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent>> + Send>>;

/// A text generation backend.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{GenerationModel, GenerationParams};
///
/// let mut tokens = model.generate(&prompt, &GenerationParams { max_new_tokens: 64, temperature: 0.1 }).await?;
/// while let Some(event) = tokens.next().await {
///     println!("{:?}", event?);
/// }
/// ```
#[async_trait]
pub trait GenerationModel: Send + Sync {
    /// Start generating a continuation of `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationError`](crate::RagError::GenerationError)
    /// if the model cannot start.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<TokenStream>;

    /// Model name used in logs and errors.
    fn name(&self) -> &str;
}
