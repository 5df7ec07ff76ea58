//! Embedding and generation backends for OpenAI-compatible HTTP APIs.
//!
//! Works with the OpenAI API and with local inference servers exposing the
//! same `/v1/embeddings` and `/v1/completions` endpoints.
//!
//! This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{FinishReason, GenerationEvent, GenerationModel, GenerationParams, TokenStream};

/// The default OpenAI API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The default model for OpenAI embeddings.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

fn env_base_url() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn env_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
}

fn authorize(request: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Read an error body, preferring the API's own message.
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail =
        serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
    format!("API returned {status}: {detail}")
}

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// # Configuration
///
/// - `base_url` – defaults to `OPENAI_BASE_URL` or `https://api.openai.com/v1`.
/// - `api_key` – optional; local servers usually need none.
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – must match what the model returns.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("http://localhost:8080/v1")
///     .with_model("nomic-embed-text")
///     .with_dimensions(768);
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider talking to `base_url` without authentication.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        }
    }

    /// Create a provider from `OPENAI_BASE_URL` and `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        let mut provider = Self::new(env_base_url());
        provider.api_key = env_api_key();
        provider
    }

    /// Authenticate with `api_key`.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions.
    ///
    /// The value is also sent to the API, which truncates Matryoshka
    /// embeddings to this size.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    fn unavailable(&self, message: String) -> RagError {
        RagError::EmbeddingUnavailable { provider: format!("openai:{}", self.model), message }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| self.unavailable("API returned empty response".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = "openai", batch_size = texts.len(), model = %self.model, "embedding batch");

        let request_body =
            EmbeddingRequest { model: &self.model, input: texts, dimensions: self.request_dimensions };
        let request = self.client.post(format!("{}/embeddings", self.base_url)).json(&request_body);

        let response = authorize(request, self.api_key.as_deref()).send().await.map_err(|e| {
            error!(provider = "openai", error = %e, "request failed");
            self.unavailable(format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let detail = error_detail(response).await;
            error!(provider = "openai", detail = %detail, "API error");
            return Err(self.unavailable(detail));
        }

        let mut embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = "openai", error = %e, "failed to parse response");
            self.unavailable(format!("failed to parse response: {e}"))
        })?;

        embedding_response.data.sort_by_key(|d| d.index);
        Ok(embedding_response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// A [`GenerationModel`] streaming from an OpenAI-compatible completions API.
///
/// Every server-sent text fragment is reported as one token.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::openai::OpenAICompletionModel;
///
/// let model = OpenAICompletionModel::new("http://localhost:8080/v1", "llama-2-7b-chat");
/// ```
pub struct OpenAICompletionModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAICompletionModel {
    /// Create a model client for `model` served at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
        }
    }

    /// Create a model client from `OPENAI_BASE_URL` and `OPENAI_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Self {
        let mut client = Self::new(env_base_url(), model);
        client.api_key = env_api_key();
        client
    }

    /// Authenticate with `api_key`.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Serialize)]
struct CompletionsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionsChunk {
    #[serde(default)]
    choices: Vec<CompletionsChunkChoice>,
}

#[derive(Deserialize)]
struct CompletionsChunkChoice {
    #[serde(default)]
    text: String,
    finish_reason: Option<String>,
}

/// Decode the `data` of one server-sent event. `None` marks the `[DONE]`
/// sentinel.
fn decode_event(model: &str, data: &str) -> Result<Option<Vec<GenerationEvent>>> {
    if data.trim() == "[DONE]" {
        return Ok(None);
    }

    let chunk: CompletionsChunk = serde_json::from_str(data).map_err(|e| RagError::GenerationError {
        model: model.to_string(),
        message: format!("malformed event: {e}"),
    })?;
    let mut events = Vec::new();
    for choice in chunk.choices {
        if !choice.text.is_empty() {
            events.push(GenerationEvent::Token(choice.text));
        }
        match choice.finish_reason.as_deref() {
            Some("length") => events.push(GenerationEvent::Finished(FinishReason::Length)),
            Some(_) => events.push(GenerationEvent::Finished(FinishReason::Stop)),
            None => {}
        }
    }
    Ok(Some(events))
}

/// Generation events decoded from a server-sent event byte stream.
fn token_stream<S, B, E>(model: String, bytes: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display + Send,
{
    let mut events = Box::pin(bytes.eventsource());
    Box::pin(async_stream::stream! {
        while let Some(event) = events.next().await {
            let data = match event {
                Ok(event) => event.data,
                Err(e) => {
                    let message = format!("stream interrupted: {e}");
                    yield Err(RagError::GenerationError { model: model.clone(), message });
                    return;
                }
            };
            match decode_event(&model, &data) {
                Ok(None) => return,
                Ok(Some(decoded)) => {
                    for event in decoded {
                        let finished = matches!(event, GenerationEvent::Finished(_));
                        yield Ok(event);
                        if finished {
                            return;
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

#[async_trait]
impl GenerationModel for OpenAICompletionModel {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<TokenStream> {
        let body = CompletionsRequest {
            model: &self.model,
            prompt,
            max_tokens: params.max_new_tokens,
            temperature: params.temperature,
            stream: true,
        };
        let request = self.client.post(format!("{}/completions", self.base_url)).json(&body);
        let generation_error =
            |message: String| RagError::GenerationError { model: self.model.clone(), message };

        let response = authorize(request, self.api_key.as_deref()).send().await.map_err(|e| {
            error!(model = %self.model, error = %e, "completion request failed");
            generation_error(format!("request failed: {e}"))
        })?;
        if !response.status().is_success() {
            let detail = error_detail(response).await;
            error!(model = %self.model, detail = %detail, "completion API error");
            return Err(generation_error(detail));
        }

        debug!(model = %self.model, "completion stream opened");
        Ok(token_stream(self.model.clone(), response.bytes_stream()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
