//! Answering requests: retrieve → assemble → render prompt → generate.
//!
//! The [`CompletionOrchestrator`] owns the single [`GenerationModel`] and
//! serialises access to it with a mutex. Retrieval and prompt rendering run
//! before the lock is taken, so many requests can retrieve while one
//! generates.
//!
//! Streaming is the primitive: [`CompletionOrchestrator::complete`] drains a
//! [`CompletionStream`], so both paths produce the same text for the same
//! model output.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use ragline::{CompletionOrchestrator, CompletionRequest};
//!
//! let orchestrator = CompletionOrchestrator::builder()
//!     .config(config)
//!     .retriever(retriever)
//!     .model(Arc::new(model))
//!     .build()?;
//!
//! let request = CompletionRequest::new("What color is the sky?").use_context(true);
//! let mut stream = orchestrator.stream(request);
//! while let Some(delta) = stream.next().await {
//!     print!("{}", delta?.content());
//! }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, watch};
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::context::{AssembledContext, ContextAssembler};
use crate::document::{ContextFilter, RetrievedChunk};
use crate::error::{RagError, Result};
use crate::generation::{FinishReason, GenerationEvent, GenerationModel, GenerationParams};
use crate::prompt::{self, ChatMessage, PromptStyle, Role};
use crate::response::{Completion, CompletionChoice, CompletionDelta};
use crate::retriever::Retriever;
use crate::tokenizer::{Tokenizer, WhitespaceTokenizer};

/// Buffered generation events between the model task and the consumer.
const EVENT_BUFFER: usize = 64;

/// Lifecycle of one request.
///
/// `Idle → Retrieving (only with context) → Generating → Completed | Cancelled | Errored`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Created, nothing has run yet.
    Idle,
    /// Embedding the query and searching the index.
    Retrieving,
    /// Holding the model lock and producing tokens.
    Generating,
    /// The final delta was produced.
    Completed,
    /// The consumer cancelled or dropped the stream.
    Cancelled,
    /// Retrieval or generation failed.
    Errored,
}

impl RequestState {
    /// Whether no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }
}

/// Options for one completion call.
///
/// Build it with [`CompletionRequest::new`] or [`CompletionRequest::chat`]
/// and the chained setters; it is not modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionRequest {
    /// Single-turn prompt. Ignored when `messages` is not empty.
    pub prompt: String,
    /// System instructions. Takes precedence over a leading system message.
    pub system_prompt: Option<String>,
    /// Retrieve context from the index and inject it into the system message.
    pub use_context: bool,
    /// Restricts retrieval to these documents.
    pub context_filter: Option<ContextFilter>,
    /// Report the chunks used as context. On by default.
    pub include_sources: bool,
    /// Whether [`CompletionOrchestrator::run`] streams.
    pub stream: bool,
    /// Chat history ending with the user's question.
    pub messages: Vec<ChatMessage>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            system_prompt: None,
            use_context: false,
            context_filter: None,
            include_sources: true,
            stream: false,
            messages: Vec::new(),
        }
    }
}

impl CompletionRequest {
    /// A single-turn completion of `prompt`.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), ..Self::default() }
    }

    /// A chat completion continuing `messages`.
    pub fn chat(messages: Vec<ChatMessage>) -> Self {
        Self { messages, ..Self::default() }
    }

    /// Set the system prompt.
    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Enable or disable retrieval.
    pub fn use_context(mut self, use_context: bool) -> Self {
        self.use_context = use_context;
        self
    }

    /// Restrict retrieval to `filter`.
    pub fn context_filter(mut self, filter: ContextFilter) -> Self {
        self.context_filter = Some(filter);
        self
    }

    /// Enable or disable sources in the response.
    pub fn include_sources(mut self, include_sources: bool) -> Self {
        self.include_sources = include_sources;
        self
    }

    /// Choose streaming for [`CompletionOrchestrator::run`].
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    fn conversation(&self) -> Vec<ChatMessage> {
        if self.messages.is_empty() {
            vec![ChatMessage::user(self.prompt.clone())]
        } else {
            self.messages.clone()
        }
    }
}

/// Result of [`CompletionOrchestrator::run`].
#[derive(Debug)]
pub enum CompletionOutcome {
    /// The request asked for a single response.
    Complete(Completion),
    /// The request asked for streaming.
    Stream(CompletionStream),
}

/// A streamed completion.
///
/// Nothing runs until the stream is first polled. Items are
/// [`CompletionDelta`]s, one per generated token, followed by a final delta
/// with empty content, a finish reason and, if requested, the sources. A
/// failure ends the stream with one `Err` item.
///
/// Dropping the stream, or calling [`cancel`](CompletionStream::cancel),
/// stops the model and releases the model lock.
pub struct CompletionStream {
    id: String,
    inner: Pin<Box<dyn Stream<Item = Result<CompletionDelta>> + Send>>,
    state: Arc<watch::Sender<RequestState>>,
}

impl CompletionStream {
    /// Id shared by every delta of this stream.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<RequestState> {
        self.state.subscribe()
    }

    /// Stop the request and return its final state.
    ///
    /// Returns [`RequestState::Cancelled`] unless the request had already
    /// completed or failed.
    pub fn cancel(self) -> RequestState {
        let state = Arc::clone(&self.state);
        drop(self);
        let current = *state.borrow();
        current
    }
}

impl Stream for CompletionStream {
    type Item = Result<CompletionDelta>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = RequestState::Cancelled;
                true
            }
        });
    }
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Rendered prompt plus what the response should report.
struct Prepared {
    prompt: String,
    sources: Option<Vec<RetrievedChunk>>,
}

/// Runs completions against one generation model.
///
/// Cloning is cheap; clones share the model and its lock. Construct one via
/// [`CompletionOrchestrator::builder()`].
#[derive(Clone)]
pub struct CompletionOrchestrator {
    config: Arc<RagConfig>,
    retriever: Retriever,
    assembler: ContextAssembler,
    tokenizer: Arc<dyn Tokenizer>,
    prompt_style: Arc<dyn PromptStyle>,
    model: Arc<dyn GenerationModel>,
    lock: Arc<Mutex<()>>,
}

impl CompletionOrchestrator {
    /// Create a new [`CompletionOrchestratorBuilder`].
    pub fn builder() -> CompletionOrchestratorBuilder {
        CompletionOrchestratorBuilder::default()
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the retriever.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `request` in one response.
    ///
    /// # Errors
    ///
    /// Returns the first error of the underlying stream: a retrieval error,
    /// [`RagError::GenerationError`] or [`RagError::GenerationTimeout`].
    #[instrument(skip_all, fields(model = self.model.name(), use_context = request.use_context))]
    pub async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let mut stream = self.stream(request);
        let mut content = String::new();
        let mut finish_reason = None;
        let mut sources = None;

        while let Some(delta) = stream.next().await {
            let delta = delta?;
            content.push_str(delta.content());
            if let Some(choice) = delta.choices.into_iter().next().filter(|c| c.finish_reason.is_some()) {
                finish_reason = choice.finish_reason;
                sources = choice.sources;
            }
        }

        Ok(Completion::new(
            &self.config.model_name,
            CompletionChoice { index: 0, message: ChatMessage::assistant(content), finish_reason, sources },
        ))
    }

    /// Answer `request` as a stream of deltas.
    #[instrument(skip_all, fields(model = self.model.name(), use_context = request.use_context))]
    pub fn stream(&self, request: CompletionRequest) -> CompletionStream {
        let (state, _) = watch::channel(RequestState::Idle);
        let state = Arc::new(state);
        let id = Uuid::new_v4().to_string();

        let this = self.clone();
        let body_state = Arc::clone(&state);
        let body_id = id.clone();
        let body = async_stream::stream! {
            let model_name = this.config.model_name.clone();
            let prepared = match this.prepare(&request, &body_state).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    error!(error = %e, "completion failed before generation");
                    body_state.send_replace(RequestState::Errored);
                    yield Err(e);
                    return;
                }
            };

            let guard = Arc::clone(&this.lock).lock_owned().await;
            body_state.send_replace(RequestState::Generating);
            let mut events = this.spawn_generation(prepared.prompt, guard);
            let mut sources = prepared.sources;
            let mut token_count = 0usize;

            while let Some(event) = events.recv().await {
                match event {
                    Ok(GenerationEvent::Token(token)) => {
                        token_count += 1;
                        yield Ok(CompletionDelta::new(&body_id, &model_name, token, None, None));
                    }
                    Ok(GenerationEvent::Finished(reason)) => {
                        info!(completion.id = %body_id, token_count, finish_reason = ?reason, "completion finished");
                        body_state.send_replace(RequestState::Completed);
                        yield Ok(CompletionDelta::new(&body_id, &model_name, String::new(), Some(reason), sources.take()));
                        return;
                    }
                    Err(e) => {
                        error!(completion.id = %body_id, error = %e, "generation failed");
                        body_state.send_replace(RequestState::Errored);
                        yield Err(e);
                        return;
                    }
                }
            }

            body_state.send_replace(RequestState::Errored);
            yield Err(RagError::GenerationError {
                model: model_name,
                message: "generation task ended without finishing".to_string(),
            });
        };

        CompletionStream { id, inner: Box::pin(body), state }
    }

    /// Dispatch on [`CompletionRequest::stream`].
    ///
    /// # Errors
    ///
    /// See [`CompletionOrchestrator::complete`]; streaming requests report
    /// errors through the stream.
    pub async fn run(&self, request: CompletionRequest) -> Result<CompletionOutcome> {
        if request.stream {
            Ok(CompletionOutcome::Stream(self.stream(request)))
        } else {
            self.complete(request).await.map(CompletionOutcome::Complete)
        }
    }

    async fn prepare(
        &self,
        request: &CompletionRequest,
        state: &watch::Sender<RequestState>,
    ) -> Result<Prepared> {
        let mut history = request.conversation();
        let mut system = request.system_prompt.clone();
        if history.first().is_some_and(|m| m.role == Role::System) {
            let leading = history.remove(0);
            system = system.or(Some(leading.content));
        }

        let mut sources = Vec::new();
        if request.use_context {
            state.send_replace(RequestState::Retrieving);
            let query = history
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map_or("", |m| m.content.as_str());
            let retrieval = self
                .retriever
                .retrieve(query, self.config.similarity_top_k, 0, request.context_filter.as_ref())
                .await?;

            let scaffold = self.tokenizer.count(&self.render(
                Some(prompt::with_context(system.as_deref(), "")),
                &history,
            ));
            let budget = self
                .config
                .context_window
                .saturating_sub(self.config.max_new_tokens)
                .saturating_sub(scaffold);

            match self.assembler.assemble(&retrieval, budget) {
                AssembledContext::Context { text, citations, sources: used } => {
                    debug!(citation_count = citations.len(), budget, "context assembled");
                    system = Some(prompt::with_context(system.as_deref(), &text));
                    sources = used;
                }
                AssembledContext::Empty => {
                    info!(result_count = retrieval.len(), budget, "no context available, answering without it");
                }
            }
        }

        Ok(Prepared {
            prompt: self.render(system, &history),
            sources: request.include_sources.then_some(sources),
        })
    }

    fn render(&self, system: Option<String>, history: &[ChatMessage]) -> String {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.extend_from_slice(history);
        self.prompt_style.messages_to_prompt(&messages)
    }

    /// Run the model on its own task, holding `guard` until it stops.
    fn spawn_generation(
        &self,
        prompt: String,
        guard: OwnedMutexGuard<()>,
    ) -> mpsc::Receiver<Result<GenerationEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let model = Arc::clone(&self.model);
        let params = GenerationParams {
            max_new_tokens: self.config.max_new_tokens,
            temperature: self.config.temperature,
        };
        let timeout = Duration::from_secs(self.config.generation_timeout_secs);

        tokio::spawn(async move {
            let outcome = drive(model.as_ref(), &prompt, &params, timeout, &tx).await;
            // The model is done; a slow consumer must not keep it locked.
            drop(guard);
            if let Err(e) = outcome {
                let _ = tx.send(Err(e)).await;
            }
        });
        rx
    }
}

/// Forward model events to `tx` until the model finishes, the token limit is
/// hit, the deadline passes or the receiver goes away.
async fn drive(
    model: &dyn GenerationModel,
    prompt: &str,
    params: &GenerationParams,
    timeout: Duration,
    tx: &mpsc::Sender<Result<GenerationEvent>>,
) -> Result<()> {
    let deadline = tokio::time::sleep_until(Instant::now() + timeout);
    tokio::pin!(deadline);
    let timed_out = || RagError::GenerationTimeout { seconds: timeout.as_secs() };

    let mut tokens = tokio::select! {
        biased;
        () = tx.closed() => return Ok(()),
        () = &mut deadline => return Err(timed_out()),
        started = model.generate(prompt, params) => started?,
    };

    let mut produced = 0usize;
    loop {
        if produced >= params.max_new_tokens {
            debug!(produced, "max_new_tokens reached, stopping model");
            send_before(tx, GenerationEvent::Finished(FinishReason::Length), deadline.as_mut(), timeout).await?;
            return Ok(());
        }

        tokio::select! {
            biased;
            () = tx.closed() => {
                debug!(produced, "consumer went away, stopping model");
                return Ok(());
            }
            () = &mut deadline => return Err(timed_out()),
            next = tokens.next() => match next {
                Some(Ok(GenerationEvent::Token(token))) => {
                    produced += 1;
                    if !send_before(tx, GenerationEvent::Token(token), deadline.as_mut(), timeout).await? {
                        return Ok(());
                    }
                }
                Some(Ok(GenerationEvent::Finished(reason))) => {
                    send_before(tx, GenerationEvent::Finished(reason), deadline.as_mut(), timeout).await?;
                    return Ok(());
                }
                Some(Err(e)) => return Err(e),
                None => {
                    send_before(tx, GenerationEvent::Finished(FinishReason::Stop), deadline.as_mut(), timeout).await?;
                    return Ok(());
                }
            },
        }
    }
}

/// Send `event` unless `deadline` passes while waiting for buffer space.
///
/// Returns `Ok(false)` if the receiver is gone.
async fn send_before(
    tx: &mpsc::Sender<Result<GenerationEvent>>,
    event: GenerationEvent,
    deadline: Pin<&mut Sleep>,
    timeout: Duration,
) -> Result<bool> {
    tokio::select! {
        biased;
        () = deadline => Err(RagError::GenerationTimeout { seconds: timeout.as_secs() }),
        sent = tx.send(Ok(event)) => Ok(sent.is_ok()),
    }
}

impl std::fmt::Debug for CompletionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOrchestrator")
            .field("model", &self.model.name())
            .field("retriever", &self.retriever)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`CompletionOrchestrator`].
///
/// `retriever` and `model` are required. The prompt style defaults to the
/// configured [`PromptStyleKind`](crate::PromptStyleKind) and the tokenizer
/// to [`WhitespaceTokenizer`].
#[derive(Default)]
pub struct CompletionOrchestratorBuilder {
    config: Option<RagConfig>,
    retriever: Option<Retriever>,
    model: Option<Arc<dyn GenerationModel>>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    prompt_style: Option<Arc<dyn PromptStyle>>,
}

impl CompletionOrchestratorBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the retriever used for contextual completions.
    pub fn retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Set the generation model.
    pub fn model(mut self, model: Arc<dyn GenerationModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the tokenizer used for budgeting.
    pub fn tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Override the configured prompt style.
    pub fn prompt_style(mut self, style: Arc<dyn PromptStyle>) -> Self {
        self.prompt_style = Some(style);
        self
    }

    /// Build the [`CompletionOrchestrator`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing or
    /// the configuration is invalid.
    pub fn build(self) -> Result<CompletionOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let mut retriever =
            self.retriever.ok_or_else(|| RagError::ConfigError("retriever is required".to_string()))?;
        if config.similarity_threshold.is_some() {
            retriever = retriever.with_similarity_threshold(config.similarity_threshold);
        }
        let model = self.model.ok_or_else(|| RagError::ConfigError("model is required".to_string()))?;
        let tokenizer: Arc<dyn Tokenizer> = self.tokenizer.unwrap_or_else(|| Arc::new(WhitespaceTokenizer));
        let prompt_style = self.prompt_style.unwrap_or_else(|| config.prompt_style.build());

        Ok(CompletionOrchestrator {
            assembler: ContextAssembler::new(Arc::clone(&tokenizer)),
            config: Arc::new(config),
            retriever,
            tokenizer,
            prompt_style,
            model,
            lock: Arc::new(Mutex::new(())),
        })
    }
}
