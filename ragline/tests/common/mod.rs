//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ragline::{
    CompletionOrchestrator, Embedder, EmbeddingProvider, GenerationEvent, GenerationModel,
    GenerationParams, HashingEmbeddingProvider, InMemoryVectorStore, IngestionPipeline, RagConfig,
    RagError, Result, Retriever, TokenStream, VectorStore,
};

/// How a [`ScriptedModel`] behaves once generation starts.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Emit the scripted tokens, then end.
    Finite,
    /// Emit `"tick "` forever.
    Endless,
    /// Never emit anything.
    Stall,
    /// Emit this many scripted tokens, then fail.
    FailAfter(usize),
}

#[derive(Debug, Default)]
pub struct ModelStats {
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

struct ActiveGuard(Arc<ModelStats>);

impl ActiveGuard {
    fn enter(stats: Arc<ModelStats>) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_active.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A generation model with a fixed script that records what it was asked.
pub struct ScriptedModel {
    tokens: Vec<String>,
    behaviour: Behaviour,
    pub stats: Arc<ModelStats>,
}

impl ScriptedModel {
    pub fn new(tokens: &[&str], behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens.iter().map(|t| (*t).to_string()).collect(),
            behaviour,
            stats: Arc::new(ModelStats::default()),
        })
    }

    pub fn answering(tokens: &[&str]) -> Arc<Self> {
        Self::new(tokens, Behaviour::Finite)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.stats.prompts.lock().unwrap().last().cloned()
    }

    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.stats.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.stats.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationModel for ScriptedModel {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<TokenStream> {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        self.stats.prompts.lock().unwrap().push(prompt.to_string());
        let guard = ActiveGuard::enter(Arc::clone(&self.stats));
        let tokens = self.tokens.clone();
        let behaviour = self.behaviour;

        Ok(Box::pin(async_stream::stream! {
            let _guard = guard;
            match behaviour {
                Behaviour::Finite => {
                    for token in tokens {
                        tokio::task::yield_now().await;
                        yield Ok(GenerationEvent::Token(token));
                    }
                }
                Behaviour::Endless => loop {
                    tokio::task::yield_now().await;
                    yield Ok(GenerationEvent::Token("tick ".to_string()));
                },
                Behaviour::Stall => std::future::pending::<()>().await,
                Behaviour::FailAfter(n) => {
                    for token in tokens.into_iter().take(n) {
                        yield Ok(GenerationEvent::Token(token));
                    }
                    yield Err(RagError::GenerationError {
                        model: "scripted".to_string(),
                        message: "device lost".to_string(),
                    });
                }
            }
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// An embedding provider whose model is never loaded.
pub struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::EmbeddingUnavailable {
            provider: "down".to_string(),
            message: "model not loaded".to_string(),
        })
    }

    fn dimensions(&self) -> usize {
        16
    }

    fn name(&self) -> &str {
        "down"
    }
}

/// Small chunks so short test texts span several of them.
pub fn test_config() -> RagConfig {
    RagConfig::builder()
        .chunk_size(8)
        .chunk_overlap(2)
        .embed_batch_size(4)
        .similarity_top_k(2)
        .context_window(512)
        .max_new_tokens(64)
        .model_name("scripted")
        .build()
        .unwrap()
}

pub struct Harness {
    pub config: RagConfig,
    pub store: Arc<InMemoryVectorStore>,
    pub embedder: Embedder,
    pub pipeline: IngestionPipeline,
}

impl Harness {
    pub fn new(config: RagConfig) -> Self {
        Self::with_provider(config, Arc::new(HashingEmbeddingProvider::new(1024)))
    }

    pub fn with_provider(config: RagConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Embedder::new(provider, config.embed_batch_size);
        let pipeline = IngestionPipeline::builder()
            .config(config.clone())
            .embedder(embedder.clone())
            .vector_store(store.clone())
            .build()
            .unwrap();
        Self { config, store, embedder, pipeline }
    }

    pub fn retriever(&self) -> Retriever {
        let store: Arc<dyn VectorStore> = self.store.clone();
        Retriever::new(self.embedder.clone(), store)
    }

    pub fn orchestrator(&self, model: Arc<ScriptedModel>) -> CompletionOrchestrator {
        CompletionOrchestrator::builder()
            .config(self.config.clone())
            .retriever(self.retriever())
            .model(model)
            .build()
            .unwrap()
    }
}

/// `count` distinct words tagged with `tag`, e.g. `w0tag w1tag ...`.
pub fn words(tag: &str, count: usize) -> String {
    (0..count).map(|i| format!("w{i}{tag}")).collect::<Vec<_>>().join(" ")
}
