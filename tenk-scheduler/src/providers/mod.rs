//! Model provider abstraction
//!
//! Reasoning and embedding calls go through gateways that try an ordered
//! provider chain, waiting on a per-provider rate limiter before each call
//! and falling through to the next provider on failure.

pub mod groq;
pub mod local;
pub mod openai;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tenk_common::{Error, Result};

pub use groq::GroqProvider;
pub use local::HashEmbedder;
pub use openai::OpenAiProvider;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One reasoning request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A chat-completion backend
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Run one completion, returning the raw model text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// An embedding backend
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input in order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

fn build_limiter(requests_per_minute: u32) -> DirectLimiter {
    let rpm = match NonZeroU32::new(requests_per_minute) {
        Some(n) => n,
        None => NonZeroU32::MIN,
    };
    RateLimiter::direct(Quota::per_minute(rpm))
}

struct RateLimited<P> {
    provider: P,
    limiter: DirectLimiter,
}

/// Ordered reasoning-provider chain with rate limiting and fallback
pub struct ReasoningGateway {
    chain: Vec<RateLimited<Arc<dyn ReasoningProvider>>>,
}

impl ReasoningGateway {
    pub fn new() -> Self {
        Self { chain: Vec::new() }
    }

    /// Append a provider to the fallback chain
    pub fn push(&mut self, provider: Arc<dyn ReasoningProvider>, requests_per_minute: u32) {
        self.chain.push(RateLimited {
            provider,
            limiter: build_limiter(requests_per_minute),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Try providers in order, returning the first success.
    ///
    /// A provider failure is logged and the next provider is tried; the
    /// error surfaces only when the whole chain is exhausted.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut last_error = None;

        for entry in &self.chain {
            entry.limiter.until_ready().await;

            match entry.provider.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(
                        provider = entry.provider.name(),
                        error = %e,
                        "Reasoning provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Provider("No reasoning providers configured".to_string())))
    }
}

impl Default for ReasoningGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered embedding-provider chain with rate limiting and fallback
pub struct EmbeddingGateway {
    chain: Vec<RateLimited<Arc<dyn EmbeddingProvider>>>,
}

impl EmbeddingGateway {
    pub fn new() -> Self {
        Self { chain: Vec::new() }
    }

    pub fn push(&mut self, provider: Arc<dyn EmbeddingProvider>, requests_per_minute: u32) {
        self.chain.push(RateLimited {
            provider,
            limiter: build_limiter(requests_per_minute),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Dimension of the first provider in the chain; the chain is expected to
    /// be dimension-consistent.
    pub fn dimension(&self) -> Option<usize> {
        self.chain.first().map(|e| e.provider.dimension())
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for entry in &self.chain {
            entry.limiter.until_ready().await;

            match entry.provider.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    tracing::warn!(
                        provider = entry.provider.name(),
                        error = %e,
                        "Embedding provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Provider("No embedding providers configured".to_string())))
    }
}

impl Default for EmbeddingGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the reasoning chain from configuration: primary first, then the
/// configured fallbacks. Providers without an API key are skipped with a
/// warning; an empty chain is allowed and fails at call time.
pub fn build_reasoning_gateway(
    config: &tenk_common::config::ReasoningConfig,
) -> Result<ReasoningGateway> {
    let mut gateway = ReasoningGateway::new();

    let mut names = vec![config.primary.as_str()];
    names.extend(config.fallbacks.iter().map(|s| s.as_str()));

    for name in names {
        match name {
            "groq" => match &config.groq.api_key {
                Some(key) => {
                    let provider =
                        GroqProvider::new(key.clone(), config.groq.model.clone())?;
                    gateway.push(Arc::new(provider), config.groq.requests_per_minute);
                }
                None => tracing::warn!("Groq API key missing, provider skipped"),
            },
            "openai" => match &config.openai.api_key {
                Some(key) => {
                    let provider = OpenAiProvider::new(
                        key.clone(),
                        config.openai.model.clone(),
                        String::new(),
                        0,
                    )?;
                    gateway.push(Arc::new(provider), config.openai.requests_per_minute);
                }
                None => tracing::warn!("OpenAI API key missing, provider skipped"),
            },
            other => {
                return Err(Error::Config(format!(
                    "Unknown reasoning provider '{}'",
                    other
                )))
            }
        }
    }

    if gateway.is_empty() {
        tracing::warn!("No reasoning providers configured, pipeline stages will use placeholders");
    }
    Ok(gateway)
}

/// Build the embedding chain from configuration. The "local" provider is the
/// offline hashed embedder and needs no credentials.
pub fn build_embedding_gateway(
    config: &tenk_common::config::EmbeddingConfig,
) -> Result<EmbeddingGateway> {
    let mut gateway = EmbeddingGateway::new();

    let mut names = vec![config.primary.as_str()];
    names.extend(config.fallbacks.iter().map(|s| s.as_str()));

    for name in names {
        match name {
            "openai" => match &config.openai.api_key {
                Some(key) => {
                    let provider = OpenAiProvider::new(
                        key.clone(),
                        String::new(),
                        config.openai.model.clone(),
                        config.dimension,
                    )?;
                    gateway.push(Arc::new(provider), config.openai.requests_per_minute);
                }
                None => tracing::warn!("OpenAI API key missing, embedding provider skipped"),
            },
            "local" => {
                gateway.push(Arc::new(HashEmbedder::new(config.dimension)), u32::MAX);
            }
            other => {
                return Err(Error::Config(format!(
                    "Unknown embedding provider '{}'",
                    other
                )))
            }
        }
    }

    if gateway.is_empty() {
        return Err(Error::Config(
            "No embedding providers configured".to_string(),
        ));
    }
    Ok(gateway)
}

/// Strip a `<think>...</think>` prefix some reasoning models emit, then trim
/// markdown code fences so the remainder parses as JSON.
pub fn clean_model_json(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(start) = text.find("<think>") {
        if let Some(end) = text.find("</think>") {
            if start < end {
                text = text[end + "</think>".len()..].trim();
            }
        }
    }
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}
