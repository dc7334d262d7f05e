// Answer generation
// An ordered chain of text-generation backends; the first usable answer wins

pub mod inference;
pub mod ollama;


use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embeddings::OllamaClient;

pub use inference::InferenceStrategy;
pub use ollama::{ChatStrategy, CompletionStrategy};

/// Returned when no backend produced an answer
pub const FALLBACK_ANSWER: &str = "Not available in uploaded documents.";

/// Returned when no backend produced a small-talk reply
pub const SMALLTALK_FALLBACK: &str = "Hello!";

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant for university students. \
Answer strictly from the provided context. Reply in a natural mixed style: a brief 1\u{2013}2 \
sentence summary, followed by 3\u{2013}5 short bullet points, and an optional one\u{2011}line note \
if helpful. Keep it concise. When including links, output raw URLs without enclosing symbols \
or markdown wrappers. If the answer is not in the context, reply exactly: Not available in \
uploaded documents.";

const SMALLTALK_MAX_TOKENS: u32 = 64;
const SMALLTALK_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Request(String),
    #[error("Unexpected generation response: {0}")]
    InvalidResponse(String),
    #[error("Generation task failed: {0}")]
    Task(String),
}

/// What a backend is asked to produce
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// Instructions for chat-style backends; absent for plain replies
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Prompt {
    /// Answer `question` using only `context`
    #[inline]
    pub fn grounded(question: &str, context: &str) -> Self {
        Self {
            system: Some(SYSTEM_PROMPT.to_string()),
            user: format!("Context:\n{}\n\nQuestion: {}", context, question),
            max_tokens: 512,
            temperature: 0.1,
        }
    }

    /// Short polite reply to a greeting or thanks
    #[inline]
    pub fn small_talk(text: &str) -> Self {
        Self {
            system: None,
            user: format!("Respond politely and briefly: {}", text),
            max_tokens: SMALLTALK_MAX_TOKENS,
            temperature: SMALLTALK_TEMPERATURE,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Single-string form for completion backends
    #[inline]
    pub fn completion_prompt(&self) -> String {
        match &self.system {
            Some(system) => format!("{}\n\n{}\n\nAnswer:", system, self.user),
            None => self.user.clone(),
        }
    }
}

/// One text-generation backend.
///
/// `Ok(None)` means the backend declined; an error means it failed. Either way the
/// chain moves on to the next backend.
#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<Option<String>, GenerationError>;
}

/// Backends tried in order
pub struct GenerationChain {
    strategies: Vec<Box<dyn GenerationStrategy>>,
    max_tokens: u32,
    temperature: f32,
}

impl GenerationChain {
    #[inline]
    pub fn new(strategies: Vec<Box<dyn GenerationStrategy>>) -> Self {
        Self {
            strategies,
            max_tokens: 512,
            temperature: 0.1,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Ollama chat, then Ollama completion, then the generic inference endpoint if configured
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let generation = &config.generation;

        let client = OllamaClient::new(config)
            .context("Failed to initialize Ollama client for generation")?
            .with_model(&generation.model)
            .with_timeout(Duration::from_secs(generation.timeout_secs))
            .with_retry_attempts(1);

        let mut strategies: Vec<Box<dyn GenerationStrategy>> = vec![
            Box::new(ChatStrategy::new(client.clone())),
            Box::new(CompletionStrategy::new(client)),
        ];

        if let Some(url) = &generation.inference_url {
            let strategy = InferenceStrategy::new(url, generation.api_token.clone())
                .context("Failed to initialize inference endpoint")?
                .with_timeout(Duration::from_secs(generation.timeout_secs));
            strategies.push(Box::new(strategy));
        }

        Ok(Self::new(strategies).with_sampling(generation.max_tokens, generation.temperature))
    }

    #[inline]
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Answer `question` from `context`; never fails
    #[inline]
    pub async fn generate(&self, question: &str, context: &str) -> String {
        let prompt =
            Prompt::grounded(question, context).with_sampling(self.max_tokens, self.temperature);

        self.first_answer(&prompt)
            .await
            .unwrap_or_else(|| FALLBACK_ANSWER.to_string())
    }

    /// Brief reply to small talk; never fails
    #[inline]
    pub async fn reply_briefly(&self, text: &str) -> String {
        self.first_answer(&Prompt::small_talk(text))
            .await
            .unwrap_or_else(|| SMALLTALK_FALLBACK.to_string())
    }

    async fn first_answer(&self, prompt: &Prompt) -> Option<String> {
        for strategy in &self.strategies {
            match strategy.generate(prompt).await {
                Ok(Some(answer)) if !answer.trim().is_empty() => {
                    debug!("Answer produced by {}", strategy.name());
                    return Some(answer.trim().to_string());
                }
                Ok(_) => debug!("{} declined to answer", strategy.name()),
                Err(e) => warn!("{} failed, trying next backend: {}", strategy.name(), e),
            }
        }

        info!("No generation backend produced an answer, using fallback");
        None
    }
}
