
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationError, GenerationStrategy, Prompt};
use crate::embeddings::OllamaClient;

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
}

impl From<&Prompt> for Options {
    fn from(prompt: &Prompt) -> Self {
        Self {
            temperature: prompt.temperature,
            num_predict: prompt.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: Options,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// System and user messages sent to Ollama's `/api/chat`
#[derive(Debug, Clone)]
pub struct ChatStrategy {
    client: OllamaClient,
}

impl ChatStrategy {
    #[inline]
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

fn chat(client: &OllamaClient, prompt: &Prompt) -> Result<String> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &prompt.system {
        messages.push(Message {
            role: "system",
            content: system,
        });
    }
    messages.push(Message {
        role: "user",
        content: &prompt.user,
    });

    let request = ChatRequest {
        model: client.model(),
        messages,
        stream: false,
        options: Options::from(prompt),
    };

    let response_text = client
        .post_json("/api/chat", &request)
        .context("Chat request failed")?;

    let response: ChatResponse =
        serde_json::from_str(&response_text).context("Failed to parse chat response")?;

    Ok(response.message.content)
}

#[async_trait]
impl GenerationStrategy for ChatStrategy {
    fn name(&self) -> &str {
        "ollama-chat"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Option<String>, GenerationError> {
        let client = self.client.clone();
        let prompt = prompt.clone();

        debug!("Requesting chat completion from {}", client.model());
        let content = tokio::task::spawn_blocking(move || chat(&client, &prompt))
            .await
            .map_err(|e| GenerationError::Task(e.to_string()))?
            .map_err(|e| GenerationError::Request(format!("{:#}", e)))?;

        Ok(Some(content).filter(|c| !c.trim().is_empty()))
    }
}

/// One combined prompt sent to Ollama's `/api/generate`
#[derive(Debug, Clone)]
pub struct CompletionStrategy {
    client: OllamaClient,
}

impl CompletionStrategy {
    #[inline]
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

fn complete(client: &OllamaClient, prompt: &Prompt) -> Result<String> {
    let text = prompt.completion_prompt();
    let request = GenerateRequest {
        model: client.model(),
        prompt: &text,
        stream: false,
        options: Options::from(prompt),
    };

    let response_text = client
        .post_json("/api/generate", &request)
        .context("Completion request failed")?;

    let response: GenerateResponse =
        serde_json::from_str(&response_text).context("Failed to parse completion response")?;

    Ok(response.response)
}

#[async_trait]
impl GenerationStrategy for CompletionStrategy {
    fn name(&self) -> &str {
        "ollama-completion"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Option<String>, GenerationError> {
        let client = self.client.clone();
        let prompt = prompt.clone();

        debug!("Requesting text completion from {}", client.model());
        let content = tokio::task::spawn_blocking(move || complete(&client, &prompt))
            .await
            .map_err(|e| GenerationError::Task(e.to_string()))?
            .map_err(|e| GenerationError::Request(format!("{:#}", e)))?;

        Ok(Some(content).filter(|c| !c.trim().is_empty()))
    }
}
