
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{GenerationError, GenerationStrategy, Prompt};
use crate::embeddings::ollama::retry_request;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: Inputs<'a>,
    parameters: Parameters,
}

#[derive(Debug, Serialize)]
struct Inputs<'a> {
    past_user_inputs: [&'a str; 0],
    generated_responses: [&'a str; 0],
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Parameters {
    max_new_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct Generated {
    #[serde(default)]
    generated_text: Option<String>,
}

/// Conversational payload POSTed to a hosted text-generation endpoint
#[derive(Debug, Clone)]
pub struct InferenceStrategy {
    url: Url,
    api_token: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
}

impl InferenceStrategy {
    #[inline]
    pub fn new(url: &str, api_token: Option<String>) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid inference URL: {}", url))?;

        Ok(Self {
            url,
            api_token: api_token.filter(|token| !token.is_empty()),
            agent: build_agent(DEFAULT_TIMEOUT),
            retry_attempts: 1,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    fn request(&self, prompt: &Prompt) -> Result<Option<String>> {
        let text = prompt.completion_prompt();
        let body = InferenceRequest {
            inputs: Inputs {
                past_user_inputs: [],
                generated_responses: [],
                text: &text,
            },
            parameters: Parameters {
                max_new_tokens: prompt.max_tokens,
                temperature: prompt.temperature,
            },
        };
        let request_json = serde_json::to_string(&body).context("Failed to serialize request body")?;

        let authorization = self
            .api_token
            .as_ref()
            .map(|token| format!("Bearer {}", token));

        let response_text = retry_request(self.retry_attempts, self.url.as_str(), || {
            let mut request = self
                .agent
                .post(self.url.as_str())
                .header("Content-Type", "application/json");
            if let Some(value) = &authorization {
                request = request.header("Authorization", value);
            }
            request
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Inference request failed")?;

        parse_generated_text(&response_text)
    }
}

/// Accepts `[{"generated_text": ..}]` or `{"generated_text": ..}`
fn parse_generated_text(response_text: &str) -> Result<Option<String>> {
    let value: Value =
        serde_json::from_str(response_text).context("Failed to parse inference response")?;

    let generated: Option<Generated> = match value {
        Value::Array(items) => match items.into_iter().next() {
            Some(first @ Value::Object(_)) => Some(serde_json::from_value(first)?),
            _ => None,
        },
        object @ Value::Object(_) => Some(serde_json::from_value(object)?),
        _ => None,
    };

    Ok(generated
        .and_then(|g| g.generated_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty()))
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

#[async_trait]
impl GenerationStrategy for InferenceStrategy {
    fn name(&self) -> &str {
        "inference-endpoint"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Option<String>, GenerationError> {
        let strategy = self.clone();
        let prompt = prompt.clone();

        debug!("Requesting generation from {}", self.url);
        tokio::task::spawn_blocking(move || strategy.request(&prompt))
            .await
            .map_err(|e| GenerationError::Task(e.to_string()))?
            .map_err(|e| GenerationError::Request(format!("{:#}", e)))
    }
}
