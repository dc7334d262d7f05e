
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EmbeddingError, EmbeddingProvider};
use crate::config::Config;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.ollama.model.clone(),
            batch_size: config.ollama.batch_size.max(1),
            agent: build_agent(Duration::from_secs(config.ollama.timeout_secs)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
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

    /// Use a different model on the same server
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_model().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// Validate that the configured model is available
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        debug!("Validating model: {}", self.model);

        let models = self.list_models().context("Failed to list models")?;

        if models.iter().any(|m| m.name == self.model) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate embeddings for many texts, split into server-sized requests
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let embeddings = self
                .request_embeddings(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            results.extend(embeddings);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response_text = self
            .post_json("/api/embed", &request)
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    /// POST a JSON body to an endpoint on this server and return the raw response text
    pub(crate) fn post_json<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<String> {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("Failed to build URL for {}", endpoint))?;

        let request_json =
            serde_json::to_string(body).context("Failed to serialize request body")?;

        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn make_request_with_retry<F>(&self, request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        retry_request(self.retry_attempts, self.base_url.as_str(), request_fn)
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Run `request_fn` up to `attempts` times with exponential backoff.
///
/// Server errors and transport failures are retried; client errors are not.
pub(crate) fn retry_request<F>(attempts: u32, target: &str, mut request_fn: F) -> Result<String>
where
    F: FnMut() -> Result<String, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!("HTTP request attempt {}/{}", attempt, attempts);

        match request_fn() {
            Ok(response_text) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response_text);
            }
            Err(error) => {
                let should_retry = match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status >= 500 {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, attempts
                            );
                            true
                        } else {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                        }
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            error, attempt, attempts
                        );
                        true
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        false
                    }
                };

                if !should_retry {
                    return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                }

                last_error = Some(anyhow::anyhow!("Request error: {}", error));

                if attempt < attempts {
                    let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                    let delay = Duration::from_millis(delay_ms);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.clone();
        let inputs = texts.to_vec();
        let expected = inputs.len();

        let embeddings =
            tokio::task::spawn_blocking(move || client.generate_embeddings_batch(&inputs))
                .await
                .map_err(|e| EmbeddingError::Provider(format!("embedding task failed: {}", e)))?
                .map_err(|e| EmbeddingError::Provider(format!("{:#}", e)))?;

        if embeddings.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: embeddings.len(),
            });
        }

        Ok(embeddings)
    }
}
