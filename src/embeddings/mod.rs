// Embeddings module
// Text chunking and the providers that turn chunk text into vectors

pub mod chunking;
pub mod ollama;

pub use chunking::{ChunkingConfig, TextChunk, chunk_text, estimate_token_count};
pub use ollama::OllamaClient;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding provider failed: {0}")]
    Provider(String),
    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),
}

/// Converts text into fixed-width vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}
