// Retrieval orchestration
// Question -> embedding -> nearest chunks -> context -> generated answer

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::generation::GenerationChain;
use crate::index::{SearchHit, SimilarityIndex};

pub const NO_CONTEXT_ANSWER: &str = "No relevant context found in uploaded documents.";

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

const GREETINGS: [&str; 8] = [
    "hi",
    "hello",
    "hey",
    "thanks",
    "thank you",
    "good morning",
    "good evening",
    "good afternoon",
];

/// Greetings and thanks that need no document lookup.
///
/// Only explicit greeting phrases count; anything else containing `?` is a question.
#[inline]
pub fn is_smalltalk(text: &str) -> bool {
    let text = text.trim().to_lowercase();

    GREETINGS.iter().any(|greeting| {
        text == *greeting
            || text
                .strip_prefix(*greeting)
                .is_some_and(|rest| rest.starts_with(' '))
    })
}

/// Join hits into a context block, each chunk prefixed with its source
#[inline]
pub fn build_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("[{}]\n{}", hit.chunk.source_label(), hit.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    SmallTalk,
    NoContext,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub kind: AnswerKind,
    /// Chunks the answer was generated from, closest first
    pub sources: Vec<SearchHit>,
}

pub struct Orchestrator {
    index: Arc<SimilarityIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: GenerationChain,
    top_k: usize,
    max_distance: Option<f32>,
    query_timeout: Duration,
}

impl Orchestrator {
    #[inline]
    pub fn new(
        index: Arc<SimilarityIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: GenerationChain,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            top_k: 5,
            max_distance: None,
            query_timeout: QUERY_TIMEOUT,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: &Config) -> Self {
        self.top_k = config.index.top_k;
        self.max_distance = config.index.max_distance;
        self.query_timeout = Duration::from_secs(config.index.embed_timeout_secs);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_distance(mut self, max_distance: Option<f32>) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Nearest chunks for `question`; failures are logged and give no hits
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Vec<SearchHit> {
        let query = match self.embed_question(question).await {
            Ok(query) => query,
            Err(e) => {
                warn!("Could not embed question: {}", e);
                return Vec::new();
            }
        };

        let hits = match self.index.search(&query, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Similarity search failed: {}", e);
                return Vec::new();
            }
        };

        let found = hits.len();
        let hits: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| self.max_distance.is_none_or(|max| hit.distance <= max))
            .collect();

        debug!(
            "Retrieved {} hits ({} beyond distance limit)",
            hits.len(),
            found - hits.len()
        );
        hits
    }

    /// Answer a question from the indexed documents; never fails
    #[inline]
    pub async fn answer(&self, question: &str) -> Answer {
        if is_smalltalk(question) {
            info!("Answering small talk without document lookup");
            return Answer {
                text: self.generator.reply_briefly(question).await,
                kind: AnswerKind::SmallTalk,
                sources: Vec::new(),
            };
        }

        let hits = self.retrieve(question).await;
        if hits.is_empty() {
            return Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                kind: AnswerKind::NoContext,
                sources: Vec::new(),
            };
        }

        let context = build_context(&hits);
        let text = self.generator.generate(question, &context).await;

        Answer {
            text,
            kind: AnswerKind::Generated,
            sources: hits,
        }
    }

    async fn embed_question(&self, question: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = [question.to_string()];
        let mut vectors = tokio::time::timeout(self.query_timeout, self.embedder.embed(&texts))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.query_timeout))??;

        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }

        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }
}
