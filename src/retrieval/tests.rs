use super::*;
use crate::generation::{
    FALLBACK_ANSWER, GenerationError, GenerationStrategy, Prompt, SMALLTALK_FALLBACK,
};
use crate::index::{ChunkMetadata, ChunkRecord};
use async_trait::async_trait;

/// Embeds every question as the same fixed vector
struct FixedEmbedder(Vec<f32>);

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| self.0.clone()).collect())
    }
}

struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Provider("connection refused".to_string()))
    }
}

/// Answers with the user message it was given
struct Echo;

#[async_trait]
impl GenerationStrategy for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Option<String>, GenerationError> {
        Ok(Some(prompt.user.clone()))
    }
}

fn record(chunk_id: i64, filename: &str, content: &str) -> ChunkRecord {
    ChunkRecord {
        chunk_id,
        document_id: chunk_id * 10,
        chunk_index: 0,
        content: content.to_string(),
        metadata: ChunkMetadata {
            filename: Some(filename.to_string()),
            ..ChunkMetadata::default()
        },
    }
}

async fn populated_index() -> Arc<SimilarityIndex> {
    let index = Arc::new(SimilarityIndex::new(2).expect("should create index"));
    index
        .add(
            vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![5.0, 5.0]],
            vec![
                record(1, "syllabus.pdf", "Unit 1 covers arrays."),
                record(2, "timetable.pdf", "Lab on Monday."),
                record(3, "notice.pdf", "Holiday on Friday."),
            ],
        )
        .await
        .expect("should add vectors");
    index
}

fn echo_chain() -> GenerationChain {
    GenerationChain::new(vec![Box::new(Echo)])
}

#[test]
fn smalltalk_detection() {
    assert!(is_smalltalk("hi"));
    assert!(is_smalltalk("  Hello  "));
    assert!(is_smalltalk("thank you so much"));
    assert!(is_smalltalk("Good morning everyone"));
    assert!(is_smalltalk("hey what is up?"));

    assert!(!is_smalltalk("hi?"));
    assert!(!is_smalltalk("highway timetable"));
    assert!(!is_smalltalk("what is the syllabus?"));
    assert!(!is_smalltalk("thanksgiving holiday"));
    assert!(!is_smalltalk(""));
}

#[test]
fn context_lists_sources() {
    let hits = vec![
        SearchHit {
            chunk: record(1, "a.pdf", "First"),
            distance: 0.0,
        },
        SearchHit {
            chunk: ChunkRecord {
                metadata: ChunkMetadata::default(),
                ..record(2, "unused", "Second")
            },
            distance: 1.0,
        },
    ];

    assert_eq!(
        build_context(&hits),
        "[a.pdf]\nFirst\n\n[Document 20]\nSecond"
    );
    assert_eq!(build_context(&[]), "");
}

#[tokio::test]
async fn answers_from_nearest_chunks() {
    let orchestrator = Orchestrator::new(
        populated_index().await,
        Arc::new(FixedEmbedder(vec![0.1, 0.0])),
        echo_chain(),
    )
    .with_top_k(2);

    let answer = orchestrator.answer("What does unit 1 cover?").await;

    assert_eq!(answer.kind, AnswerKind::Generated);
    let ids: Vec<i64> = answer.sources.iter().map(|h| h.chunk.chunk_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(
        answer.text,
        "Context:\n[syllabus.pdf]\nUnit 1 covers arrays.\n\n[timetable.pdf]\nLab on Monday.\n\nQuestion: What does unit 1 cover?"
    );
}

#[tokio::test]
async fn distance_limit_drops_far_hits() {
    let orchestrator = Orchestrator::new(
        populated_index().await,
        Arc::new(FixedEmbedder(vec![0.0, 0.0])),
        echo_chain(),
    )
    .with_top_k(3)
    .with_max_distance(Some(1.0));

    let hits = orchestrator.retrieve("lab day?").await;
    let ids: Vec<i64> = hits.iter().map(|h| h.chunk.chunk_id).collect();
    assert_eq!(ids, vec![1, 2]);

    let strict = Orchestrator::new(
        populated_index().await,
        Arc::new(FixedEmbedder(vec![9.0, 9.0])),
        echo_chain(),
    )
    .with_max_distance(Some(0.5));

    let answer = strict.answer("anything?").await;
    assert_eq!(answer.kind, AnswerKind::NoContext);
    assert_eq!(answer.text, NO_CONTEXT_ANSWER);
}

#[tokio::test]
async fn empty_index_gives_no_context_answer() {
    let orchestrator = Orchestrator::new(
        Arc::new(SimilarityIndex::new(2).expect("should create index")),
        Arc::new(FixedEmbedder(vec![0.0, 0.0])),
        echo_chain(),
    );

    let answer = orchestrator.answer("When is the exam?").await;
    assert_eq!(answer.kind, AnswerKind::NoContext);
    assert_eq!(answer.text, NO_CONTEXT_ANSWER);
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn embedding_failure_gives_no_context_answer() {
    let orchestrator = Orchestrator::new(populated_index().await, Arc::new(DownEmbedder), echo_chain());

    let answer = orchestrator.answer("When is the exam?").await;
    assert_eq!(answer.kind, AnswerKind::NoContext);
}

#[tokio::test]
async fn wrong_query_dimension_gives_no_context_answer() {
    let orchestrator = Orchestrator::new(
        populated_index().await,
        Arc::new(FixedEmbedder(vec![0.0, 0.0, 0.0])),
        echo_chain(),
    );

    assert!(orchestrator.retrieve("exam?").await.is_empty());
}

#[tokio::test]
async fn smalltalk_skips_the_index() {
    let orchestrator = Orchestrator::new(
        populated_index().await,
        Arc::new(DownEmbedder),
        GenerationChain::new(Vec::new()),
    );

    let answer = orchestrator.answer("thanks").await;
    assert_eq!(answer.kind, AnswerKind::SmallTalk);
    assert_eq!(answer.text, SMALLTALK_FALLBACK);
}

#[tokio::test]
async fn generation_failure_returns_fixed_fallback() {
    let orchestrator = Orchestrator::new(
        populated_index().await,
        Arc::new(FixedEmbedder(vec![0.0, 0.0])),
        GenerationChain::new(Vec::new()),
    );

    let answer = orchestrator.answer("What does unit 1 cover?").await;
    assert_eq!(answer.kind, AnswerKind::Generated);
    assert_eq!(answer.text, FALLBACK_ANSWER);
    assert!(!answer.sources.is_empty());
}
