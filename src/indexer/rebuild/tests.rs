use super::*;
use crate::database::Database;
use crate::database::models::NewDocument;
use crate::embeddings::chunking::TextChunk;
use crate::index::ChunkMetadata;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Maps each text to `[len, 1.0]`; the call numbered `fail_on` (1-based) errors
struct FakeEmbedder {
    calls: AtomicUsize,
    fail_on: Option<usize>,
    cancel_after_first: Option<watch::Sender<bool>>,
}

impl FakeEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: None,
            cancel_after_first: None,
        }
    }

    fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::new()
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(sender) = &self.cancel_after_first {
            sender.send_replace(true);
        }

        if self.fail_on == Some(call) {
            return Err(EmbeddingError::Provider("model unavailable".to_string()));
        }

        Ok(texts
            .iter()
            .map(|t| vec![t.len() as f32, 1.0])
            .collect())
    }
}

struct SlowEmbedder;

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
    }
}

struct ShortEmbedder;

#[async_trait]
impl EmbeddingProvider for ShortEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(vec![vec![0.0, 0.0]])
    }
}

fn text_chunks(texts: &[&str]) -> Vec<TextChunk> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| TextChunk {
            content: (*text).to_string(),
            chunk_index: u32::try_from(i).expect("index fits"),
            token_count: 1,
        })
        .collect()
}

/// Two documents holding five chunks in total
async fn seeded_store() -> (TempDir, Arc<Database>) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should create database");

    database
        .create_document(
            NewDocument::new("syllabus.txt", "Syllabus"),
            &text_chunks(&["Unit 1: arrays", "Unit 2: lists", "Unit 3: trees"]),
        )
        .await
        .expect("should store first document");
    database
        .create_document(
            NewDocument::new("timetable.txt", "Timetable"),
            &text_chunks(&["Monday: lab", "Friday: exam"]),
        )
        .await
        .expect("should store second document");

    (temp_dir, Arc::new(database))
}

fn empty_index() -> Arc<SimilarityIndex> {
    Arc::new(SimilarityIndex::new(2).expect("should create index"))
}

fn running() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[tokio::test]
async fn rebuild_indexes_every_stored_chunk() {
    let (_temp_dir, store) = seeded_store().await;
    let index = empty_index();
    let (_tx, rx) = running();

    let report = IndexRebuilder::new(store, Arc::new(FakeEmbedder::new()), Arc::clone(&index))
        .rebuild_from_source(&rx)
        .await;

    assert_eq!(report.chunks_seen, 5);
    assert_eq!(report.chunks_indexed, 5);
    assert_eq!(report.batches_total, 1);
    assert_eq!(report.total_vectors, 5);
    assert!(!report.is_degraded());
    assert_eq!(index.stats().await.total_vectors, 5);
    assert_eq!(index.document_ids().await.len(), 2);
}

#[tokio::test]
async fn failed_batch_is_skipped_and_rebuild_continues() {
    let (_temp_dir, store) = seeded_store().await;
    let index = empty_index();
    let (_tx, rx) = running();

    let report = IndexRebuilder::new(
        store,
        Arc::new(FakeEmbedder::failing_on(2)),
        Arc::clone(&index),
    )
    .with_batch_size(2)
    .rebuild_from_source(&rx)
    .await;

    assert_eq!(report.batches_total, 3);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.chunks_indexed, 3);
    assert_eq!(index.stats().await.total_vectors, 3);

    // Batch 2 held the third chunk of the first document and the first of the second
    let contents: Vec<String> = index
        .current()
        .await
        .chunks()
        .iter()
        .map(|c| c.content.clone())
        .collect();
    assert_eq!(
        contents,
        vec!["Unit 1: arrays", "Unit 2: lists", "Friday: exam"]
    );
}

#[tokio::test]
async fn every_batch_failing_is_degraded() {
    let (_temp_dir, store) = seeded_store().await;
    let index = empty_index();
    let (_tx, rx) = running();

    let report = IndexRebuilder::new(
        store,
        Arc::new(FakeEmbedder::failing_on(1)),
        Arc::clone(&index),
    )
    .rebuild_from_source(&rx)
    .await;

    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.total_vectors, 0);
    assert!(report.is_degraded());
}

#[tokio::test]
async fn shutdown_before_start_adds_nothing() {
    let (_temp_dir, store) = seeded_store().await;
    let index = empty_index();
    let (_tx, rx) = watch::channel(true);

    let report = IndexRebuilder::new(store, Arc::new(FakeEmbedder::new()), Arc::clone(&index))
        .rebuild_from_source(&rx)
        .await;

    assert!(report.cancelled);
    assert_eq!(report.batches_total, 0);
    assert_eq!(index.stats().await.total_vectors, 0);
    assert!(!report.is_degraded());
}

#[tokio::test]
async fn shutdown_stops_at_next_batch_boundary() {
    let (_temp_dir, store) = seeded_store().await;
    let index = empty_index();
    let (tx, rx) = running();

    let embedder = FakeEmbedder {
        cancel_after_first: Some(tx),
        ..FakeEmbedder::new()
    };

    let report = IndexRebuilder::new(store, Arc::new(embedder), Arc::clone(&index))
        .with_batch_size(2)
        .rebuild_from_source(&rx)
        .await;

    assert!(report.cancelled);
    assert_eq!(report.batches_total, 1);
    assert_eq!(index.stats().await.total_vectors, 2);
}

#[tokio::test]
async fn slow_provider_times_out_per_batch() {
    let (_temp_dir, store) = seeded_store().await;
    let index = empty_index();
    let (_tx, rx) = running();

    let report = IndexRebuilder::new(store, Arc::new(SlowEmbedder), Arc::clone(&index))
        .with_embed_timeout(Duration::from_millis(20))
        .rebuild_from_source(&rx)
        .await;

    assert_eq!(report.batches_failed, 1);
    assert_eq!(index.stats().await.total_vectors, 0);
}

#[tokio::test]
async fn wrong_vector_count_fails_the_batch() {
    let (_temp_dir, store) = seeded_store().await;
    let index = empty_index();
    let (_tx, rx) = running();

    let report = IndexRebuilder::new(store, Arc::new(ShortEmbedder), Arc::clone(&index))
        .rebuild_from_source(&rx)
        .await;

    assert_eq!(report.batches_failed, 1);
    assert_eq!(index.stats().await.total_vectors, 0);
}

#[tokio::test]
async fn wrong_dimension_fails_the_batch() {
    let (_temp_dir, store) = seeded_store().await;
    let index = Arc::new(SimilarityIndex::new(3).expect("should create index"));
    let (_tx, rx) = running();

    let report = IndexRebuilder::new(store, Arc::new(FakeEmbedder::new()), Arc::clone(&index))
        .with_batch_size(2)
        .rebuild_from_source(&rx)
        .await;

    assert_eq!(report.batches_failed, 3);
    assert!(report.is_degraded());
}

struct FlakyStore;

#[async_trait]
impl ChunkStore for FlakyStore {
    fn list_all_chunks(&self) -> BoxStream<'_, anyhow::Result<ChunkRecord>> {
        let record = |id: i64| ChunkRecord {
            chunk_id: id,
            document_id: 1,
            chunk_index: u32::try_from(id).expect("small id"),
            content: format!("chunk {}", id),
            metadata: ChunkMetadata::default(),
        };

        Box::pin(stream::iter(vec![
            Ok(record(0)),
            Err(anyhow::anyhow!("malformed row")),
            Ok(record(2)),
        ]))
    }

    async fn list_chunks_for_document(&self, _document_id: i64) -> anyhow::Result<Vec<ChunkRecord>> {
        Ok(Vec::new())
    }

    async fn count_chunks(&self) -> anyhow::Result<usize> {
        Ok(3)
    }
}

#[tokio::test]
async fn unreadable_rows_are_skipped() {
    let index = empty_index();
    let (_tx, rx) = running();

    let report = IndexRebuilder::new(
        Arc::new(FlakyStore),
        Arc::new(FakeEmbedder::new()),
        Arc::clone(&index),
    )
    .rebuild_from_source(&rx)
    .await;

    assert_eq!(report.rows_skipped, 1);
    assert_eq!(report.chunks_indexed, 2);
    assert_eq!(index.chunk_ids().await, vec![0, 2]);
}
