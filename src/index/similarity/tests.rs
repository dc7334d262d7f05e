use super::*;
use crate::index::ChunkMetadata;
use tempfile::TempDir;

fn record(chunk_id: i64, document_id: i64) -> ChunkRecord {
    ChunkRecord {
        chunk_id,
        document_id,
        chunk_index: 0,
        content: format!("chunk {}", chunk_id),
        metadata: ChunkMetadata::default(),
    }
}

async fn two_dimensional_index() -> SimilarityIndex {
    let index = SimilarityIndex::new(2).expect("should create index");
    index
        .add(
            vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![5.0, 5.0]],
            vec![record(1, 10), record(2, 10), record(3, 20)],
        )
        .await
        .expect("should add vectors");
    index
}

#[tokio::test]
async fn search_then_remove_scenario() {
    let index = two_dimensional_index().await;

    let hits = index.search(&[0.9, 0.0], 2).await.expect("search");
    let ids: Vec<i64> = hits.iter().map(|h| h.chunk.chunk_id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert!((hits[0].distance - 0.01).abs() < 1e-6);
    assert!((hits[1].distance - 0.81).abs() < 1e-6);

    assert_eq!(index.remove_by_document(10).await, 2);
    assert_eq!(index.stats().await.total_vectors, 1);

    let hits = index.search(&[0.0, 0.0], 5).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.chunk_id, 3);
    assert!((hits[0].distance - 50.0).abs() < 1e-4);
}

#[tokio::test]
async fn stats_track_adds_and_removes() {
    let index = two_dimensional_index().await;
    assert_eq!(
        index.stats().await,
        IndexStats {
            total_vectors: 3,
            dimension: 2
        }
    );

    index
        .add(vec![vec![2.0, 2.0]], vec![record(4, 30)])
        .await
        .expect("should add vectors");
    index.remove_by_document(20).await;
    assert_eq!(index.stats().await.total_vectors, 3);
    assert_eq!(index.chunk_ids().await, vec![1, 2, 4]);
    assert_eq!(
        index.document_ids().await.into_iter().collect::<Vec<_>>(),
        vec![10, 30]
    );
}

#[tokio::test]
async fn removed_documents_never_appear_in_results() {
    let index = two_dimensional_index().await;
    index.remove_documents(&[10, 20]).await;

    let hits = index.search(&[1.0, 0.0], 10).await.expect("search");
    assert!(hits.is_empty());
    assert_eq!(index.stats().await.dimension, 2);
}

#[tokio::test]
async fn remove_without_match_keeps_live_structure() {
    let index = two_dimensional_index().await;
    let before = index.current().await;

    assert_eq!(index.remove_by_document(999).await, 0);

    let after = index.current().await;
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn readers_keep_their_view_across_writes() {
    let index = two_dimensional_index().await;
    let held = index.current().await;

    index
        .add(vec![vec![9.0, 9.0]], vec![record(4, 30)])
        .await
        .expect("should add vectors");
    index.remove_by_document(10).await;

    assert_eq!(held.len(), 3);
    assert_eq!(index.stats().await.total_vectors, 2);
}

#[tokio::test]
async fn dimension_mismatch_rejects_whole_batch() {
    let index = two_dimensional_index().await;

    let err = index
        .add(
            vec![vec![1.0, 1.0], vec![1.0, 1.0, 1.0]],
            vec![record(4, 30), record(5, 30)],
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        IndexError::DimensionMismatch {
            expected: 2,
            actual: 3
        }
    );
    assert_eq!(index.stats().await.total_vectors, 3);

    let err = index.search(&[1.0], 1).await.unwrap_err();
    assert!(matches!(err, IndexError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn empty_index_search_is_empty() {
    let index = SimilarityIndex::new(384).expect("should create index");
    for k in [0, 1, 10] {
        assert!(index.search(&[0.5; 384], k).await.expect("search").is_empty());
    }
}

#[tokio::test]
async fn clear_is_idempotent() {
    let index = two_dimensional_index().await;
    index.clear().await;
    let once = index.stats().await;
    index.clear().await;
    assert_eq!(index.stats().await, once);
    assert_eq!(once.total_vectors, 0);
    assert_eq!(once.dimension, 2);
}

#[tokio::test]
async fn initialize_resets_dimension() {
    let index = two_dimensional_index().await;
    index.initialize(4).await.expect("should reinitialize");
    assert_eq!(
        index.stats().await,
        IndexStats {
            total_vectors: 0,
            dimension: 4
        }
    );
    assert!(index.initialize(0).await.is_err());
    assert_eq!(index.stats().await.dimension, 4);
}

#[tokio::test]
async fn snapshot_restore_reproduces_search_results() {
    let temp = TempDir::new().expect("should create temp dir");
    let path = temp.path().join("vector_index");

    let original = two_dimensional_index().await;
    assert!(original.snapshot(&path).await);
    assert!(SimilarityIndex::exists(&path));

    let restored = SimilarityIndex::new(2).expect("should create index");
    assert!(restored.restore(&path).await);
    assert_eq!(restored.stats().await, original.stats().await);

    let query = [0.4, 0.3];
    assert_eq!(
        restored.search(&query, 3).await.expect("search"),
        original.search(&query, 3).await.expect("search")
    );
}

#[tokio::test]
async fn restore_of_missing_snapshot_leaves_index_untouched() {
    let temp = TempDir::new().expect("should create temp dir");
    let index = two_dimensional_index().await;

    assert!(!index.restore(&temp.path().join("nothing_here")).await);
    assert_eq!(index.stats().await.total_vectors, 3);
}

#[tokio::test]
async fn restore_of_corrupt_snapshot_leaves_index_untouched() {
    let temp = TempDir::new().expect("should create temp dir");
    let path = temp.path().join("vector_index");

    let source = two_dimensional_index().await;
    assert!(source.snapshot(&path).await);
    std::fs::write(&path, b"\x00\x01 truncated").expect("should corrupt vectors");

    let index = SimilarityIndex::new(2).expect("should create index");
    index
        .add(vec![vec![7.0, 7.0]], vec![record(9, 90)])
        .await
        .expect("should add vectors");

    assert!(!index.restore(&path).await);
    assert_eq!(index.chunk_ids().await, vec![9]);
}

#[tokio::test]
async fn snapshot_to_unwritable_location_returns_false() {
    let temp = TempDir::new().expect("should create temp dir");
    let blocker = temp.path().join("file");
    std::fs::write(&blocker, b"not a directory").expect("should write blocker");

    let index = two_dimensional_index().await;
    assert!(!index.snapshot(&blocker.join("vector_index")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_snapshots_keep_latest_consistent_state() {
    let temp = TempDir::new().expect("should create temp dir");
    let path = temp.path().join("vector_index");
    let index = Arc::new(SimilarityIndex::new(2).expect("should create index"));

    let writers: Vec<_> = (0..8_i64)
        .map(|id| {
            let index = Arc::clone(&index);
            let path = path.clone();
            tokio::spawn(async move {
                index
                    .add(vec![vec![id as f32, 1.0]], vec![record(id, id)])
                    .await
                    .expect("should add vectors");
                assert!(index.snapshot(&path).await);
            })
        })
        .collect();
    for writer in writers {
        writer.await.expect("writer should finish");
    }

    // Every add happened before its own snapshot, so the last snapshot holds all of them
    let restored = SimilarityIndex::new(2).expect("should create index");
    assert!(restored.restore(&path).await);
    assert_eq!(restored.stats().await, index.stats().await);
    assert_eq!(restored.chunk_ids().await.len(), 8);
}

#[tokio::test]
async fn normalization_ranks_by_direction() {
    let index = SimilarityIndex::new(2)
        .expect("should create index")
        .with_normalization(true);
    index
        .add(
            vec![vec![10.0, 0.0], vec![0.5, 0.5]],
            vec![record(1, 1), record(2, 1)],
        )
        .await
        .expect("should add vectors");

    // Closer in L2 to the second vector, but pointing the same way as the first
    let hits = index.search(&[0.9, 0.0], 2).await.expect("search");
    assert_eq!(hits[0].chunk.chunk_id, 1);
    assert!(hits[0].distance.abs() < 1e-6);
}
