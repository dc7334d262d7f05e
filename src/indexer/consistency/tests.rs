use super::*;
use crate::database::models::NewDocument;
use crate::embeddings::EmbeddingError;
use crate::embeddings::chunking::TextChunk;
use crate::index::ChunkMetadata;
use async_trait::async_trait;
use tempfile::TempDir;

struct LengthEmbedder;

#[async_trait]
impl EmbeddingProvider for LengthEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| vec![t.len() as f32, 0.5]).collect())
    }
}

struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Provider("connection refused".to_string()))
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

async fn store_with_document(texts: &[&str]) -> (TempDir, Database, Vec<ChunkRecord>) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should create database");
    let (_, records) = database
        .create_document(NewDocument::new("notes.txt", "Notes"), &text_chunks(texts))
        .await
        .expect("should store document");
    (temp_dir, database, records)
}

async fn index_records(index: &SimilarityIndex, records: Vec<ChunkRecord>) {
    let vectors = records
        .iter()
        .map(|r| vec![r.content.len() as f32, 0.5])
        .collect();
    index.add(vectors, records).await.expect("should add records");
}

fn orphan(chunk_id: i64, document_id: i64) -> ChunkRecord {
    ChunkRecord {
        chunk_id,
        document_id,
        chunk_index: 0,
        content: "deleted text".to_string(),
        metadata: ChunkMetadata::default(),
    }
}

#[test]
fn consistency_report_summary_formats_correctly() {
    let inconsistent_report = ConsistencyReport {
        store_chunks: 150,
        index_entries: 140,
        missing_in_index: vec![1, 2, 3],
        orphaned_in_index: vec![9],
        duplicated_in_index: vec![],
        inconsistent_documents: vec![DocumentConsistencyIssue {
            document_id: 1,
            store_chunks: 10,
            index_entries: 8,
            missing_in_index: vec![1],
            ..DocumentConsistencyIssue::default()
        }],
        is_consistent: false,
    };

    let summary = inconsistent_report.summary();
    assert!(summary.contains("3 missing in index"));
    assert!(summary.contains("1 orphaned in index"));
    assert!(summary.contains("1 documents with issues"));
    assert_eq!(inconsistent_report.total_issues(), 4);

    let consistent_report = ConsistencyReport {
        store_chunks: 100,
        index_entries: 100,
        is_consistent: true,
        ..ConsistencyReport::default()
    };

    let summary = consistent_report.summary();
    assert!(summary.contains("Index is consistent"));
    assert!(summary.contains("100 chunks in store"));
    assert_eq!(consistent_report.total_issues(), 0);
}

#[test]
fn compare_groups_issues_by_document() {
    let stored = vec![(1, 10), (2, 10), (3, 20)];
    let indexed = vec![(1, 10), (1, 10), (3, 20), (7, 30)];

    let report = compare(&stored, &indexed);

    assert!(!report.is_consistent);
    assert_eq!(report.missing_in_index, vec![2]);
    assert_eq!(report.orphaned_in_index, vec![7]);
    assert_eq!(report.duplicated_in_index, vec![1]);

    let ids: Vec<i64> = report
        .inconsistent_documents
        .iter()
        .map(|issue| issue.document_id)
        .collect();
    assert_eq!(ids, vec![10, 30]);

    let first = &report.inconsistent_documents[0];
    assert_eq!(first.store_chunks, 2);
    assert_eq!(first.index_entries, 2);
    assert_eq!(first.missing_in_index, vec![2]);
    assert_eq!(first.duplicated_in_index, vec![1]);
}

#[tokio::test]
async fn fully_indexed_store_is_consistent() {
    let (_temp_dir, database, records) = store_with_document(&["alpha", "beta"]).await;
    let index = SimilarityIndex::new(2).expect("should create index");
    index_records(&index, records).await;

    let report = ConsistencyValidator::new(&database, &index, &LengthEmbedder)
        .validate_consistency()
        .await
        .expect("should validate");

    assert!(report.is_consistent);
    assert_eq!(report.store_chunks, 2);
    assert_eq!(report.index_entries, 2);
}

#[tokio::test]
async fn detects_and_repairs_missing_chunks() {
    let (_temp_dir, database, records) = store_with_document(&["alpha", "beta", "gamma"]).await;
    let missing_id = records[2].chunk_id;
    let index = SimilarityIndex::new(2).expect("should create index");
    index_records(&index, records[..2].to_vec()).await;

    let validator = ConsistencyValidator::new(&database, &index, &LengthEmbedder);
    let report = validator.validate_consistency().await.expect("should validate");

    assert_eq!(report.missing_in_index, vec![missing_id]);
    assert_eq!(report.inconsistent_documents.len(), 1);

    let repaired = validator.repair(&report).await.expect("should repair");
    assert_eq!(repaired.removed, 0);
    assert_eq!(repaired.regenerated, 1);

    let after = validator.validate_consistency().await.expect("should validate");
    assert!(after.is_consistent);
    assert_eq!(index.stats().await.total_vectors, 3);
}

#[tokio::test]
async fn repair_drops_orphans_and_duplicates() {
    let (_temp_dir, database, records) = store_with_document(&["alpha", "beta"]).await;
    let index = SimilarityIndex::new(2).expect("should create index");
    index_records(&index, records.clone()).await;
    index_records(&index, records[..1].to_vec()).await;
    index_records(&index, vec![orphan(999, 77)]).await;

    let validator = ConsistencyValidator::new(&database, &index, &LengthEmbedder);
    let report = validator.validate_consistency().await.expect("should validate");

    assert_eq!(report.orphaned_in_index, vec![999]);
    assert_eq!(report.duplicated_in_index, vec![records[0].chunk_id]);

    let repaired = validator.repair(&report).await.expect("should repair");
    assert_eq!(repaired.removed, 4);
    assert_eq!(repaired.regenerated, 2);

    let after = validator.validate_consistency().await.expect("should validate");
    assert!(after.is_consistent, "{}", after.summary());
    assert!(!index.document_ids().await.contains(&77));
}

#[tokio::test]
async fn regeneration_failure_is_skipped() {
    let (_temp_dir, database, records) = store_with_document(&["alpha", "beta"]).await;
    let index = SimilarityIndex::new(2).expect("should create index");

    let ids: Vec<i64> = records.iter().map(|r| r.chunk_id).collect();
    let regenerated = ConsistencyValidator::new(&database, &index, &BrokenEmbedder)
        .with_batch_size(1)
        .regenerate_missing_entries(&ids)
        .await
        .expect("should not raise on provider failure");

    assert_eq!(regenerated, 0);
    assert_eq!(index.stats().await.total_vectors, 0);
}
