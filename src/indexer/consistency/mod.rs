// Consistency validation
// Compares chunk ids in the SQLite store with the entries held by the similarity index

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::database::Database;
use crate::embeddings::EmbeddingProvider;
use crate::index::{ChunkRecord, SimilarityIndex};
use crate::indexer::rebuild::{DEFAULT_BATCH_SIZE, DEFAULT_EMBED_TIMEOUT, embed_and_add};

/// Consistency check results between the chunk store and the similarity index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of chunks in the store
    pub store_chunks: usize,
    /// Number of entries in the index
    pub index_entries: usize,
    /// Chunk ids stored but not indexed
    pub missing_in_index: Vec<i64>,
    /// Chunk ids indexed but no longer stored
    pub orphaned_in_index: Vec<i64>,
    /// Chunk ids indexed more than once
    pub duplicated_in_index: Vec<i64>,
    pub inconsistent_documents: Vec<DocumentConsistencyIssue>,
    pub is_consistent: bool,
}

/// Consistency issue for a single document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentConsistencyIssue {
    pub document_id: i64,
    pub store_chunks: usize,
    pub index_entries: usize,
    pub missing_in_index: Vec<i64>,
    pub orphaned_in_index: Vec<i64>,
    pub duplicated_in_index: Vec<i64>,
}

impl DocumentConsistencyIssue {
    fn has_issues(&self) -> bool {
        !self.missing_in_index.is_empty()
            || !self.orphaned_in_index.is_empty()
            || !self.duplicated_in_index.is_empty()
    }

    /// Entries of this document must be dropped before it can be re-embedded
    fn needs_removal(&self) -> bool {
        !self.orphaned_in_index.is_empty() || !self.duplicated_in_index.is_empty()
    }
}

/// What a repair pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Index entries dropped
    pub removed: usize,
    /// Chunks embedded and added back
    pub regenerated: usize,
}

impl ConsistencyReport {
    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} chunks in store, {} entries in index",
                self.store_chunks, self.index_entries
            )
        } else {
            format!(
                "Index inconsistencies found: {} missing in index, {} orphaned in index, {} duplicated in index, {} documents with issues",
                self.missing_in_index.len(),
                self.orphaned_in_index.len(),
                self.duplicated_in_index.len(),
                self.inconsistent_documents.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_in_index.len() + self.orphaned_in_index.len() + self.duplicated_in_index.len()
    }
}

/// Performs consistency validation between the chunk store and the similarity index
pub struct ConsistencyValidator<'a> {
    database: &'a Database,
    index: &'a SimilarityIndex,
    embedder: &'a dyn EmbeddingProvider,
    batch_size: usize,
    embed_timeout: Duration,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(
        database: &'a Database,
        index: &'a SimilarityIndex,
        embedder: &'a dyn EmbeddingProvider,
    ) -> Self {
        Self {
            database,
            index,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Perform a full consistency check between the store and the index
    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!("Starting index consistency validation");

        let stored = self.database.list_chunk_ids().await?;
        debug!("Found {} chunks in store", stored.len());

        let current = self.index.current().await;
        let indexed: Vec<(i64, i64)> = current
            .chunks()
            .iter()
            .map(|chunk| (chunk.chunk_id, chunk.document_id))
            .collect();
        debug!("Found {} entries in index", indexed.len());

        let report = compare(&stored, &indexed);

        if report.is_consistent {
            info!("Index consistency validation passed");
        } else {
            warn!("Index consistency validation found issues");
            log_consistency_issues(&report);
        }

        Ok(report)
    }

    /// Drop every index entry of documents holding orphaned or duplicated entries.
    ///
    /// Returns the number of entries removed.
    #[inline]
    pub async fn cleanup_orphaned_entries(&self, report: &ConsistencyReport) -> usize {
        let documents: Vec<i64> = report
            .inconsistent_documents
            .iter()
            .filter(|issue| issue.needs_removal())
            .map(|issue| issue.document_id)
            .collect();

        if documents.is_empty() {
            return 0;
        }

        info!(
            "Removing index entries of {} inconsistent documents",
            documents.len()
        );
        let removed = self.index.remove_documents(&documents).await;
        info!("Removed {} index entries", removed);
        removed
    }

    /// Embed the stored chunks with the given ids and add them to the index.
    ///
    /// Batches that fail are logged and skipped. Returns the number of chunks added.
    #[inline]
    pub async fn regenerate_missing_entries(&self, chunk_ids: &[i64]) -> Result<usize> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        info!("Regenerating {} missing index entries", chunk_ids.len());
        let chunks = self.database.get_chunks_by_ids(chunk_ids).await?;
        if chunks.len() < chunk_ids.len() {
            warn!(
                "{} chunks to regenerate are no longer stored",
                chunk_ids.len() - chunks.len()
            );
        }

        Ok(self.embed_in_batches(chunks).await)
    }

    /// Bring the index back in line with the store.
    ///
    /// Documents with orphaned or duplicated entries are removed from the index in one
    /// rebuild and their stored chunks are embedded again, together with every chunk
    /// reported missing.
    #[inline]
    pub async fn repair(&self, report: &ConsistencyReport) -> Result<RepairReport> {
        if report.is_consistent {
            return Ok(RepairReport::default());
        }

        let removed = self.cleanup_orphaned_entries(report).await;

        let mut pending: Vec<ChunkRecord> = Vec::new();
        let mut seen: BTreeSet<i64> = BTreeSet::new();

        for issue in report
            .inconsistent_documents
            .iter()
            .filter(|issue| issue.needs_removal())
        {
            for chunk in self.database.get_chunks_for_document(issue.document_id).await? {
                if seen.insert(chunk.chunk_id) {
                    pending.push(chunk);
                }
            }
        }

        let remaining: Vec<i64> = report
            .missing_in_index
            .iter()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();
        if !remaining.is_empty() {
            pending.extend(self.database.get_chunks_by_ids(&remaining).await?);
        }

        let regenerated = self.embed_in_batches(pending).await;

        info!(
            "Repair finished: {} entries removed, {} chunks regenerated",
            removed, regenerated
        );
        Ok(RepairReport {
            removed,
            regenerated,
        })
    }

    async fn embed_in_batches(&self, chunks: Vec<ChunkRecord>) -> usize {
        let mut added = 0;
        let mut remaining = chunks.into_iter().peekable();

        while remaining.peek().is_some() {
            let batch: Vec<ChunkRecord> = remaining.by_ref().take(self.batch_size).collect();
            let size = batch.len();

            match embed_and_add(self.embedder, self.index, batch, self.embed_timeout).await {
                Ok(count) => added += count,
                Err(e) => error!("Failed to regenerate batch of {} chunks: {}", size, e),
            }
        }

        added
    }
}

/// Diff `(chunk_id, document_id)` pairs from the store against those in the index
fn compare(stored: &[(i64, i64)], indexed: &[(i64, i64)]) -> ConsistencyReport {
    let store_ids: BTreeMap<i64, i64> = stored.iter().copied().collect();

    let mut index_counts: BTreeMap<i64, usize> = BTreeMap::new();
    for (chunk_id, _) in indexed {
        *index_counts.entry(*chunk_id).or_default() += 1;
    }

    let mut documents: BTreeMap<i64, DocumentConsistencyIssue> = BTreeMap::new();
    let mut missing_in_index = Vec::new();

    for (chunk_id, document_id) in &store_ids {
        let issue = documents
            .entry(*document_id)
            .or_insert_with(|| DocumentConsistencyIssue {
                document_id: *document_id,
                ..DocumentConsistencyIssue::default()
            });
        issue.store_chunks += 1;

        if !index_counts.contains_key(chunk_id) {
            missing_in_index.push(*chunk_id);
            issue.missing_in_index.push(*chunk_id);
        }
    }

    let mut orphaned = BTreeSet::new();
    let mut duplicated = BTreeSet::new();

    for (chunk_id, document_id) in indexed {
        let issue = documents
            .entry(*document_id)
            .or_insert_with(|| DocumentConsistencyIssue {
                document_id: *document_id,
                ..DocumentConsistencyIssue::default()
            });
        issue.index_entries += 1;

        if !store_ids.contains_key(chunk_id) && orphaned.insert(*chunk_id) {
            issue.orphaned_in_index.push(*chunk_id);
        }

        let occurrences = index_counts.get(chunk_id).copied().unwrap_or(0);
        if occurrences > 1 && duplicated.insert(*chunk_id) {
            issue.duplicated_in_index.push(*chunk_id);
        }
    }

    let inconsistent_documents: Vec<DocumentConsistencyIssue> = documents
        .into_values()
        .filter(DocumentConsistencyIssue::has_issues)
        .collect();

    let orphaned_in_index: Vec<i64> = orphaned.into_iter().collect();
    let duplicated_in_index: Vec<i64> = duplicated.into_iter().collect();

    let is_consistent = missing_in_index.is_empty()
        && orphaned_in_index.is_empty()
        && duplicated_in_index.is_empty();

    ConsistencyReport {
        store_chunks: stored.len(),
        index_entries: indexed.len(),
        missing_in_index,
        orphaned_in_index,
        duplicated_in_index,
        inconsistent_documents,
        is_consistent,
    }
}

fn log_consistency_issues(report: &ConsistencyReport) {
    if !report.missing_in_index.is_empty() {
        warn!(
            "Found {} stored chunks missing from the index",
            report.missing_in_index.len()
        );
    }

    if !report.orphaned_in_index.is_empty() {
        warn!(
            "Found {} orphaned entries in the index",
            report.orphaned_in_index.len()
        );
    }

    if !report.duplicated_in_index.is_empty() {
        warn!(
            "Found {} chunks indexed more than once",
            report.duplicated_in_index.len()
        );
    }

    for issue in &report.inconsistent_documents {
        warn!(
            "Document {} has consistency issues: {} stored chunks, {} index entries",
            issue.document_id, issue.store_chunks, issue.index_entries
        );
    }
}
