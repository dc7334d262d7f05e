// Index rebuild
// Reconstructs the similarity index from the chunk store after a cold start

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::database::ChunkStore;
use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::index::{ChunkRecord, SimilarityIndex};

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one rebuild pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub batches_total: usize,
    pub batches_failed: usize,
    /// Chunk rows read from the store
    pub chunks_seen: usize,
    /// Chunks whose vectors made it into the index
    pub chunks_indexed: usize,
    /// Store rows that could not be read and were skipped
    pub rows_skipped: usize,
    /// The shutdown signal stopped the rebuild at a batch boundary
    pub cancelled: bool,
    /// Index size once the rebuild finished
    pub total_vectors: usize,
}

impl RebuildReport {
    /// A full attempt that left the index without any vectors
    #[inline]
    pub fn is_degraded(&self) -> bool {
        !self.cancelled && self.total_vectors == 0
    }

    #[inline]
    pub fn summary(&self) -> String {
        format!(
            "{} of {} chunks indexed in {} batches ({} failed, {} rows skipped){}",
            self.chunks_indexed,
            self.chunks_seen,
            self.batches_total,
            self.batches_failed,
            self.rows_skipped,
            if self.cancelled { ", cancelled" } else { "" }
        )
    }
}

/// Streams every stored chunk through the embedding provider into the index
pub struct IndexRebuilder {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<SimilarityIndex>,
    batch_size: usize,
    embed_timeout: Duration,
}

impl IndexRebuilder {
    #[inline]
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<SimilarityIndex>,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
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

    /// Embed and insert every chunk in the store.
    ///
    /// The index is expected to be empty; entries already present are not
    /// deduplicated. A batch that fails to embed or insert is logged and skipped.
    /// `shutdown` is checked before each batch; once it reads `true` the rebuild
    /// stops and leaves whatever was already inserted.
    #[inline]
    pub async fn rebuild_from_source(&self, shutdown: &watch::Receiver<bool>) -> RebuildReport {
        info!(
            "Rebuilding similarity index from chunk store (batch size {})",
            self.batch_size
        );

        let mut report = RebuildReport::default();
        let mut stream = self.store.list_all_chunks();
        let mut batch: Vec<ChunkRecord> = Vec::with_capacity(self.batch_size);
        let mut exhausted = false;

        while !exhausted {
            while batch.len() < self.batch_size {
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        report.chunks_seen += 1;
                        batch.push(chunk);
                    }
                    Some(Err(e)) => {
                        report.rows_skipped += 1;
                        warn!("Skipping unreadable chunk row: {:#}", e);
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }

            if batch.is_empty() {
                break;
            }

            let stop = *shutdown.borrow();
            if stop {
                info!(
                    "Shutdown requested, stopping rebuild before batch {}",
                    report.batches_total + 1
                );
                report.cancelled = true;
                break;
            }

            report.batches_total += 1;
            let size = batch.len();
            let pending = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));

            match embed_and_add(
                self.embedder.as_ref(),
                &self.index,
                pending,
                self.embed_timeout,
            )
            .await
            {
                Ok(added) => {
                    report.chunks_indexed += added;
                    debug!(
                        "Rebuild batch {} added {} vectors",
                        report.batches_total, added
                    );
                }
                Err(e) => {
                    report.batches_failed += 1;
                    error!(
                        "Rebuild batch {} ({} chunks) failed and was skipped: {}",
                        report.batches_total, size, e
                    );
                }
            }
        }

        report.total_vectors = self.index.stats().await.total_vectors;

        if report.is_degraded() {
            error!(
                "CRITICAL: similarity index is empty after rebuild ({}); queries will find no context",
                report.summary()
            );
        } else {
            info!(
                "Rebuild finished: {}; index holds {} vectors",
                report.summary(),
                report.total_vectors
            );
        }

        report
    }
}

/// Embed one batch of chunks and add the vectors to `index`.
///
/// Nothing is added unless the provider answers in time with one vector per
/// chunk and every vector has the index dimension.
pub(crate) async fn embed_and_add(
    embedder: &dyn EmbeddingProvider,
    index: &SimilarityIndex,
    chunks: Vec<ChunkRecord>,
    embed_timeout: Duration,
) -> crate::Result<usize> {
    if chunks.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();

    let vectors = tokio::time::timeout(embed_timeout, embedder.embed(&texts))
        .await
        .map_err(|_| EmbeddingError::Timeout(embed_timeout))??;

    if vectors.len() != chunks.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: chunks.len(),
            actual: vectors.len(),
        }
        .into());
    }

    let added = chunks.len();
    index.add(vectors, chunks).await?;
    Ok(added)
}
