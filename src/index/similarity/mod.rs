#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{ChunkRecord, FlatIndex, IndexError, IndexStats, SearchHit, normalize, snapshot};

/// Process-wide similarity index shared by the indexer, rebuilder and retrieval.
///
/// Readers clone the current [`FlatIndex`] out of the lock and search it without
/// holding the lock. Writers hold the write lock for the whole mutation and swap
/// in a new structure, so a reader always sees either the state before or after a
/// write, never a partial one. Snapshot and restore are serialized against each
/// other so the files on disk always come from a single capture, and the newest
/// capture is the last one written.
#[derive(Debug)]
pub struct SimilarityIndex {
    inner: RwLock<Arc<FlatIndex>>,
    snapshot_guard: Mutex<()>,
    normalize: bool,
}

impl SimilarityIndex {
    /// Create an empty index for vectors of `dimension` components
    #[inline]
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        Ok(Self {
            inner: RwLock::new(Arc::new(FlatIndex::new(dimension)?)),
            snapshot_guard: Mutex::new(()),
            normalize: false,
        })
    }

    /// Scale every stored vector and query to unit length, making squared L2
    /// ranking equivalent to cosine ranking
    #[inline]
    #[must_use]
    pub fn with_normalization(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Reset to an empty structure of the given dimension, dropping all entries
    #[inline]
    pub async fn initialize(&self, dimension: usize) -> Result<(), IndexError> {
        let fresh = FlatIndex::new(dimension)?;
        let mut guard = self.inner.write().await;
        *guard = Arc::new(fresh);
        info!("Initialized empty similarity index (dimension {})", dimension);
        Ok(())
    }

    /// Append vectors and their records. On error nothing is appended.
    #[inline]
    pub async fn add(
        &self,
        mut vectors: Vec<Vec<f32>>,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), IndexError> {
        if vectors.is_empty() && chunks.is_empty() {
            return Ok(());
        }

        if self.normalize {
            for vector in &mut vectors {
                normalize(vector);
            }
        }

        let mut guard = self.inner.write().await;
        guard.validate_batch(&vectors, &chunks)?;

        let added = chunks.len();
        Arc::make_mut(&mut *guard).add(&vectors, chunks)?;
        debug!("Added {} vectors, index now holds {}", added, guard.len());
        Ok(())
    }

    /// Remove every entry owned by `document_id`, returning how many were removed
    #[inline]
    pub async fn remove_by_document(&self, document_id: i64) -> usize {
        self.remove_documents(&[document_id]).await
    }

    /// Remove every entry owned by any of `document_ids` with a single rebuild.
    ///
    /// When nothing matches the live structure is left as it is.
    #[inline]
    pub async fn remove_documents(&self, document_ids: &[i64]) -> usize {
        let mut guard = self.inner.write().await;

        match guard.without_documents(document_ids) {
            Some((rebuilt, removed)) => {
                *guard = Arc::new(rebuilt);
                info!(
                    "Removed {} vectors for documents {:?}, {} remain",
                    removed,
                    document_ids,
                    guard.len()
                );
                removed
            }
            None => {
                debug!("No vectors held for documents {:?}", document_ids);
                0
            }
        }
    }

    /// The `k` nearest stored chunks to `query`, closest first
    #[inline]
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let current = self.current().await;

        if self.normalize && !current.is_empty() {
            let mut query = query.to_vec();
            normalize(&mut query);
            return current.search(&query, k);
        }

        current.search(query, k)
    }

    /// Drop all entries, keeping the dimension
    #[inline]
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        if guard.is_empty() {
            return;
        }
        let dimension = guard.dimension();
        Arc::make_mut(&mut *guard).clear();
        info!("Cleared similarity index (dimension {})", dimension);
    }

    #[inline]
    pub async fn stats(&self) -> IndexStats {
        let current = self.current().await;
        IndexStats {
            total_vectors: current.len(),
            dimension: current.dimension(),
        }
    }

    /// The structure readers currently see
    #[inline]
    pub async fn current(&self) -> Arc<FlatIndex> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Chunk ids of every stored entry, in insertion order
    #[inline]
    pub async fn chunk_ids(&self) -> Vec<i64> {
        self.current()
            .await
            .chunks()
            .iter()
            .map(|chunk| chunk.chunk_id)
            .collect()
    }

    /// Distinct document ids that own at least one entry
    #[inline]
    pub async fn document_ids(&self) -> BTreeSet<i64> {
        self.current()
            .await
            .chunks()
            .iter()
            .map(|chunk| chunk.document_id)
            .collect()
    }

    /// Write the current contents to `path` (and its `.meta` companion).
    ///
    /// Failures are logged and reported as `false`.
    #[inline]
    pub async fn snapshot(&self, path: &Path) -> bool {
        let _snapshot = self.snapshot_guard.lock().await;
        let current = self.current().await;
        let target = path.to_path_buf();
        let total = current.len();

        let outcome =
            tokio::task::spawn_blocking(move || snapshot::write(&current, &target)).await;

        match outcome {
            Ok(Ok(())) => {
                info!("Saved snapshot of {} vectors to {}", total, path.display());
                true
            }
            Ok(Err(e)) => {
                error!("Failed to save index snapshot to {}: {}", path.display(), e);
                false
            }
            Err(e) => {
                error!("Snapshot task failed for {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Replace the contents with the snapshot at `path`.
    ///
    /// A missing, unreadable or inconsistent snapshot leaves the index as it was and
    /// returns `false`.
    #[inline]
    pub async fn restore(&self, path: &Path) -> bool {
        let _snapshot = self.snapshot_guard.lock().await;
        let source: PathBuf = path.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || snapshot::read(&source)).await;

        let restored = match outcome {
            Ok(Ok(restored)) => restored,
            Ok(Err(snapshot::PersistenceError::Missing(missing))) => {
                warn!("No index snapshot at {}", missing.display());
                return false;
            }
            Ok(Err(e)) => {
                error!("Failed to restore index snapshot from {}: {}", path.display(), e);
                return false;
            }
            Err(e) => {
                error!("Restore task failed for {}: {}", path.display(), e);
                return false;
            }
        };

        let total = restored.len();
        let dimension = restored.dimension();
        let mut guard = self.inner.write().await;
        *guard = Arc::new(restored);

        info!(
            "Restored {} vectors (dimension {}) from {}",
            total,
            dimension,
            path.display()
        );
        true
    }

    /// Whether a complete snapshot is present at `path`
    #[inline]
    pub fn exists(path: &Path) -> bool {
        snapshot::exists(path)
    }
}
