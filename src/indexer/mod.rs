// Indexer module
// Coordinates the chunk store, the embedding provider and the similarity index

pub mod consistency;
pub mod rebuild;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::RagError;
use crate::config::Config;
use crate::database::models::{Document, NewDocument, StoreStats};
use crate::database::{ChunkStore, Database};
use crate::embeddings::chunking::{ChunkingConfig, chunk_text};
use crate::embeddings::{EmbeddingProvider, OllamaClient};
use crate::index::{IndexStats, SimilarityIndex};

pub use consistency::{
    ConsistencyReport, ConsistencyValidator, DocumentConsistencyIssue, RepairReport,
};
pub use rebuild::{IndexRebuilder, RebuildReport};

/// Owns the components that keep the similarity index in step with the store
pub struct Indexer {
    database: Database,
    index: Arc<SimilarityIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    batch_size: usize,
    embed_timeout: Duration,
    snapshot_path: PathBuf,
    dimension: usize,
}

/// How the index was populated at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmUpOutcome {
    Restored { vectors: usize },
    Rebuilt(RebuildReport),
}

impl WarmUpOutcome {
    #[inline]
    pub fn is_degraded(&self) -> bool {
        match self {
            Self::Restored { vectors } => *vectors == 0,
            Self::Rebuilt(report) => report.is_degraded(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document: Document,
    pub chunks_indexed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerStatus {
    pub store: StoreStats,
    pub index: IndexStats,
    pub snapshot_present: bool,
}

impl Indexer {
    #[inline]
    pub fn new(
        config: &Config,
        database: Database,
        index: Arc<SimilarityIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            database,
            index,
            embedder,
            chunking: config.chunking.clone(),
            batch_size: config.index.rebuild_batch_size.max(1),
            embed_timeout: Duration::from_secs(config.index.embed_timeout_secs),
            snapshot_path: config.snapshot_path(),
            dimension: config.ollama.embedding_dimension,
        }
    }

    /// Open the database under the base directory and connect to Ollama for embeddings
    #[inline]
    pub async fn open(config: &Config) -> crate::Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .context("Failed to initialize SQLite database")?;

        let index = SimilarityIndex::new(config.ollama.embedding_dimension)?
            .with_normalization(config.index.normalize);

        let embedder =
            OllamaClient::new(config).context("Failed to initialize Ollama client")?;

        Ok(Self::new(
            config,
            database,
            Arc::new(index),
            Arc::new(embedder),
        ))
    }

    #[inline]
    pub fn index(&self) -> &Arc<SimilarityIndex> {
        &self.index
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    #[inline]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    #[inline]
    pub fn rebuilder(&self) -> IndexRebuilder {
        IndexRebuilder::new(
            Arc::new(self.database.clone()),
            Arc::clone(&self.embedder),
            Arc::clone(&self.index),
        )
        .with_batch_size(self.batch_size)
        .with_embed_timeout(self.embed_timeout)
    }

    #[inline]
    pub fn validator(&self) -> ConsistencyValidator<'_> {
        ConsistencyValidator::new(&self.database, &self.index, self.embedder.as_ref())
            .with_batch_size(self.batch_size)
            .with_embed_timeout(self.embed_timeout)
    }

    /// Startup sequence: restore the snapshot if one exists, otherwise (or when it
    /// is empty or stale) rebuild from the store and save a fresh snapshot.
    #[inline]
    pub async fn warm_up(&self, shutdown: &watch::Receiver<bool>) -> crate::Result<WarmUpOutcome> {
        if SimilarityIndex::exists(&self.snapshot_path)
            && self.index.restore(&self.snapshot_path).await
        {
            let stats = self.index.stats().await;
            let stored = self.database.count_chunks().await?;

            if stats.dimension != self.dimension {
                warn!(
                    "Snapshot dimension {} does not match configured dimension {}, rebuilding",
                    stats.dimension, self.dimension
                );
                self.index.initialize(self.dimension).await?;
            } else if stats.total_vectors != stored {
                warn!(
                    "Snapshot holds {} vectors but the store has {} chunks, rebuilding",
                    stats.total_vectors, stored
                );
                self.index.clear().await;
            } else if stats.total_vectors > 0 {
                info!("Index ready with {} vectors from snapshot", stats.total_vectors);
                return Ok(WarmUpOutcome::Restored {
                    vectors: stats.total_vectors,
                });
            }
        }

        // The rebuilder appends without deduplicating
        let leftover = self.index.stats().await.total_vectors;
        if leftover > 0 {
            debug!("Dropping {} in-memory vectors before rebuild", leftover);
            self.index.initialize(self.dimension).await?;
        }

        let report = self.rebuilder().rebuild_from_source(shutdown).await;
        if !report.cancelled && report.total_vectors > 0 {
            self.save_snapshot().await;
        }

        Ok(WarmUpOutcome::Rebuilt(report))
    }

    /// Drop the current contents and rebuild everything from the store
    #[inline]
    pub async fn rebuild(&self, shutdown: &watch::Receiver<bool>) -> crate::Result<RebuildReport> {
        self.index.initialize(self.dimension).await?;

        let report = self.rebuilder().rebuild_from_source(shutdown).await;
        if !report.cancelled {
            self.save_snapshot().await;
        }

        Ok(report)
    }

    /// Chunk `text`, store the document with its chunks and add their vectors to the index.
    ///
    /// If embedding fails the document stays stored, its partial entries are dropped
    /// from the index and the error is returned; a later rebuild or repair indexes it.
    #[inline]
    pub async fn ingest_document(
        &self,
        document: NewDocument,
        text: &str,
    ) -> crate::Result<IngestReport> {
        let chunks = chunk_text(text, &self.chunking);
        if chunks.is_empty() {
            return Err(RagError::Other(anyhow::anyhow!(
                "Document '{}' has no text to index",
                document.filename
            )));
        }

        let (document, records) = self.database.create_document(document, &chunks).await?;
        info!(
            "Stored document {} ({}) with {} chunks",
            document.id,
            document.filename,
            records.len()
        );

        let mut chunks_indexed = 0;
        let mut remaining = records.into_iter().peekable();

        while remaining.peek().is_some() {
            let batch: Vec<_> = remaining.by_ref().take(self.batch_size).collect();

            match rebuild::embed_and_add(
                self.embedder.as_ref(),
                &self.index,
                batch,
                self.embed_timeout,
            )
            .await
            {
                Ok(added) => chunks_indexed += added,
                Err(e) => {
                    error!(
                        "Failed to index document {}, it stays stored for a later rebuild: {}",
                        document.id, e
                    );
                    self.index.remove_by_document(document.id).await;
                    return Err(e);
                }
            }
        }

        self.save_snapshot().await;

        Ok(IngestReport {
            document,
            chunks_indexed,
        })
    }

    /// Delete a document from the store and its entries from the index.
    ///
    /// Returns whether the document existed.
    #[inline]
    pub async fn delete_document(&self, document_id: i64) -> crate::Result<bool> {
        let existed = self.database.delete_document(document_id).await?;
        let removed = self.index.remove_by_document(document_id).await;

        if removed > 0 {
            self.save_snapshot().await;
        }

        if existed {
            info!("Deleted document {} ({} vectors)", document_id, removed);
        } else {
            warn!("Document {} not found", document_id);
        }

        Ok(existed)
    }

    #[inline]
    pub async fn save_snapshot(&self) -> bool {
        self.index.snapshot(&self.snapshot_path).await
    }

    #[inline]
    pub async fn validate_consistency(&self) -> crate::Result<ConsistencyReport> {
        Ok(self.validator().validate_consistency().await?)
    }

    /// Validate, repair what was found and save a snapshot if anything changed
    #[inline]
    pub async fn repair(&self) -> crate::Result<(ConsistencyReport, RepairReport)> {
        let report = self.validate_consistency().await?;
        if report.is_consistent {
            info!("Index is consistent, no repair needed");
            return Ok((report, RepairReport::default()));
        }

        let repaired = self.validator().repair(&report).await?;
        if repaired.removed > 0 || repaired.regenerated > 0 {
            self.save_snapshot().await;
        }

        Ok((report, repaired))
    }

    #[inline]
    pub async fn status(&self) -> crate::Result<IndexerStatus> {
        Ok(IndexerStatus {
            store: self.database.stats().await?,
            index: self.index.stats().await,
            snapshot_present: SimilarityIndex::exists(&self.snapshot_path),
        })
    }
}
