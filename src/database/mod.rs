// Database module
// SQLite is the source of truth for documents and chunk text; the similarity index is derived from it

pub mod sqlite;

pub use sqlite::*;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::index::ChunkRecord;

/// Read-only view of stored chunks used to (re)build the similarity index
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Every chunk, ordered by document id then chunk index
    fn list_all_chunks(&self) -> BoxStream<'_, anyhow::Result<ChunkRecord>>;

    /// Chunks of one document, ordered by chunk index
    async fn list_chunks_for_document(&self, document_id: i64) -> anyhow::Result<Vec<ChunkRecord>>;

    async fn count_chunks(&self) -> anyhow::Result<usize>;
}

#[async_trait]
impl ChunkStore for Database {
    #[inline]
    fn list_all_chunks(&self) -> BoxStream<'_, anyhow::Result<ChunkRecord>> {
        self.stream_chunks()
    }

    #[inline]
    async fn list_chunks_for_document(&self, document_id: i64) -> anyhow::Result<Vec<ChunkRecord>> {
        self.get_chunks_for_document(document_id).await
    }

    #[inline]
    async fn count_chunks(&self) -> anyhow::Result<usize> {
        let count = queries::ChunkQueries::count_all(self.pool()).await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
