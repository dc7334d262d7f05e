use anyhow::{Context, Result};
use futures::stream::BoxStream;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{Document, NewDocument, StoreStats};
use crate::database::sqlite::queries::{ChunkQueries, DocumentQueries};
use crate::embeddings::chunking::TextChunk;
use crate::index::ChunkRecord;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("metadata.db");

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(&db_path).await
    }

    // Document operations
    #[inline]
    pub async fn create_document(
        &self,
        document: NewDocument,
        chunks: &[TextChunk],
    ) -> Result<(Document, Vec<ChunkRecord>)> {
        DocumentQueries::create_with_chunks(&self.pool, document, chunks).await
    }

    #[inline]
    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        DocumentQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn delete_document(&self, id: i64) -> Result<bool> {
        DocumentQueries::delete(&self.pool, id).await
    }

    // Chunk operations
    #[inline]
    pub fn stream_chunks(&self) -> BoxStream<'_, Result<ChunkRecord>> {
        ChunkQueries::stream_all(&self.pool)
    }

    #[inline]
    pub async fn get_chunks_for_document(&self, document_id: i64) -> Result<Vec<ChunkRecord>> {
        ChunkQueries::list_for_document(&self.pool, document_id).await
    }

    #[inline]
    pub async fn get_chunks_by_ids(&self, chunk_ids: &[i64]) -> Result<Vec<ChunkRecord>> {
        ChunkQueries::get_by_ids(&self.pool, chunk_ids).await
    }

    #[inline]
    pub async fn list_chunk_ids(&self) -> Result<Vec<(i64, i64)>> {
        ChunkQueries::list_ids(&self.pool).await
    }

    #[inline]
    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            documents: DocumentQueries::count(&self.pool).await?,
            chunks: ChunkQueries::count_all(&self.pool).await?,
        })
    }
}
