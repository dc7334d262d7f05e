
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::SqlitePool;
use tracing::debug;

use crate::embeddings::chunking::TextChunk;
use crate::index::ChunkRecord;

const DOCUMENT_COLUMNS: &str = r#"
    SELECT id,
           filename,
           title,
           source_url,
           doc_type,
           course,
           semester,
           subject,
           uploaded_date
    FROM documents
"#;

const ALL_CHUNKS: &str = r#"
    SELECT c.id AS chunk_id,
           c.document_id,
           c.chunk_index,
           c.content,
           d.filename,
           d.source_url,
           d.doc_type,
           d.course,
           d.semester,
           d.subject
    FROM document_chunks c
    JOIN documents d ON d.id = c.document_id
    ORDER BY c.document_id, c.chunk_index
"#;

const DOCUMENT_CHUNKS: &str = r#"
    SELECT c.id AS chunk_id,
           c.document_id,
           c.chunk_index,
           c.content,
           d.filename,
           d.source_url,
           d.doc_type,
           d.course,
           d.semester,
           d.subject
    FROM document_chunks c
    JOIN documents d ON d.id = c.document_id
    WHERE c.document_id = ?
    ORDER BY c.chunk_index
"#;

pub struct DocumentQueries;

impl DocumentQueries {
    /// Insert a document and all of its chunks in one transaction
    #[inline]
    pub async fn create_with_chunks(
        pool: &SqlitePool,
        new_document: NewDocument,
        chunks: &[TextChunk],
    ) -> Result<(Document, Vec<ChunkRecord>)> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let document_id = sqlx::query(
            "INSERT INTO documents (filename, title, source_url, doc_type, course, semester, subject, uploaded_date) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new_document.filename)
        .bind(&new_document.title)
        .bind(&new_document.source_url)
        .bind(&new_document.doc_type)
        .bind(&new_document.course)
        .bind(&new_document.semester)
        .bind(&new_document.subject)
        .bind(Utc::now().naive_utc())
        .execute(&mut *tx)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        let document = sqlx::query_as::<_, Document>(&format!("{} WHERE id = ?", DOCUMENT_COLUMNS))
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to retrieve created document")?;

        let metadata = document.chunk_metadata();
        let mut records = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let chunk_id = sqlx::query(
                "INSERT INTO document_chunks (document_id, chunk_index, content) VALUES (?, ?, ?)",
            )
            .bind(document_id)
            .bind(i64::from(chunk.chunk_index))
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert chunk {}", chunk.chunk_index))?
            .last_insert_rowid();

            records.push(ChunkRecord {
                chunk_id,
                document_id,
                chunk_index: chunk.chunk_index,
                content: chunk.content.clone(),
                metadata: metadata.clone(),
            });
        }

        tx.commit().await.context("Failed to commit document")?;

        debug!(
            "Stored document {} ({}) with {} chunks",
            document.id,
            document.filename,
            records.len()
        );
        Ok((document, records))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(&format!("{} WHERE id = ?", DOCUMENT_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")?;

        Ok(document)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(&format!(
            "{} ORDER BY uploaded_date DESC, id DESC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list documents")?;

        Ok(documents)
    }

    /// Delete a document; its chunks go with it. Returns whether it existed.
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await
            .context("Failed to count documents")?;

        Ok(count)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Every chunk in the store, ordered by document then position, fetched lazily
    #[inline]
    pub fn stream_all(pool: &SqlitePool) -> BoxStream<'_, Result<ChunkRecord>> {
        sqlx::query_as::<_, ChunkRow>(ALL_CHUNKS)
            .fetch(pool)
            .map(|row| {
                let row = row.context("Failed to read chunk row")?;
                ChunkRecord::try_from(row)
            })
            .boxed()
    }

    #[inline]
    pub async fn list_for_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query_as::<_, ChunkRow>(DOCUMENT_CHUNKS)
            .bind(document_id)
            .fetch_all(pool)
            .await
            .context("Failed to list chunks for document")?;

        rows.into_iter().map(ChunkRecord::try_from).collect()
    }

    /// `(chunk_id, document_id)` for every stored chunk
    #[inline]
    pub async fn list_ids(pool: &SqlitePool) -> Result<Vec<(i64, i64)>> {
        let ids = sqlx::query_as::<_, (i64, i64)>(
            "SELECT id, document_id FROM document_chunks ORDER BY document_id, chunk_index",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list chunk ids")?;

        Ok(ids)
    }

    #[inline]
    pub async fn get_by_ids(pool: &SqlitePool, chunk_ids: &[i64]) -> Result<Vec<ChunkRecord>> {
        let mut records = Vec::with_capacity(chunk_ids.len());

        // SQLite caps bound parameters, so look ids up in slices
        for slice in chunk_ids.chunks(500) {
            let placeholders = vec!["?"; slice.len()].join(", ");
            let sql = ALL_CHUNKS.replace(
                "ORDER BY",
                &format!("WHERE c.id IN ({}) ORDER BY", placeholders),
            );

            let mut query = sqlx::query_as::<_, ChunkRow>(&sql);
            for id in slice {
                query = query.bind(*id);
            }

            let rows = query
                .fetch_all(pool)
                .await
                .context("Failed to get chunks by id")?;
            for row in rows {
                records.push(ChunkRecord::try_from(row)?);
            }
        }

        Ok(records)
    }

    #[inline]
    pub async fn count_all(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")?;

        Ok(count)
    }
}
