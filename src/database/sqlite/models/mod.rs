
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::index::{ChunkMetadata, ChunkRecord};

pub const DEFAULT_DOC_TYPE: &str = "syllabus";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub title: String,
    pub source_url: Option<String>,
    pub doc_type: String,
    pub course: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub uploaded_date: NaiveDateTime,
}

impl Document {
    /// Tags copied onto every chunk of this document
    #[inline]
    pub fn chunk_metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            filename: Some(self.filename.clone()),
            source_url: self.source_url.clone(),
            doc_type: Some(self.doc_type.clone()),
            course: self.course.clone(),
            semester: self.semester.clone(),
            subject: self.subject.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    pub title: String,
    pub source_url: Option<String>,
    pub doc_type: String,
    pub course: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
}

impl NewDocument {
    #[inline]
    pub fn new(filename: &str, title: &str) -> Self {
        Self {
            filename: filename.to_string(),
            title: title.to_string(),
            source_url: None,
            doc_type: DEFAULT_DOC_TYPE.to_string(),
            course: None,
            semester: None,
            subject: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentChunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
}

/// A chunk joined with the tags of its document
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChunkRow {
    pub chunk_id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub filename: String,
    pub source_url: Option<String>,
    pub doc_type: String,
    pub course: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
}

impl TryFrom<ChunkRow> for ChunkRecord {
    type Error = anyhow::Error;

    #[inline]
    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        let chunk_index = u32::try_from(row.chunk_index).map_err(|_| {
            anyhow::anyhow!(
                "Chunk {} has out-of-range index {}",
                row.chunk_id,
                row.chunk_index
            )
        })?;

        Ok(Self {
            chunk_id: row.chunk_id,
            document_id: row.document_id,
            chunk_index,
            content: row.content,
            metadata: ChunkMetadata {
                filename: Some(row.filename),
                source_url: row.source_url,
                doc_type: Some(row.doc_type),
                course: row.course,
                semester: row.semester,
                subject: row.subject,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub documents: i64,
    pub chunks: i64,
}
