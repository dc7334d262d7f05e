// Similarity index module
// In-memory exact nearest-neighbour search over chunk embeddings


pub mod flat;
pub mod similarity;
pub mod snapshot;

pub use flat::FlatIndex;
pub use similarity::SimilarityIndex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embedding width used when nothing else is configured (all-MiniLM-L6-v2)
pub const DEFAULT_DIMENSION: usize = 384;

/// Descriptive tags stored with every chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// A chunk of document text as held by the index, paired by position with one vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Row id of the chunk in the chunk store
    pub chunk_id: i64,
    /// Row id of the owning document
    pub document_id: i64,
    /// Position of this chunk within its document
    pub chunk_index: u32,
    pub content: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    /// Human readable origin of the chunk, used when assembling answer context
    #[inline]
    pub fn source_label(&self) -> String {
        self.metadata
            .filename
            .clone()
            .or_else(|| self.metadata.source_url.clone())
            .unwrap_or_else(|| format!("Document {}", self.document_id))
    }
}

/// One nearest-neighbour hit: a copy of the stored record plus its distance to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub chunk: ChunkRecord,
    /// Squared Euclidean distance to the query vector
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub dimension: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Vector/record count mismatch: {vectors} vectors for {records} records")]
    LengthMismatch { vectors: usize, records: usize },
    #[error("Invalid index dimension: {0} (must be at least 1)")]
    InvalidDimension(usize),
}

/// Squared Euclidean distance between two equal-length vectors
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Scale a vector to unit length in place. Zero vectors are left as they are.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}
