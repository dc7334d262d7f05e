
use std::collections::HashSet;

use tracing::{debug, warn};

use super::{ChunkRecord, IndexError, SearchHit, squared_l2};

/// Exact squared-L2 index over a contiguous vector buffer.
///
/// `vectors` holds `chunks.len() * dimension` values; the vector at position `i`
/// belongs to `chunks[i]`. The structure has no in-place deletion, removal builds
/// a new index from the surviving entries.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
    chunks: Vec<ChunkRecord>,
}

impl FlatIndex {
    /// Create an empty index for vectors of the given width
    #[inline]
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::InvalidDimension(dimension));
        }

        Ok(Self {
            dimension,
            vectors: Vec::new(),
            chunks: Vec::new(),
        })
    }

    /// Assemble an index from a flat vector buffer and its parallel records
    #[inline]
    pub fn from_parts(
        dimension: usize,
        vectors: Vec<f32>,
        chunks: Vec<ChunkRecord>,
    ) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::InvalidDimension(dimension));
        }

        if vectors.len() != chunks.len() * dimension {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len() / dimension,
                records: chunks.len(),
            });
        }

        Ok(Self {
            dimension,
            vectors,
            chunks,
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    /// The raw vector buffer, row-major
    #[inline]
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Copy-free view of the stored vector at `position`
    #[inline]
    pub fn reconstruct(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        let end = start.checked_add(self.dimension)?;
        self.vectors.get(start..end)
    }

    /// Check that a batch can be appended without touching any state
    #[inline]
    pub fn validate_batch(
        &self,
        vectors: &[Vec<f32>],
        chunks: &[ChunkRecord],
    ) -> Result<(), IndexError> {
        if vectors.len() != chunks.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                records: chunks.len(),
            });
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        Ok(())
    }

    /// Append vectors and their records, preserving order. Nothing is appended
    /// unless the whole batch is valid.
    #[inline]
    pub fn add(&mut self, vectors: &[Vec<f32>], chunks: Vec<ChunkRecord>) -> Result<(), IndexError> {
        self.validate_batch(vectors, &chunks)?;

        self.vectors.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.vectors.extend_from_slice(vector);
        }
        self.chunks.extend(chunks);

        Ok(())
    }

    /// The `k` nearest entries to `query`, ascending by distance.
    ///
    /// Equal distances keep insertion order. An empty index answers with no hits
    /// regardless of the query width.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| (squared_l2(query, vector), position))
            .collect();

        let by_distance =
            |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        Ok(scored
            .into_iter()
            .map(|(distance, position)| SearchHit {
                chunk: self.chunks[position].clone(),
                distance,
            })
            .collect())
    }

    /// Build a copy of this index without any entry owned by `document_ids`.
    ///
    /// Returns `None` when no entry matches so callers can keep the current
    /// structure untouched. Otherwise returns the rebuilt index and the number of
    /// entries that matched. Cost is O(len).
    #[inline]
    pub fn without_documents(&self, document_ids: &[i64]) -> Option<(Self, usize)> {
        let doomed: HashSet<i64> = document_ids.iter().copied().collect();

        let keep: Vec<usize> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| !doomed.contains(&chunk.document_id))
            .map(|(position, _)| position)
            .collect();

        let removed = self.chunks.len() - keep.len();
        if removed == 0 {
            return None;
        }

        let mut vectors = Vec::with_capacity(keep.len() * self.dimension);
        let mut chunks = Vec::with_capacity(keep.len());

        for position in keep {
            match self.reconstruct(position) {
                Some(vector) => {
                    vectors.extend_from_slice(vector);
                    chunks.push(self.chunks[position].clone());
                }
                None => {
                    warn!(
                        "Dropping entry {} (chunk {}) that could not be reconstructed",
                        position, self.chunks[position].chunk_id
                    );
                }
            }
        }

        debug!(
            "Rebuilt flat index: {} removed, {} kept",
            removed,
            chunks.len()
        );

        Some((
            Self {
                dimension: self.dimension,
                vectors,
                chunks,
            },
            removed,
        ))
    }

    /// Drop all entries, keeping the dimension
    #[inline]
    pub fn clear(&mut self) {
        self.vectors = Vec::new();
        self.chunks = Vec::new();
    }
}
