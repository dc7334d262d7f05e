// On-disk snapshot of a flat index
// Two artifacts: an Arrow IPC file of vectors at `path` and a JSON record list at `path.meta`


use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow::array::{Array, FixedSizeListArray, Float32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{ChunkRecord, FlatIndex};

const VECTOR_COLUMN: &str = "vector";
const GENERATION_KEY: &str = "course_rag.generation";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Snapshot artifact not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot vector file error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Snapshot metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("Snapshot is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Serialize)]
struct MetadataOut<'a> {
    generation: &'a str,
    dimension: usize,
    chunks: &'a [ChunkRecord],
}

#[derive(Deserialize)]
struct MetadataIn {
    #[serde(default)]
    generation: Option<String>,
    dimension: usize,
    chunks: Vec<ChunkRecord>,
}

static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier shared by the two artifacts of one write
fn next_generation() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let sequence = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", nanos, std::process::id(), sequence)
}

/// Location of the record list that accompanies the vector file at `path`
#[inline]
pub fn meta_path(path: &Path) -> PathBuf {
    with_suffix(path, ".meta")
}

/// True only when both snapshot artifacts are present
#[inline]
pub fn exists(path: &Path) -> bool {
    path.is_file() && meta_path(path).is_file()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn vector_schema(dimension: i32, generation: &str) -> Schema {
    Schema::new(vec![Field::new(
        VECTOR_COLUMN,
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, false)),
            dimension,
        ),
        false,
    )])
    .with_metadata(HashMap::from([(
        GENERATION_KEY.to_string(),
        generation.to_string(),
    )]))
}

/// Serialize the record list through a buffer, surfacing any error from the final flush
fn write_metadata<W: Write>(out: W, metadata: &MetadataOut<'_>) -> Result<W, PersistenceError> {
    let mut writer = BufWriter::new(out);
    serde_json::to_writer(&mut writer, metadata)?;
    writer
        .into_inner()
        .map_err(|e| PersistenceError::Io(e.into_error()))
}

/// Persist `index` to `path` and its metadata companion.
///
/// Both artifacts are written to temporary files first and renamed into place, so
/// a failed write never leaves a half-written snapshot under the final names. Both
/// carry the same generation id, which [`read`] checks.
#[inline]
pub fn write(index: &FlatIndex, path: &Path) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let generation = next_generation();
    let tmp_suffix = format!(".{}.tmp", generation);
    let vector_tmp = with_suffix(path, &tmp_suffix);
    let meta = meta_path(path);
    let meta_tmp = with_suffix(&meta, &tmp_suffix);

    let outcome = write_artifacts(index, &generation, &vector_tmp, &meta_tmp).and_then(|()| {
        fs::rename(&vector_tmp, path)?;
        fs::rename(&meta_tmp, &meta)?;
        Ok(())
    });
    if let Err(e) = outcome {
        let _ = fs::remove_file(&vector_tmp);
        let _ = fs::remove_file(&meta_tmp);
        return Err(e);
    }

    debug!(
        "Wrote snapshot generation {} of {} vectors to {}",
        generation,
        index.len(),
        path.display()
    );
    Ok(())
}

fn write_artifacts(
    index: &FlatIndex,
    generation: &str,
    vector_tmp: &Path,
    meta_tmp: &Path,
) -> Result<(), PersistenceError> {
    let dimension = i32::try_from(index.dimension())
        .map_err(|_| PersistenceError::Corrupt(format!("dimension {} too large", index.dimension())))?;
    let schema = Arc::new(vector_schema(dimension, generation));

    let values = Float32Array::from(index.vectors().to_vec());
    let item = Arc::new(Field::new("item", DataType::Float32, false));
    let vectors = FixedSizeListArray::try_new(item, dimension, Arc::new(values), None)?;
    let batch = RecordBatch::try_new(Arc::clone(&schema), vec![Arc::new(vectors)])?;

    let file = BufWriter::new(File::create(vector_tmp)?);
    let mut writer = FileWriter::try_new(file, &schema)?;
    writer.write(&batch)?;
    writer.finish()?;
    let file = writer
        .into_inner()?
        .into_inner()
        .map_err(|e| PersistenceError::Io(e.into_error()))?;
    file.sync_all()?;

    let file = write_metadata(
        File::create(meta_tmp)?,
        &MetadataOut {
            generation,
            dimension: index.dimension(),
            chunks: index.chunks(),
        },
    )?;
    file.sync_all()?;

    Ok(())
}

/// Load a snapshot written by [`write`], checking that both artifacts agree
#[inline]
pub fn read(path: &Path) -> Result<FlatIndex, PersistenceError> {
    let meta = meta_path(path);
    if !path.is_file() {
        return Err(PersistenceError::Missing(path.to_path_buf()));
    }
    if !meta.is_file() {
        return Err(PersistenceError::Missing(meta));
    }

    let reader = FileReader::try_new(BufReader::new(File::open(path)?), None)?;
    let vector_generation = reader.schema().metadata().get(GENERATION_KEY).cloned();

    let dimension = match reader.schema().fields().first().map(|f| f.data_type().clone()) {
        Some(DataType::FixedSizeList(_, size)) => usize::try_from(size)
            .map_err(|_| PersistenceError::Corrupt(format!("invalid vector width {}", size)))?,
        other => {
            return Err(PersistenceError::Corrupt(format!(
                "unexpected vector column type {:?}",
                other
            )));
        }
    };

    let mut vectors: Vec<f32> = Vec::new();
    for batch in reader {
        let batch = batch?;
        let column = batch
            .column_by_name(VECTOR_COLUMN)
            .ok_or_else(|| PersistenceError::Corrupt("missing vector column".to_string()))?;
        let list = column
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .ok_or_else(|| PersistenceError::Corrupt("vector column has wrong type".to_string()))?;

        for row in 0..list.len() {
            if list.is_null(row) {
                return Err(PersistenceError::Corrupt(format!("null vector at row {}", row)));
            }
            let value = list.value(row);
            let floats = value
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| PersistenceError::Corrupt("vector items are not f32".to_string()))?;
            vectors.extend_from_slice(floats.values());
        }
    }

    let metadata: MetadataIn = serde_json::from_reader(BufReader::new(File::open(&meta)?))?;

    if metadata.dimension != dimension {
        return Err(PersistenceError::Corrupt(format!(
            "metadata dimension {} does not match vector width {}",
            metadata.dimension, dimension
        )));
    }

    let rows = vectors.len() / dimension.max(1);
    if rows != metadata.chunks.len() {
        return Err(PersistenceError::Corrupt(format!(
            "{} vectors but {} metadata records",
            rows,
            metadata.chunks.len()
        )));
    }

    if vector_generation != metadata.generation {
        return Err(PersistenceError::Corrupt(format!(
            "vector file generation {:?} does not match metadata generation {:?}",
            vector_generation, metadata.generation
        )));
    }

    FlatIndex::from_parts(dimension, vectors, metadata.chunks)
        .map_err(|e| PersistenceError::Corrupt(e.to_string()))
}
