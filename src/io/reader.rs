//! Chunked Parquet dataset reader.
//!
//! `ChunkedDatasetReader` lazily partitions one or more Parquet files into
//! bounded-memory chunks. Each call to [`ChunkedDatasetReader::traverse`]
//! opens a fresh, independent traversal covering the full dataset exactly
//! once in deterministic file-then-row order, so the fit pass, the apply
//! pass and the post-transform read never share cursor state.
//!
//! Column conversion is kind-driven: continuous and label columns accept
//! Float32/Float64/Int32/Int64 storage; categorical columns accept Utf8
//! (raw values) or Int64 (already-encoded indices, i.e. reading back
//! transformed shards).

use crate::chunk::{Chunk, ColumnData};
use crate::error::{PipelineError, Result};
use crate::schema::{ColumnKind, ColumnSchema};
use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ProjectionMask;
use std::collections::VecDeque;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// Reader over one or more Parquet source files.
#[derive(Debug, Clone)]
pub struct ChunkedDatasetReader {
    paths: Vec<PathBuf>,
    schema: Arc<ColumnSchema>,
    chunk_rows: usize,
    max_chunk_bytes: Option<u64>,
}

impl ChunkedDatasetReader {
    /// Create a reader over `paths` producing chunks of at most
    /// `chunk_rows` rows.
    pub fn new(paths: Vec<PathBuf>, schema: Arc<ColumnSchema>, chunk_rows: usize) -> Result<Self> {
        if paths.is_empty() {
            return Err(PipelineError::Config(
                "at least one input path is required".to_string(),
            ));
        }
        if chunk_rows == 0 {
            return Err(PipelineError::Config("chunk_rows must be > 0".to_string()));
        }
        Ok(Self {
            paths,
            schema,
            chunk_rows,
            max_chunk_bytes: None,
        })
    }

    /// Enforce a per-chunk memory bound; a chunk whose decoded size exceeds
    /// it aborts the traversal with `ResourceExhausted`.
    pub fn with_max_chunk_bytes(mut self, bytes: u64) -> Self {
        self.max_chunk_bytes = Some(bytes);
        self
    }

    pub fn schema(&self) -> &Arc<ColumnSchema> {
        &self.schema
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Open a fresh traversal. Fails fatally if any listed path does not
    /// exist; schema conflicts surface when the offending file is opened.
    pub fn traverse(&self) -> Result<Traversal> {
        for path in &self.paths {
            if !path.is_file() {
                return Err(PipelineError::MissingPath(path.clone()));
            }
        }

        Ok(Traversal {
            paths: self.paths.iter().cloned().collect(),
            schema: self.schema.clone(),
            chunk_rows: self.chunk_rows,
            max_chunk_bytes: self.max_chunk_bytes,
            current: None,
            next_index: 0,
        })
    }
}

/// One pass over the dataset; an iterator of owned chunks.
pub struct Traversal {
    paths: VecDeque<PathBuf>,
    schema: Arc<ColumnSchema>,
    chunk_rows: usize,
    max_chunk_bytes: Option<u64>,
    current: Option<ParquetRecordBatchReader>,
    next_index: usize,
}

impl Traversal {
    fn open_next_file(&mut self) -> Result<bool> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(false);
        };

        let file = File::open(&path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

        // Validate the declared schema against the file before reading.
        let file_schema = builder.schema().clone();
        let missing: Vec<String> = self
            .schema
            .all_columns()
            .filter(|name| file_schema.column_with_name(name).is_none())
            .map(|s| s.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::SchemaMismatch {
                context: format!("source file {}", path.display()),
                missing,
            });
        }

        // Project down to the declared columns only.
        let indices: Vec<usize> = self
            .schema
            .all_columns()
            .filter_map(|name| file_schema.column_with_name(name).map(|(i, _)| i))
            .collect();
        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);

        let reader = builder
            .with_batch_size(self.chunk_rows)
            .with_projection(mask)
            .build()?;

        tracing::debug!("Opened {} for chunked reading", path.display());
        self.current = Some(reader);
        Ok(true)
    }
}

impl Iterator for Traversal {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                match self.open_next_file() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e)),
                }
            }

            match self.current.as_mut().and_then(|r| r.next()) {
                Some(Ok(batch)) => {
                    let index = self.next_index;
                    self.next_index += 1;

                    let chunk = match batch_to_chunk(&batch, &self.schema, index) {
                        Ok(chunk) => chunk,
                        Err(e) => return Some(Err(e)),
                    };

                    if let Some(max) = self.max_chunk_bytes {
                        let needed = chunk.estimated_bytes();
                        if needed > max {
                            return Some(Err(PipelineError::ResourceExhausted {
                                stage: "chunk read".to_string(),
                                needed_bytes: needed,
                                budget_bytes: max,
                            }));
                        }
                    }

                    return Some(Ok(chunk));
                }
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    // Current file exhausted, move on.
                    self.current = None;
                }
            }
        }
    }
}

/// Convert a record batch into an owned chunk, columns in schema order.
pub fn batch_to_chunk(batch: &RecordBatch, schema: &ColumnSchema, index: usize) -> Result<Chunk> {
    let mut columns = Vec::with_capacity(schema.num_columns());

    for name in schema.all_columns() {
        let array = batch
            .column_by_name(name)
            .ok_or_else(|| PipelineError::missing_column("record batch", name))?;
        // kind_of cannot fail here: we iterate the schema's own columns.
        let kind = schema.kind_of(name).unwrap();
        let data = convert_column(name, kind, array)?;
        columns.push((name.to_string(), data));
    }

    Chunk::new(index, columns)
}

fn convert_column(name: &str, kind: ColumnKind, array: &ArrayRef) -> Result<ColumnData> {
    match kind {
        ColumnKind::Continuous | ColumnKind::Label => to_float(name, array),
        ColumnKind::Categorical => to_categorical(name, array),
    }
}

fn to_float(name: &str, array: &ArrayRef) -> Result<ColumnData> {
    let values: Vec<Option<f32>> = if let Some(arr) = array.as_any().downcast_ref::<Float32Array>()
    {
        (0..arr.len())
            .map(|i| (!arr.is_null(i)).then(|| arr.value(i)))
            .collect()
    } else if let Some(arr) = array.as_any().downcast_ref::<Float64Array>() {
        (0..arr.len())
            .map(|i| (!arr.is_null(i)).then(|| arr.value(i) as f32))
            .collect()
    } else if let Some(arr) = array.as_any().downcast_ref::<Int64Array>() {
        (0..arr.len())
            .map(|i| (!arr.is_null(i)).then(|| arr.value(i) as f32))
            .collect()
    } else if let Some(arr) = array.as_any().downcast_ref::<Int32Array>() {
        (0..arr.len())
            .map(|i| (!arr.is_null(i)).then(|| arr.value(i) as f32))
            .collect()
    } else {
        return Err(unsupported(name, "float32/float64/int32/int64", array.data_type()));
    };
    Ok(ColumnData::Float(values))
}

fn to_categorical(name: &str, array: &ArrayRef) -> Result<ColumnData> {
    if let Some(arr) = array.as_any().downcast_ref::<StringArray>() {
        let values = (0..arr.len())
            .map(|i| (!arr.is_null(i)).then(|| arr.value(i).to_string()))
            .collect();
        Ok(ColumnData::Utf8(values))
    } else if let Some(arr) = array.as_any().downcast_ref::<Int64Array>() {
        // Already-encoded indices (transformed shards); nulls take the
        // unknown slot.
        let values = (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    crate::stats::UNKNOWN_INDEX
                } else {
                    arr.value(i)
                }
            })
            .collect();
        Ok(ColumnData::Index(values))
    } else {
        Err(unsupported(name, "utf8/int64", array.data_type()))
    }
}

fn unsupported(name: &str, expected: &str, got: &DataType) -> PipelineError {
    PipelineError::UnsupportedType {
        column: name.to_string(),
        context: "chunk read".to_string(),
        expected: expected.to_string(),
        got: format!("{:?}", got),
    }
}
