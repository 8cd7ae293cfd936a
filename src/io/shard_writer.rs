//! Transformed-dataset shard writer.
//!
//! The apply pass streams transformed chunks into one or more Parquet
//! shard files (`part_00000.parquet`, ...). Chunks fan out across
//! `parts_per_worker` shards round-robin. Each shard is self-describing
//! (Parquet carries row counts and column types); `finish` additionally
//! writes a `manifest.json` listing shard names in deterministic order and
//! a `metadata.json` summary so consumers get dataset-level facts without
//! re-scanning.

use crate::chunk::{Chunk, ColumnData};
use crate::error::{PipelineError, Result};
use crate::schema::FinalSchema;
use crate::stats::{embedding_sizes, StatisticsRecord};
use arrow::array::{ArrayRef, Float32Array, Int64Array};
use arrow::datatypes::Schema as ArrowSchema;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MANIFEST_FILE: &str = "manifest.json";
const METADATA_FILE: &str = "metadata.json";

/// Shard listing written once per traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    /// Shard file names in deterministic order
    pub shards: Vec<String>,

    /// Rows per shard, aligned with `shards`
    pub shard_rows: Vec<u64>,

    /// Total rows across all shards
    pub total_rows: u64,
}

impl DatasetManifest {
    /// Load the manifest from a transformed-dataset directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(PipelineError::MissingPath(path));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Absolute shard paths in manifest order.
    pub fn shard_paths(&self, dir: &Path) -> Vec<PathBuf> {
        self.shards.iter().map(|s| dir.join(s)).collect()
    }
}

/// Per-column statistics echo in `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub row_count: u64,
    pub continuous: BTreeMap<String, ContinuousSummary>,
    pub categorical: BTreeMap<String, CategoricalSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousSummary {
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalSummary {
    pub cardinality: usize,
    pub embedding_width: usize,
}

/// Streaming writer for transformed shards.
pub struct ShardWriter {
    dir: PathBuf,
    schema: FinalSchema,
    arrow_schema: Arc<ArrowSchema>,
    writers: Vec<Option<ArrowWriter<File>>>,
    shard_rows: Vec<u64>,
    next_chunk: usize,
    total_rows: u64,
}

impl ShardWriter {
    /// Create the output directory and a writer fanning out across
    /// `parts` shards.
    pub fn create(dir: &Path, schema: FinalSchema, parts: usize) -> Result<Self> {
        if parts == 0 {
            return Err(PipelineError::Config(
                "parts_per_worker must be > 0".to_string(),
            ));
        }
        std::fs::create_dir_all(dir)?;

        let arrow_schema = schema.to_arrow();
        Ok(Self {
            dir: dir.to_path_buf(),
            schema,
            arrow_schema,
            writers: (0..parts).map(|_| None).collect(),
            shard_rows: vec![0; parts],
            next_chunk: 0,
            total_rows: 0,
        })
    }

    fn shard_name(part: usize) -> String {
        format!("part_{:05}.parquet", part)
    }

    /// Append a transformed chunk to its shard.
    pub fn write_chunk(&mut self, chunk: Chunk) -> Result<u64> {
        let part = self.next_chunk % self.writers.len();
        self.next_chunk += 1;

        let rows = chunk.num_rows() as u64;
        let batch = chunk_to_batch(chunk, &self.schema, self.arrow_schema.clone())?;

        if self.writers[part].is_none() {
            let path = self.dir.join(Self::shard_name(part));
            let file = File::create(&path)?;
            self.writers[part] = Some(ArrowWriter::try_new(
                file,
                self.arrow_schema.clone(),
                None,
            )?);
        }

        // Just opened above if absent.
        self.writers[part].as_mut().unwrap().write(&batch)?;
        self.shard_rows[part] += rows;
        self.total_rows += rows;
        Ok(batch.get_array_memory_size() as u64)
    }

    /// Close all shards and write the manifest and metadata summary.
    ///
    /// `statistics` (when supplied) is echoed per column so downstream
    /// consumers need not re-scan the raw data.
    pub fn finish(mut self, statistics: Option<&StatisticsRecord>) -> Result<DatasetManifest> {
        let mut shards = Vec::new();
        let mut shard_rows = Vec::new();

        for (part, writer) in self.writers.drain(..).enumerate() {
            if let Some(writer) = writer {
                writer.close()?;
                shards.push(Self::shard_name(part));
                shard_rows.push(self.shard_rows[part]);
            }
        }

        let manifest = DatasetManifest {
            shards,
            shard_rows,
            total_rows: self.total_rows,
        };
        std::fs::write(
            self.dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        let metadata = build_metadata(self.total_rows, &self.schema, statistics);
        std::fs::write(
            self.dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        tracing::info!(
            "Wrote {} rows across {} shard(s) to {}",
            manifest.total_rows,
            manifest.shards.len(),
            self.dir.display()
        );

        Ok(manifest)
    }
}

fn build_metadata(
    row_count: u64,
    schema: &FinalSchema,
    statistics: Option<&StatisticsRecord>,
) -> DatasetMetadata {
    let mut continuous = BTreeMap::new();
    let mut categorical = BTreeMap::new();

    if let Some(stats) = statistics {
        for name in schema.continuous.iter().chain(schema.labels.iter()) {
            if let Some(m) = stats.moments_for(name) {
                continuous.insert(
                    name.clone(),
                    ContinuousSummary {
                        mean: m.mean,
                        stddev: m.stddev(),
                    },
                );
            }
        }
        for (name, size) in embedding_sizes(stats) {
            categorical.insert(
                name,
                CategoricalSummary {
                    cardinality: size.cardinality,
                    embedding_width: size.embedding_width,
                },
            );
        }
    }

    DatasetMetadata {
        row_count,
        continuous,
        categorical,
    }
}

/// Convert a transformed chunk into a record batch in shard column order.
fn chunk_to_batch(
    chunk: Chunk,
    schema: &FinalSchema,
    arrow_schema: Arc<ArrowSchema>,
) -> Result<RecordBatch> {
    let chunk_index = chunk.index;
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.num_columns());

    for name in &schema.categorical {
        let data = chunk.require_column(name, "shard write")?;
        match data {
            ColumnData::Index(values) => {
                arrays.push(Arc::new(Int64Array::from(values.clone())));
            }
            other => return Err(not_encoded(name, chunk_index, other)),
        }
    }

    for name in schema.continuous.iter().chain(schema.labels.iter()) {
        let data = chunk.require_column(name, "shard write")?;
        match data {
            ColumnData::Float(values) => {
                arrays.push(Arc::new(Float32Array::from(values.clone())));
            }
            other => {
                return Err(PipelineError::UnsupportedType {
                    column: name.clone(),
                    context: "shard write".to_string(),
                    expected: "float".to_string(),
                    got: format!("{:?}", other),
                })
            }
        }
    }

    Ok(RecordBatch::try_new(arrow_schema, arrays)?)
}

fn not_encoded(name: &str, chunk_index: usize, got: &ColumnData) -> PipelineError {
    PipelineError::InvalidValue {
        column: name.to_string(),
        stage: "shard write".to_string(),
        chunk_index,
        row: 0,
        message: format!(
            "categorical column not encoded (got {:?}); apply categorify before writing",
            std::mem::discriminant(got)
        ),
    }
}
