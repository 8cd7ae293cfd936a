//! Configuration for the tabular transform and loading pipeline.

use crate::error::{PipelineError, Result};
use crate::loader::{AssemblerConfig, ShufflePolicy};
use crate::ops::Operator;
use crate::schema::{ColumnSchema, FinalSchema};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    pub input: InputConfig,

    /// Column roles
    pub columns: ColumnSchema,

    /// Ordered operator list applied to every chunk
    #[serde(default)]
    pub ops: Vec<Operator>,

    /// Checkpoint configuration
    pub checkpoint: CheckpointConfig,

    /// Output shard configuration
    pub output: OutputConfig,

    /// Batch loading configuration
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Input data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Source Parquet files, traversed in the listed order
    pub paths: Vec<PathBuf>,

    /// Rows per chunk
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,

    /// Upper bound on the in-memory size of a single chunk, in megabytes
    #[serde(default = "default_max_chunk_mb")]
    pub max_chunk_mb: u64,
}

/// Checkpoint directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory the fit pass writes and the transform pass reads.
    /// Never overwritten; each fit needs a fresh directory.
    pub dir: PathBuf,
}

/// Output shard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving shard files, the manifest and dataset metadata
    pub dir: PathBuf,

    /// Number of shard files chunks are fanned out across
    #[serde(default = "default_parts")]
    pub parts_per_worker: usize,
}

/// Batch loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Rows per training batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Row-ordering policy
    #[serde(default)]
    pub shuffle: ShufflePolicy,

    /// Seed for the shuffle RNG; fixed seed gives a reproducible order
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Fraction of device memory given to the global shuffle window
    #[serde(default = "default_buffer_fraction")]
    pub buffer_fraction: f64,

    /// Device memory budget in GB
    #[serde(default = "default_device_memory_gb")]
    pub device_memory_gb: f64,

    /// Batches prefetched ahead of the training step
    #[serde(default = "default_prefetch_depth")]
    pub prefetch_depth: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            shuffle: ShufflePolicy::default(),
            seed: default_seed(),
            buffer_fraction: default_buffer_fraction(),
            device_memory_gb: default_device_memory_gb(),
            prefetch_depth: default_prefetch_depth(),
        }
    }
}

impl LoaderConfig {
    /// Size of one fully transformed row in bytes under `schema`.
    fn row_bytes(schema: &FinalSchema) -> usize {
        schema.categorical.len() * std::mem::size_of::<i64>()
            + (schema.continuous.len() + schema.labels.len()) * std::mem::size_of::<f32>()
    }

    /// Capacity of the global shuffle window in rows, derived from the
    /// memory budget. Never smaller than one batch.
    pub fn shuffle_window_rows(&self, schema: &FinalSchema) -> usize {
        let window_bytes = self.device_memory_gb * self.buffer_fraction * 1024.0 * 1024.0 * 1024.0;
        let row_bytes = Self::row_bytes(schema).max(1);
        let rows = (window_bytes / row_bytes as f64) as usize;
        rows.max(self.batch_size)
    }

    /// Assembly parameters for this schema.
    pub fn assembler_config(&self, schema: &FinalSchema) -> AssemblerConfig {
        AssemblerConfig {
            batch_size: self.batch_size,
            policy: self.shuffle,
            seed: self.seed,
            shuffle_window_rows: self.shuffle_window_rows(schema),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Rayon thread pool size for CPU-bound work
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after a run completes
    #[serde(default)]
    pub metrics_output_path: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            rayon_threads: None,
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON, so it also covers unknown extensions
            _ => serde_yaml::from_str(&contents)
                .map_err(|e| PipelineError::Config(e.to_string()))?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.input.paths.is_empty() {
            return Err(PipelineError::Config(
                "input.paths must list at least one file".to_string(),
            ));
        }
        if self.input.chunk_rows == 0 {
            return Err(PipelineError::Config(
                "input.chunk_rows must be > 0".to_string(),
            ));
        }
        if self.input.max_chunk_mb == 0 {
            return Err(PipelineError::Config(
                "input.max_chunk_mb must be > 0".to_string(),
            ));
        }
        if self.output.parts_per_worker == 0 {
            return Err(PipelineError::Config(
                "output.parts_per_worker must be > 0".to_string(),
            ));
        }
        if self.loader.batch_size == 0 {
            return Err(PipelineError::Config(
                "loader.batch_size must be > 0".to_string(),
            ));
        }
        if self.loader.prefetch_depth == 0 {
            return Err(PipelineError::Config(
                "loader.prefetch_depth must be > 0".to_string(),
            ));
        }
        if !(self.loader.buffer_fraction > 0.0 && self.loader.buffer_fraction <= 1.0) {
            return Err(PipelineError::Config(
                "loader.buffer_fraction must be in (0, 1]".to_string(),
            ));
        }
        if self.loader.device_memory_gb <= 0.0 {
            return Err(PipelineError::Config(
                "loader.device_memory_gb must be > 0".to_string(),
            ));
        }

        self.columns.validate()?;
        for op in &self.ops {
            for column in op.columns() {
                if self.columns.kind_of(column).is_none() {
                    return Err(PipelineError::Config(format!(
                        "operator '{}' names undeclared column '{}'",
                        op.name(),
                        column
                    )));
                }
            }
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_chunk_rows() -> usize {
    100_000
}
fn default_max_chunk_mb() -> u64 {
    512
}
fn default_parts() -> usize {
    4
}
fn default_batch_size() -> usize {
    8192
}
fn default_seed() -> u64 {
    0
}
fn default_buffer_fraction() -> f64 {
    0.25
}
fn default_device_memory_gb() -> f64 {
    8.0
}
fn default_prefetch_depth() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_metrics_interval() -> u64 {
    10
}
