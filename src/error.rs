//! Error taxonomy for the transform and loading pipeline.
//!
//! Every variant that aborts a traversal carries enough context to locate
//! the bad data: column name, operator or stage, and chunk index where
//! applicable. Unseen categories are deliberately absent from this enum;
//! they resolve to the reserved unknown index instead of failing.

use std::path::PathBuf;

/// Errors raised by the transform workflow, readers, writers and loader.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Declared columns are absent from a source file or a checkpoint.
    #[error("schema mismatch in {context}: missing column(s) {missing:?}")]
    SchemaMismatch {
        context: String,
        missing: Vec<String>,
    },

    /// A column was found but its physical type cannot be read as the
    /// declared kind.
    #[error("unsupported type for column '{column}' in {context}: expected {expected}, got {got}")]
    UnsupportedType {
        column: String,
        context: String,
        expected: String,
        got: String,
    },

    /// A value violated a transform's input contract (e.g. negative input
    /// to the log transform, or a null that survived to tensor assembly).
    #[error("invalid value in column '{column}' ({stage}, chunk {chunk_index}, row {row}): {message}")]
    InvalidValue {
        column: String,
        stage: String,
        chunk_index: usize,
        row: usize,
        message: String,
    },

    /// A chunk or buffer exceeded the configured memory bound.
    #[error("resource exhaustion in {stage}: needed {needed_bytes} bytes, budget is {budget_bytes}")]
    ResourceExhausted {
        stage: String,
        needed_bytes: u64,
        budget_bytes: u64,
    },

    /// A source or shard path does not exist.
    #[error("input path does not exist: {0}")]
    MissingPath(PathBuf),

    /// A checkpoint directory is missing, incomplete or inconsistent.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Shorthand for a schema mismatch with a single missing column.
    pub fn missing_column(context: impl Into<String>, column: impl Into<String>) -> Self {
        PipelineError::SchemaMismatch {
            context: context.into(),
            missing: vec![column.into()],
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
