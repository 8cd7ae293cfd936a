//! In-memory columnar chunks.
//!
//! A `Chunk` is a bounded-row-count columnar slice of the dataset, owned
//! exclusively by whichever stage is currently processing it. Ownership
//! moves reader → operator pipeline → assembler; chunks are never shared
//! or concurrently mutated.

use crate::error::{PipelineError, Result};

/// Column payload within a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Continuous or label values; `None` marks a missing value.
    Float(Vec<Option<f32>>),

    /// Raw categorical values before encoding; `None` marks a missing value.
    Utf8(Vec<Option<String>>),

    /// Encoded categorical vocabulary indices (unknown slot is 0).
    Index(Vec<i64>),
}

impl ColumnData {
    /// Number of rows in this column.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Index(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rough in-memory footprint, used for memory-bound enforcement.
    pub fn estimated_bytes(&self) -> u64 {
        match self {
            ColumnData::Float(v) => (v.len() * std::mem::size_of::<Option<f32>>()) as u64,
            ColumnData::Utf8(v) => v
                .iter()
                .map(|s| {
                    std::mem::size_of::<Option<String>>()
                        + s.as_ref().map_or(0, |s| s.capacity())
                })
                .sum::<usize>() as u64,
            ColumnData::Index(v) => (v.len() * std::mem::size_of::<i64>()) as u64,
        }
    }
}

/// A columnar slice of bounded row count.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of this chunk within its traversal, for error context.
    pub index: usize,

    num_rows: usize,
    columns: Vec<(String, ColumnData)>,
}

impl Chunk {
    /// Create a chunk, validating that all columns have the same row count.
    pub fn new(index: usize, columns: Vec<(String, ColumnData)>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, |(_, c)| c.len());
        for (name, col) in &columns {
            if col.len() != num_rows {
                return Err(PipelineError::Config(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    col.len(),
                    num_rows
                )));
            }
        }
        Ok(Self {
            index,
            num_rows,
            columns,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Column names in chunk order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Borrow a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Mutably borrow a column by name.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnData> {
        self.columns
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Borrow a column, failing with schema context if absent.
    pub fn require_column(&self, name: &str, context: &str) -> Result<&ColumnData> {
        self.column(name)
            .ok_or_else(|| PipelineError::missing_column(context, name))
    }

    /// Replace a column's payload, failing if the column is absent.
    pub fn replace_column(&mut self, name: &str, data: ColumnData, context: &str) -> Result<()> {
        debug_assert_eq!(data.len(), self.num_rows);
        let slot = self
            .columns
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| PipelineError::missing_column(context, name))?;
        slot.1 = data;
        Ok(())
    }

    /// Consume the chunk, yielding its columns.
    pub fn into_columns(self) -> Vec<(String, ColumnData)> {
        self.columns
    }

    /// Rough in-memory footprint across all columns.
    pub fn estimated_bytes(&self) -> u64 {
        self.columns.iter().map(|(_, c)| c.estimated_bytes()).sum()
    }
}
