//! Transform operators.
//!
//! An [`Operator`] is a single stateless-or-statistical transform over named
//! columns. Operators are serde-tagged so a workflow's operator list can be
//! declared in configuration and persisted inside a checkpoint. Given the
//! same statistics, every operator is idempotent and deterministic.

use crate::chunk::{Chunk, ColumnData};
use crate::error::{PipelineError, Result};
use crate::stats::StatisticsRecord;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

fn default_epsilon() -> f32 {
    1e-6
}

/// Constant used by [`Operator::FillMissing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    /// Replacement for missing continuous values
    Number(f32),

    /// Replacement for missing categorical values
    Category(String),
}

/// A single transform over named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operator {
    /// Replace null values with a caller-specified constant. Runs before
    /// any statistic accumulation, so statistics are computed over the
    /// filled distribution.
    FillMissing {
        columns: Vec<String>,
        value: FillValue,
    },

    /// `ln(x + 1)`. Only valid on non-negative inputs; a negative value is
    /// a fatal input-validation error, never clamped.
    LogTransform { columns: Vec<String> },

    /// `(x - mean) / max(stddev, epsilon)` using fitted moments.
    Normalize {
        columns: Vec<String>,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },

    /// Encode categorical values as vocabulary indices assigned in
    /// first-seen order during fit. Values unseen during fit (and nulls)
    /// map to the reserved unknown index 0 at apply time.
    Categorify { columns: Vec<String> },
}

impl Operator {
    pub fn fill_missing(columns: Vec<String>, value: FillValue) -> Self {
        Operator::FillMissing { columns, value }
    }

    pub fn log_transform(columns: Vec<String>) -> Self {
        Operator::LogTransform { columns }
    }

    pub fn normalize(columns: Vec<String>) -> Self {
        Operator::Normalize {
            columns,
            epsilon: default_epsilon(),
        }
    }

    pub fn categorify(columns: Vec<String>) -> Self {
        Operator::Categorify { columns }
    }

    /// Stage name used in logs and error context.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::FillMissing { .. } => "fill_missing",
            Operator::LogTransform { .. } => "log_transform",
            Operator::Normalize { .. } => "normalize",
            Operator::Categorify { .. } => "categorify",
        }
    }

    /// Columns this operator reads and writes.
    pub fn columns(&self) -> &[String] {
        match self {
            Operator::FillMissing { columns, .. }
            | Operator::LogTransform { columns }
            | Operator::Normalize { columns, .. }
            | Operator::Categorify { columns } => columns,
        }
    }

    /// Whether the operator needs a fitted statistic to transform.
    pub fn requires_statistics(&self) -> bool {
        matches!(
            self,
            Operator::Normalize { .. } | Operator::Categorify { .. }
        )
    }

    /// Accumulate this operator's statistics from a chunk. No-op for
    /// stateless operators, which participate in the fit pass via
    /// [`Operator::transform_stateless`] instead.
    pub fn accumulate(&self, chunk: &Chunk, stats: &mut StatisticsRecord) -> Result<()> {
        match self {
            Operator::FillMissing { .. } | Operator::LogTransform { .. } => Ok(()),
            Operator::Normalize { columns, .. } => {
                for column in columns {
                    let data = chunk.require_column(column, self.name())?;
                    match data {
                        ColumnData::Float(values) => {
                            stats.accumulate_moments(column, values.iter());
                        }
                        other => return Err(self.type_error(column, "float", other)),
                    }
                }
                Ok(())
            }
            Operator::Categorify { columns } => {
                for column in columns {
                    let data = chunk.require_column(column, self.name())?;
                    match data {
                        ColumnData::Utf8(values) => {
                            stats.accumulate_vocabulary(column, values.iter());
                        }
                        other => return Err(self.type_error(column, "utf8", other)),
                    }
                }
                Ok(())
            }
        }
    }

    /// Apply only the stateless part of this operator (fit pass): fills and
    /// log transforms mutate the chunk so later statistic-requiring
    /// operators observe transformed values; statistical operators leave
    /// the chunk untouched.
    pub fn transform_stateless(&self, chunk: &mut Chunk) -> Result<()> {
        match self {
            Operator::FillMissing { .. } | Operator::LogTransform { .. } => {
                self.transform(chunk, &StatisticsRecord::new())
            }
            Operator::Normalize { .. } | Operator::Categorify { .. } => Ok(()),
        }
    }

    /// Apply this operator's transform using fixed statistics.
    pub fn transform(&self, chunk: &mut Chunk, stats: &StatisticsRecord) -> Result<()> {
        match self {
            Operator::FillMissing { columns, value } => {
                for column in columns {
                    self.fill_column(chunk, column, value)?;
                }
                Ok(())
            }
            Operator::LogTransform { columns } => {
                for column in columns {
                    self.log_column(chunk, column)?;
                }
                Ok(())
            }
            Operator::Normalize { columns, epsilon } => {
                for column in columns {
                    self.normalize_column(chunk, column, stats, *epsilon)?;
                }
                Ok(())
            }
            Operator::Categorify { columns } => {
                for column in columns {
                    self.categorify_column(chunk, column, stats)?;
                }
                Ok(())
            }
        }
    }

    fn fill_column(&self, chunk: &mut Chunk, column: &str, value: &FillValue) -> Result<()> {
        let chunk_index = chunk.index;
        let data = chunk
            .column_mut(column)
            .ok_or_else(|| PipelineError::missing_column(self.name(), column))?;

        match (data, value) {
            (ColumnData::Float(values), FillValue::Number(fill)) => {
                for slot in values.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(*fill);
                    }
                }
                Ok(())
            }
            (ColumnData::Utf8(values), FillValue::Category(fill)) => {
                for slot in values.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(fill.clone());
                    }
                }
                Ok(())
            }
            (other, _) => Err(PipelineError::InvalidValue {
                column: column.to_string(),
                stage: self.name().to_string(),
                chunk_index,
                row: 0,
                message: format!(
                    "fill value does not match column payload ({})",
                    column_type_name(other)
                ),
            }),
        }
    }

    fn log_column(&self, chunk: &mut Chunk, column: &str) -> Result<()> {
        let chunk_index = chunk.index;
        let data = chunk
            .column_mut(column)
            .ok_or_else(|| PipelineError::missing_column(self.name(), column))?;

        let values = match data {
            ColumnData::Float(values) => values,
            other => {
                let got = column_type_name(other);
                return Err(self.type_error_named(column, "float", got));
            }
        };

        // Sequential so the reported row is the first offender.
        for (row, slot) in values.iter_mut().enumerate() {
            if let Some(v) = slot {
                if *v < 0.0 {
                    return Err(PipelineError::InvalidValue {
                        column: column.to_string(),
                        stage: self.name().to_string(),
                        chunk_index,
                        row,
                        message: format!("negative input {} to ln(x + 1)", v),
                    });
                }
                *v = (*v + 1.0).ln();
            }
        }
        Ok(())
    }

    fn normalize_column(
        &self,
        chunk: &mut Chunk,
        column: &str,
        stats: &StatisticsRecord,
        epsilon: f32,
    ) -> Result<()> {
        let moments = stats.moments_for(column).ok_or_else(|| {
            PipelineError::missing_column("checkpoint statistics (normalize)", column)
        })?;
        let mean = moments.mean as f32;
        let denom = (moments.stddev() as f32).max(epsilon);

        let data = chunk
            .column_mut(column)
            .ok_or_else(|| PipelineError::missing_column(self.name(), column))?;

        match data {
            ColumnData::Float(values) => {
                values.par_iter_mut().for_each(|slot| {
                    if let Some(v) = slot {
                        *v = (*v - mean) / denom;
                    }
                });
                Ok(())
            }
            other => {
                let got = column_type_name(other);
                Err(self.type_error_named(column, "float", got))
            }
        }
    }

    fn categorify_column(
        &self,
        chunk: &mut Chunk,
        column: &str,
        stats: &StatisticsRecord,
    ) -> Result<()> {
        let vocab = stats.vocabulary_for(column).ok_or_else(|| {
            PipelineError::missing_column("checkpoint statistics (categorify)", column)
        })?;

        let data = chunk.require_column(column, self.name())?;
        let indices = match data {
            ColumnData::Utf8(values) => values
                .iter()
                .map(|v| match v {
                    Some(s) => vocab.index_of(s),
                    // Nulls take the unknown slot, same as unseen values.
                    None => crate::stats::UNKNOWN_INDEX,
                })
                .collect::<Vec<i64>>(),
            other => {
                let got = column_type_name(other);
                return Err(self.type_error_named(column, "utf8", got));
            }
        };

        chunk.replace_column(column, ColumnData::Index(indices), self.name())
    }

    fn type_error(&self, column: &str, expected: &str, got: &ColumnData) -> PipelineError {
        self.type_error_named(column, expected, column_type_name(got))
    }

    fn type_error_named(&self, column: &str, expected: &str, got: &str) -> PipelineError {
        PipelineError::UnsupportedType {
            column: column.to_string(),
            context: self.name().to_string(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

fn column_type_name(data: &ColumnData) -> &'static str {
    match data {
        ColumnData::Float(_) => "float",
        ColumnData::Utf8(_) => "utf8",
        ColumnData::Index(_) => "index",
    }
}
