//! Tensor conversion seam.
//!
//! The batch assembler targets a pluggable [`TensorSink`] so the core never
//! binds to a specific tensor framework; consuming frameworks implement the
//! trait once. The crate ships an ndarray sink.

use crate::error::Result;
use ndarray::Array2;

/// Row-major staging buffer handed to a sink, one per batch.
///
/// Invariant: the three groups are row-aligned — each holds exactly
/// `num_rows` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRows {
    pub num_rows: usize,
    pub num_categorical: usize,
    pub num_continuous: usize,
    pub num_labels: usize,

    /// `num_rows * num_categorical` vocabulary indices, row-major
    pub categorical: Vec<i64>,

    /// `num_rows * num_continuous` values, row-major
    pub continuous: Vec<f32>,

    /// `num_rows * num_labels` values, row-major
    pub labels: Vec<f32>,
}

/// Converts staged rows into a framework-native batch.
pub trait TensorSink: Send + 'static {
    type Batch: Send + 'static;

    fn assemble(&self, rows: BatchRows) -> Result<Self::Batch>;
}

/// A training batch as three row-aligned ndarray tensor groups.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBatch {
    /// `(rows, categorical columns)` vocabulary indices
    pub categorical: Array2<i64>,

    /// `(rows, continuous columns)` values
    pub continuous: Array2<f32>,

    /// `(rows, label columns)` values
    pub labels: Array2<f32>,
}

impl TensorBatch {
    pub fn num_rows(&self) -> usize {
        self.continuous.nrows()
    }
}

/// Default sink producing [`TensorBatch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NdarraySink;

impl TensorSink for NdarraySink {
    type Batch = TensorBatch;

    fn assemble(&self, rows: BatchRows) -> Result<TensorBatch> {
        let categorical =
            Array2::from_shape_vec((rows.num_rows, rows.num_categorical), rows.categorical)
                .expect("row-major categorical buffer matches its dimensions");
        let continuous =
            Array2::from_shape_vec((rows.num_rows, rows.num_continuous), rows.continuous)
                .expect("row-major continuous buffer matches its dimensions");
        let labels = Array2::from_shape_vec((rows.num_rows, rows.num_labels), rows.labels)
            .expect("row-major label buffer matches its dimensions");

        Ok(TensorBatch {
            categorical,
            continuous,
            labels,
        })
    }
}
