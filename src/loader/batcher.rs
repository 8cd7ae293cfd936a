//! Batch assembly with optional shuffling.
//!
//! The assembler consumes transformed chunks, stages their rows in a
//! row-major buffer and emits fixed-size batches through a [`TensorSink`].
//! Every batch except possibly the last has exactly `batch_size` rows;
//! shuffling rearranges rows but never changes batch sizing.
//!
//! Shuffle quality trades against memory through the policy:
//!
//! - `none`        — rows keep traversal order
//! - `per_chunk`   — rows permuted within each chunk before staging
//! - `global`      — rows staged into a bounded window; when the window
//!   fills (or input ends) it is permuted and drained. Chunks larger
//!   than the remaining capacity stage incrementally, so the buffer
//!   never holds more than the window
//! - `per_worker`  — alias for `per_chunk`; sharded inputs already give
//!   each worker a disjoint row range, so the chunk-local permutation is
//!   the worker-local one
//!
//! The first error from upstream or from staging ends the traversal:
//! it is yielded once and every later `next()` returns `None`, so rows
//! already staged are never delivered after a failure.

use crate::chunk::{Chunk, ColumnData};
use crate::error::{PipelineError, Result};
use crate::loader::tensor::{BatchRows, TensorSink};
use crate::schema::FinalSchema;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Row-ordering policy applied during batch assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShufflePolicy {
    None,
    PerChunk,
    Global,
    PerWorker,
}

impl Default for ShufflePolicy {
    fn default() -> Self {
        ShufflePolicy::None
    }
}

/// Assembly parameters; `shuffle_window_rows` only applies to `global`.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub batch_size: usize,
    pub policy: ShufflePolicy,
    pub seed: u64,

    /// Capacity of the global shuffle window, in rows. Derived from the
    /// configured buffer fraction of device memory; the staging buffer
    /// never holds more rows than this.
    pub shuffle_window_rows: usize,
}

/// Streams fixed-size batches out of a chunk traversal.
pub struct BatchAssembler<C, S>
where
    C: Iterator<Item = Result<Chunk>>,
    S: TensorSink,
{
    chunks: C,
    schema: Arc<FinalSchema>,
    sink: S,
    batch_size: usize,
    policy: ShufflePolicy,
    rng: Xoshiro256PlusPlus,
    window_rows: usize,
    buffer: RowBuffer,

    /// Rows at the buffer front already permuted and eligible to drain
    /// (global policy only; other policies drain as rows arrive).
    ready_rows: usize,

    /// Remainder of a chunk that did not fit the window (global only).
    pending: Option<PendingRows>,

    exhausted: bool,
    failed: bool,
}

struct PendingRows {
    chunk: Chunk,
    next_row: usize,
}

impl<C, S> BatchAssembler<C, S>
where
    C: Iterator<Item = Result<Chunk>>,
    S: TensorSink,
{
    pub fn new(chunks: C, schema: Arc<FinalSchema>, sink: S, config: AssemblerConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(PipelineError::Config(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if config.policy == ShufflePolicy::Global && config.shuffle_window_rows < config.batch_size
        {
            return Err(PipelineError::Config(format!(
                "global shuffle window of {} rows cannot hold a batch of {}",
                config.shuffle_window_rows, config.batch_size
            )));
        }

        let buffer = RowBuffer::new(&schema);
        Ok(Self {
            chunks,
            schema,
            sink,
            batch_size: config.batch_size,
            policy: config.policy,
            rng: Xoshiro256PlusPlus::seed_from_u64(config.seed),
            window_rows: config.shuffle_window_rows,
            buffer,
            ready_rows: 0,
            pending: None,
            exhausted: false,
            failed: false,
        })
    }

    fn emit(&mut self, rows: usize) -> Result<S::Batch> {
        let staged = self.buffer.drain(rows);
        self.ready_rows = self.ready_rows.saturating_sub(rows);
        self.sink.assemble(staged)
    }

    fn stage_chunk(&mut self, chunk: Chunk) -> Result<()> {
        match self.policy {
            ShufflePolicy::None => self.buffer.push_chunk(&chunk, &self.schema, None),
            ShufflePolicy::PerChunk | ShufflePolicy::PerWorker => {
                let mut order: Vec<usize> = (0..chunk.num_rows()).collect();
                order.shuffle(&mut self.rng);
                self.buffer.push_chunk(&chunk, &self.schema, Some(&order))
            }
            ShufflePolicy::Global => {
                // Staged incrementally so the buffer never exceeds the
                // window; the remainder waits until batches drain it.
                self.pending = Some(PendingRows { chunk, next_row: 0 });
                self.stage_pending()
            }
        }
    }

    /// Stage pending rows up to the window capacity, permuting the
    /// window once it fills.
    fn stage_pending(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.as_mut() {
            let capacity = self.window_rows - self.buffer.rows();
            let take = capacity.min(pending.chunk.num_rows() - pending.next_row);
            let rows: Vec<usize> = (pending.next_row..pending.next_row + take).collect();
            self.buffer.push_chunk(&pending.chunk, &self.schema, Some(&rows))?;
            pending.next_row += take;
            if pending.next_row >= pending.chunk.num_rows() {
                self.pending = None;
            }
        }
        if self.buffer.rows() >= self.window_rows {
            self.buffer.permute(&mut self.rng);
            self.ready_rows = self.buffer.rows();
        }
        Ok(())
    }

    /// Latch failure so a yielded error ends the traversal.
    fn fuse(&mut self, result: Result<S::Batch>) -> Result<S::Batch> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Rows immediately drainable under the current policy.
    fn available(&self) -> usize {
        match self.policy {
            ShufflePolicy::Global => self.ready_rows,
            _ => self.buffer.rows(),
        }
    }
}

impl<C, S> Iterator for BatchAssembler<C, S>
where
    C: Iterator<Item = Result<Chunk>>,
    S: TensorSink,
{
    type Item = Result<S::Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.available() >= self.batch_size {
                let batch = self.emit(self.batch_size);
                return Some(self.fuse(batch));
            }

            if self.pending.is_some() {
                if let Err(e) = self.stage_pending() {
                    self.failed = true;
                    return Some(Err(e));
                }
                continue;
            }

            if self.exhausted {
                if self.buffer.rows() == 0 {
                    return None;
                }
                // Input ended with an unpermuted tail in the window.
                if self.policy == ShufflePolicy::Global && self.ready_rows < self.buffer.rows() {
                    self.buffer.permute(&mut self.rng);
                    self.ready_rows = self.buffer.rows();
                    continue;
                }
                let tail = self.buffer.rows().min(self.batch_size);
                let batch = self.emit(tail);
                return Some(self.fuse(batch));
            }

            match self.chunks.next() {
                Some(Ok(chunk)) => {
                    if let Err(e) = self.stage_chunk(chunk) {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => self.exhausted = true,
            }
        }
    }
}

/// Row-major staging area shared by all shuffle policies.
struct RowBuffer {
    categorical: Vec<String>,
    continuous: Vec<String>,
    labels: Vec<String>,
    rows: usize,
    cat_values: Vec<i64>,
    cont_values: Vec<f32>,
    label_values: Vec<f32>,
}

impl RowBuffer {
    fn new(schema: &FinalSchema) -> Self {
        Self {
            categorical: schema.categorical.clone(),
            continuous: schema.continuous.clone(),
            labels: schema.labels.clone(),
            rows: 0,
            cat_values: Vec::new(),
            cont_values: Vec::new(),
            label_values: Vec::new(),
        }
    }

    fn rows(&self) -> usize {
        self.rows
    }

    /// Stage a transformed chunk, optionally reordering its rows.
    ///
    /// Categorical columns must already be encoded and continuous/label
    /// columns must be fully dense; a null here means the workflow lacked
    /// a fill step, which is fatal rather than silently imputed.
    fn push_chunk(
        &mut self,
        chunk: &Chunk,
        schema: &FinalSchema,
        permutation: Option<&[usize]>,
    ) -> Result<()> {
        let mut cat_cols: Vec<&[i64]> = Vec::with_capacity(schema.categorical.len());
        for name in &schema.categorical {
            match chunk.require_column(name, "batch assembly")? {
                ColumnData::Index(values) => cat_cols.push(values),
                other => {
                    return Err(PipelineError::UnsupportedType {
                        column: name.clone(),
                        context: "batch assembly".to_string(),
                        expected: "encoded vocabulary indices".to_string(),
                        got: column_kind_name(other).to_string(),
                    })
                }
            }
        }

        let mut dense_cols: Vec<(&str, &[Option<f32>])> =
            Vec::with_capacity(schema.continuous.len() + schema.labels.len());
        for name in schema.continuous.iter().chain(schema.labels.iter()) {
            match chunk.require_column(name, "batch assembly")? {
                ColumnData::Float(values) => dense_cols.push((name.as_str(), values)),
                other => {
                    return Err(PipelineError::UnsupportedType {
                        column: name.clone(),
                        context: "batch assembly".to_string(),
                        expected: "float values".to_string(),
                        got: column_kind_name(other).to_string(),
                    })
                }
            }
        }

        let n_cont = schema.continuous.len();
        let row_order = permutation
            .map(|p| p.to_vec())
            .unwrap_or_else(|| (0..chunk.num_rows()).collect());

        for &row in &row_order {
            for col in &cat_cols {
                self.cat_values.push(col[row]);
            }
            for (slot, (name, col)) in dense_cols.iter().enumerate() {
                let value = col[row].ok_or_else(|| PipelineError::InvalidValue {
                    column: name.to_string(),
                    stage: "batch assembly".to_string(),
                    chunk_index: chunk.index,
                    row,
                    message: "null value reached tensor assembly; add a fill_missing step"
                        .to_string(),
                })?;
                if slot < n_cont {
                    self.cont_values.push(value);
                } else {
                    self.label_values.push(value);
                }
            }
        }

        self.rows += row_order.len();
        Ok(())
    }

    /// Apply one permutation across all staged rows.
    fn permute(&mut self, rng: &mut Xoshiro256PlusPlus) {
        let mut order: Vec<usize> = (0..self.rows).collect();
        order.shuffle(rng);

        self.cat_values = reorder(&self.cat_values, &order, self.categorical.len());
        self.cont_values = reorder(&self.cont_values, &order, self.continuous.len());
        self.label_values = reorder(&self.label_values, &order, self.labels.len());
    }

    /// Remove the first `count` rows as a staged batch.
    fn drain(&mut self, count: usize) -> BatchRows {
        debug_assert!(count <= self.rows);
        let staged = BatchRows {
            num_rows: count,
            num_categorical: self.categorical.len(),
            num_continuous: self.continuous.len(),
            num_labels: self.labels.len(),
            categorical: self
                .cat_values
                .drain(..count * self.categorical.len())
                .collect(),
            continuous: self
                .cont_values
                .drain(..count * self.continuous.len())
                .collect(),
            labels: self.label_values.drain(..count * self.labels.len()).collect(),
        };
        self.rows -= count;
        staged
    }
}

fn reorder<T: Copy>(values: &[T], order: &[usize], width: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for &row in order {
        out.extend_from_slice(&values[row * width..(row + 1) * width]);
    }
    out
}

fn column_kind_name(data: &ColumnData) -> &'static str {
    match data {
        ColumnData::Float(_) => "float values",
        ColumnData::Utf8(_) => "raw strings",
        ColumnData::Index(_) => "encoded vocabulary indices",
    }
}
