//! Batch assembly and prefetching for training consumption.

mod batcher;
mod metrics;
mod prefetch;
mod tensor;

pub use batcher::{AssemblerConfig, BatchAssembler, ShufflePolicy};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use prefetch::PrefetchLoader;
pub use tensor::{BatchRows, NdarraySink, TensorBatch, TensorSink};
