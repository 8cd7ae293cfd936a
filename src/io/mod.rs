//! I/O operations for chunked Parquet reading and shard writing.

mod reader;
mod shard_writer;

#[cfg(test)]
mod pipeline_roundtrip_tests;

pub use reader::{batch_to_chunk, ChunkedDatasetReader, Traversal};
pub use shard_writer::{
    CategoricalSummary, ContinuousSummary, DatasetManifest, DatasetMetadata, ShardWriter,
};
