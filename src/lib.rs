//! Tabular feature-engineering and batch-loading pipeline.
//!
//! Out-of-core preprocessing for tabular training data: datasets larger
//! than memory stream through an operator pipeline in bounded columnar
//! chunks, and the transformed output streams back out as shuffled,
//! fixed-size tensor batches.
//!
//! # Architecture
//!
//! - **Workflow**: two-pass fit/apply over an ordered operator list
//! - **I/O**: chunked Parquet reading and sharded Parquet writing
//! - **Checkpoint**: immutable fitted state (schema + operators + statistics)
//! - **Loader**: batch assembly with shuffling and bounded prefetch
//!
//! # Usage
//!
//! ```no_run
//! use tabflow::{run_fit, run_transform, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml".as_ref())?;
//!     run_fit(&config)?;
//!     run_transform(&config)?;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod error;
pub mod io;
pub mod loader;
pub mod ops;
pub mod schema;
pub mod stats;
pub mod workflow;

pub use chunk::{Chunk, ColumnData};
pub use config::Config;
pub use error::{PipelineError, Result};
pub use io::{ChunkedDatasetReader, DatasetManifest, ShardWriter};
pub use loader::{BatchAssembler, Metrics, NdarraySink, PrefetchLoader, ShufflePolicy, TensorBatch};
pub use ops::{FillValue, Operator};
pub use schema::{ColumnSchema, FinalSchema};
pub use stats::StatisticsRecord;
pub use workflow::Workflow;

use loader::MetricsReporter;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Handle to the optional periodic metrics reporter.
struct ReporterGuard {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

fn start_reporter(config: &Config, metrics: &Arc<Metrics>) -> Option<ReporterGuard> {
    if !config.processing.enable_metrics {
        return None;
    }
    let reporter = MetricsReporter::new(metrics.clone(), config.processing.metrics_interval_secs);
    let (shutdown, rx) = mpsc::channel();
    let handle = std::thread::spawn(move || reporter.run(rx));
    Some(ReporterGuard { shutdown, handle })
}

fn stop_reporter(config: &Config, metrics: &Arc<Metrics>, guard: Option<ReporterGuard>) -> Result<()> {
    if let Some(guard) = guard {
        let _ = guard.shutdown.send(());
        let _ = guard.handle.join();
    }
    if let Some(path) = &config.processing.metrics_output_path {
        metrics.snapshot().save_to_file(path)?;
    }
    Ok(())
}

fn source_reader(config: &Config) -> Result<ChunkedDatasetReader> {
    let reader = ChunkedDatasetReader::new(
        config.input.paths.clone(),
        Arc::new(config.columns.clone()),
        config.input.chunk_rows,
    )?;
    Ok(reader.with_max_chunk_bytes(config.input.max_chunk_mb * 1024 * 1024))
}

/// Observe chunks flowing out of a traversal without changing them,
/// attributing the time spent pulling each chunk to the read stage.
fn track_chunks<I>(mut chunks: I, metrics: Arc<Metrics>) -> impl Iterator<Item = Result<Chunk>>
where
    I: Iterator<Item = Result<Chunk>>,
{
    std::iter::from_fn(move || {
        let start = Instant::now();
        let result = chunks.next()?;
        metrics.add_read_time(start.elapsed());
        match &result {
            Ok(chunk) => {
                metrics.add_chunk_read();
                metrics.add_rows_read(chunk.num_rows() as u64);
                metrics.add_bytes_read(chunk.estimated_bytes());
            }
            Err(_) => metrics.add_failure(),
        }
        Some(result)
    })
}

/// Observe assembled batches, attributing the time spent producing each
/// one to the assemble stage. Logs a final snapshot when the traversal
/// ends and `report` is set.
fn track_batches<I, B>(
    mut batches: I,
    metrics: Arc<Metrics>,
    report: bool,
) -> impl Iterator<Item = Result<B>>
where
    I: Iterator<Item = Result<B>> + Send + 'static,
    B: Send + 'static,
{
    std::iter::from_fn(move || {
        let start = Instant::now();
        let result = batches.next();
        match &result {
            Some(Ok(_)) => {
                metrics.add_assemble_time(start.elapsed());
                metrics.add_batch_assembled();
            }
            Some(Err(_)) => {
                metrics.add_assemble_time(start.elapsed());
                metrics.add_failure();
            }
            None => {
                if report {
                    tracing::info!("Loader finished: {}", metrics.snapshot());
                }
            }
        }
        result
    })
}

/// Fit pass: one traversal of the raw dataset, then persist the fitted
/// workflow and statistics as a new checkpoint.
pub fn run_fit(config: &Config) -> Result<StatisticsRecord> {
    config.validate()?;

    let workflow = Workflow::from_parts(config.columns.clone(), config.ops.clone())?;
    let reader = source_reader(config)?;

    let metrics = Metrics::new();
    let reporter = start_reporter(config, &metrics);

    tracing::info!(
        "Fitting workflow ({} operator(s)) over {} file(s)",
        workflow.operators().len(),
        reader.paths().len()
    );

    // Fit time net of the chunk reads counted inside the traversal.
    let start = Instant::now();
    let result = workflow.fit(track_chunks(reader.traverse()?, metrics.clone()));
    let read = Duration::from_micros(metrics.read_us.load(Ordering::Relaxed));
    metrics.add_transform_time(start.elapsed().saturating_sub(read));

    stop_reporter(config, &metrics, reporter)?;
    let stats = result?;

    checkpoint::save(&config.checkpoint.dir, &workflow, &stats)?;
    Ok(stats)
}

/// Apply pass: load the checkpoint, transform a fresh traversal with its
/// fixed statistics and write the output shards.
pub fn run_transform(config: &Config) -> Result<DatasetManifest> {
    config.validate()?;

    let checkpoint = checkpoint::load(&config.checkpoint.dir)?;
    let workflow = checkpoint.workflow()?;
    let statistics = Arc::new(checkpoint.statistics);

    let reader = ChunkedDatasetReader::new(
        config.input.paths.clone(),
        Arc::new(checkpoint.schema.clone()),
        config.input.chunk_rows,
    )?
    .with_max_chunk_bytes(config.input.max_chunk_mb * 1024 * 1024);

    let metrics = Metrics::new();
    let reporter = start_reporter(config, &metrics);

    let mut writer = ShardWriter::create(
        &config.output.dir,
        workflow.output_schema(),
        config.output.parts_per_worker,
    )?;

    let run = || -> Result<DatasetManifest> {
        let mut transformed = workflow.apply(
            track_chunks(reader.traverse()?, metrics.clone()),
            statistics.clone(),
        )?;

        loop {
            // Pulling a chunk covers both the read and the operators;
            // the read share is already counted inside track_chunks.
            let read_before = metrics.read_us.load(Ordering::Relaxed);
            let start = Instant::now();
            let Some(chunk) = transformed.next() else {
                break;
            };
            let read_delta = metrics.read_us.load(Ordering::Relaxed) - read_before;
            metrics.add_transform_time(
                start.elapsed().saturating_sub(Duration::from_micros(read_delta)),
            );

            let chunk = chunk?;
            metrics.add_chunk_transformed();

            let start = Instant::now();
            let written = writer.write_chunk(chunk)?;
            metrics.add_shard_write_time(start.elapsed());
            metrics.add_bytes_written(written);
        }
        writer.finish(Some(&statistics))
    };

    let result = run();
    stop_reporter(config, &metrics, reporter)?;
    result
}

/// Open the transformed dataset and stream training batches through a
/// bounded prefetcher.
///
/// Shards are traversed in manifest order; shuffle policy, batch size and
/// prefetch depth come from the loader section of the configuration.
pub fn load_batches(config: &Config) -> Result<PrefetchLoader<TensorBatch>> {
    config.validate()?;

    let manifest = DatasetManifest::load(&config.output.dir)?;
    let final_schema = config.columns.finalize();

    let reader = ChunkedDatasetReader::new(
        manifest.shard_paths(&config.output.dir),
        Arc::new(config.columns.clone()),
        config.input.chunk_rows,
    )?;

    let assembler = BatchAssembler::new(
        reader.traverse()?,
        Arc::new(final_schema.clone()),
        NdarraySink,
        config.loader.assembler_config(&final_schema),
    )?;

    let metrics = Metrics::new();
    let batches = track_batches(assembler, metrics, config.processing.enable_metrics);
    PrefetchLoader::spawn(batches, config.loader.prefetch_depth)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
    }
    Ok(())
}
