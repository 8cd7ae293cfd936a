//! Throughput monitoring and metrics collection.

use crate::error::Result;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for the pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total rows read from source files
    pub rows_read: AtomicU64,

    /// Number of chunks read
    pub chunks_read: AtomicU64,

    /// Number of chunks pushed through the operator pipeline
    pub chunks_transformed: AtomicU64,

    /// Number of batches handed to the training side
    pub batches_assembled: AtomicU64,

    /// Total bytes staged in memory by the reader
    pub bytes_read: AtomicU64,

    /// Total bytes written to shard files
    pub bytes_written: AtomicU64,

    /// Number of failed operations
    pub failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage timing (in microseconds for precision)
    /// Time spent reading source files (microseconds)
    pub read_us: AtomicU64,

    /// Time spent in operators (microseconds)
    pub transform_us: AtomicU64,

    /// Time spent writing shards (microseconds)
    pub shard_write_us: AtomicU64,

    /// Time spent staging and assembling batches (microseconds)
    pub assemble_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record rows read.
    pub fn add_rows_read(&self, rows: u64) {
        self.rows_read.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record a chunk read.
    pub fn add_chunk_read(&self) {
        self.chunks_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transformed chunk.
    pub fn add_chunk_transformed(&self) {
        self.chunks_transformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an assembled batch.
    pub fn add_batch_assembled(&self) {
        self.batches_assembled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes read.
    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes written.
    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a failure.
    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent reading (in microseconds).
    pub fn add_read_time(&self, duration: Duration) {
        self.read_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent in operators (in microseconds).
    pub fn add_transform_time(&self, duration: Duration) {
        self.transform_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent writing shards (in microseconds).
    pub fn add_shard_write_time(&self, duration: Duration) {
        self.shard_write_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent assembling batches (in microseconds).
    pub fn add_assemble_time(&self, duration: Duration) {
        self.assemble_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get rows per second since start.
    pub fn rows_per_second(&self) -> f64 {
        let rows = self.rows_read.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            rows as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get chunks per second since start.
    pub fn chunks_per_second(&self) -> f64 {
        let chunks = self.chunks_read.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            chunks as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_read: self.rows_read.load(Ordering::Relaxed),
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            chunks_transformed: self.chunks_transformed.load(Ordering::Relaxed),
            batches_assembled: self.batches_assembled.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            rows_per_second: self.rows_per_second(),
            chunks_per_second: self.chunks_per_second(),
            read_secs: self.read_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            transform_secs: self.transform_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            shard_write_secs: self.shard_write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            assemble_secs: self.assemble_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub rows_read: u64,
    pub chunks_read: u64,
    pub chunks_transformed: u64,
    pub batches_assembled: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub rows_per_second: f64,
    pub chunks_per_second: f64,
    /// Total CPU time spent reading (seconds, summed across threads)
    pub read_secs: f64,
    /// Total CPU time spent in operators (seconds, summed across threads)
    pub transform_secs: f64,
    /// Total CPU time spent writing shards (seconds, summed across threads)
    pub shard_write_secs: f64,
    /// Total CPU time spent assembling batches (seconds, summed across threads)
    pub assemble_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path.display());
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total_stage_time =
            self.read_secs + self.transform_secs + self.shard_write_secs + self.assemble_secs;
        let (read_pct, transform_pct, write_pct, assemble_pct) = if total_stage_time > 0.0 {
            (
                self.read_secs / total_stage_time * 100.0,
                self.transform_secs / total_stage_time * 100.0,
                self.shard_write_secs / total_stage_time * 100.0,
                self.assemble_secs / total_stage_time * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Rows: {} | Chunks: {} read, {} transformed | Batches: {} | \
             Read: {:.2} MB | Write: {:.2} MB | \
             Rate: {:.0} rows/s | Failures: {} | Elapsed: {:.1}s | \
             Time: read {:.0}% | transform {:.0}% | write {:.0}% | assemble {:.0}%",
            self.rows_read,
            self.chunks_read,
            self.chunks_transformed,
            self.batches_assembled,
            self.bytes_read as f64 / (1024.0 * 1024.0),
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.rows_per_second,
            self.failures,
            self.elapsed.as_secs_f64(),
            read_pct,
            transform_pct,
            write_pct,
            assemble_pct,
        )
    }
}

/// Periodic metrics reporter running on its own thread.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Report until the shutdown channel is signalled or dropped.
    pub fn run(self, shutdown: Receiver<()>) {
        let interval = Duration::from_secs(self.interval_secs);
        loop {
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    tracing::info!("{}", self.metrics.snapshot());
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }
}
