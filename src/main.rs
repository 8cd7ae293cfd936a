//! Tabular preprocessing CLI
//!
//! Fits feature-engineering workflows over Parquet datasets and writes
//! transformed shards ready for batch loading.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tabflow::{checkpoint, init_rayon, run_fit, run_transform, stats, Config};

#[derive(Parser)]
#[command(name = "tabflow")]
#[command(about = "Out-of-core tabular feature engineering", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit then transform in one go (default if no command specified)
    Run,

    /// Fit the workflow and write a checkpoint
    Fit,

    /// Transform the dataset using an existing checkpoint
    Transform,

    /// Print recommended embedding table sizes from a checkpoint
    EmbeddingSizes,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            fit_command(&cli.config)?;
            transform_command(&cli.config)?;
        }

        Some(Commands::Fit) => {
            fit_command(&cli.config)?;
        }

        Some(Commands::Transform) => {
            transform_command(&cli.config)?;
        }

        Some(Commands::EmbeddingSizes) => {
            embedding_sizes_command(&cli.config)?;
        }

        Some(Commands::Validate) => {
            validate_command(&cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(&output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: &PathBuf) -> Result<Config> {
    let config = Config::from_file(config_path)?;
    config.validate()?;
    Ok(config)
}

fn fit_command(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    init_rayon(config.processing.rayon_threads)?;

    let stats = run_fit(&config)?;
    tracing::info!(
        "Fit complete: {} moment column(s), {} vocabular(ies); checkpoint at {}",
        stats.moments.len(),
        stats.vocabularies.len(),
        config.checkpoint.dir.display()
    );
    Ok(())
}

fn transform_command(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    init_rayon(config.processing.rayon_threads)?;

    let manifest = run_transform(&config)?;
    tracing::info!(
        "Transform complete: {} rows across {} shard(s) in {}",
        manifest.total_rows,
        manifest.shards.len(),
        config.output.dir.display()
    );
    Ok(())
}

fn embedding_sizes_command(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    let checkpoint = checkpoint::load(&config.checkpoint.dir)?;

    let sizes = stats::embedding_sizes(&checkpoint.statistics);
    if sizes.is_empty() {
        println!("No categorical statistics in checkpoint");
        return Ok(());
    }

    println!("{:<32} {:>12} {:>16}", "column", "cardinality", "embedding width");
    for (name, size) in sizes {
        println!(
            "{:<32} {:>12} {:>16}",
            name, size.cardinality, size.embedding_width
        );
    }
    Ok(())
}

fn validate_command(config_path: &PathBuf) -> Result<()> {
    load_config(config_path)?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: &PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Tabular preprocessing pipeline configuration

# === INPUT: Raw Parquet dataset ===
input:
  # Source files, traversed in the listed order
  paths:
    - "data/train.parquet"

  # Rows per in-memory chunk
  chunk_rows: 100000

  # Abort if a single decoded chunk exceeds this size
  max_chunk_mb: 512

# === COLUMNS: Role of every column the pipeline touches ===
# The three lists must be disjoint. Label columns ride through the
# pipeline but are never part of the model input.
columns:
  categorical: ["StoreType", "Assortment"]
  continuous: ["CompetitionDistance"]
  labels: ["Sales"]

# === OPS: Ordered operator list ===
# Later operators see columns as transformed by earlier ones, so fills
# go first and statistics are computed over the filled distribution.
ops:
  - op: fill_missing
    columns: ["CompetitionDistance"]
    value: 0.0

  - op: log_transform
    columns: ["CompetitionDistance"]

  - op: categorify
    columns: ["StoreType", "Assortment"]

  - op: normalize
    columns: ["CompetitionDistance"]

# === CHECKPOINT: Fitted state ===
# Written once by `fit`, read by `transform`. Never overwritten; point
# each fit at a fresh directory.
checkpoint:
  dir: "out/checkpoint"

# === OUTPUT: Transformed shards ===
output:
  dir: "out/shards"

  # Shard files chunks fan out across (round-robin)
  parts_per_worker: 4

# === LOADER: Training-side batch assembly ===
loader:
  batch_size: 8192

  # none | per_chunk | global | per_worker
  shuffle: per_chunk

  # Shuffle RNG seed; a fixed seed reproduces the batch order
  seed: 0

  # Global shuffle window = buffer_fraction * device_memory_gb
  buffer_fraction: 0.25
  device_memory_gb: 8.0

  # Batches buffered ahead of the training step
  prefetch_depth: 2

# === PROCESSING: Performance tuning ===
processing:
  # Rayon thread pool size for CPU work (null = num CPUs)
  # rayon_threads: 16

  # Print throughput metrics during processing
  enable_metrics: true

  # Metrics reporting interval in seconds
  metrics_interval_secs: 10

  # Optional path to save metrics JSON after a run completes
  # metrics_output_path: "out/metrics.json"
"#;

    std::fs::write(output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
