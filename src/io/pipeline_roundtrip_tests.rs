//! End-to-end pipeline tests: fit, checkpoint, transform, shard write,
//! shard read-back and batch loading against real Parquet files.

use crate::chunk::ColumnData;
use crate::config::{
    CheckpointConfig, Config, InputConfig, LoaderConfig, OutputConfig, ProcessingConfig,
};
use crate::error::{PipelineError, Result};
use crate::io::DatasetMetadata;
use crate::ops::{FillValue, Operator};
use crate::schema::ColumnSchema;
use crate::{load_batches, run_fit, run_transform, DatasetManifest};
use arrow::array::{Float32Array, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn write_parquet(path: &Path, store: &[Option<&str>], dist: &[Option<f64>], sales: &[f32]) {
    let arrow_schema = Arc::new(ArrowSchema::new(vec![
        Field::new("StoreType", DataType::Utf8, true),
        Field::new("Distance", DataType::Float64, true),
        Field::new("Sales", DataType::Float32, false),
    ]));

    let batch = RecordBatch::try_new(
        arrow_schema.clone(),
        vec![
            Arc::new(StringArray::from(store.to_vec())),
            Arc::new(Float64Array::from(dist.to_vec())),
            Arc::new(Float32Array::from(sales.to_vec())),
        ],
    )
    .unwrap();

    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, arrow_schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

/// Ten rows across two files, with nulls in both column roles.
fn write_dataset(dir: &Path) -> Vec<PathBuf> {
    let a = dir.join("train_0.parquet");
    let b = dir.join("train_1.parquet");
    write_parquet(
        &a,
        &[Some("a"), Some("b"), None, Some("a"), Some("c"), Some("b")],
        &[Some(1000.0), None, Some(3000.0), Some(500.0), None, Some(1500.0)],
        &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0],
    );
    write_parquet(
        &b,
        &[Some("c"), Some("a"), Some("b"), Some("a")],
        &[Some(2000.0), Some(250.0), None, Some(750.0)],
        &[70.0, 80.0, 90.0, 100.0],
    );
    vec![a, b]
}

fn test_config(root: &Path, paths: Vec<PathBuf>) -> Config {
    Config {
        input: InputConfig {
            paths,
            chunk_rows: 4,
            max_chunk_mb: 64,
        },
        columns: ColumnSchema::new(names(&["StoreType"]), names(&["Distance"]), names(&["Sales"]))
            .unwrap(),
        ops: vec![
            Operator::fill_missing(names(&["Distance"]), FillValue::Number(0.0)),
            Operator::fill_missing(names(&["StoreType"]), FillValue::Category("none".to_string())),
            Operator::categorify(names(&["StoreType"])),
            Operator::normalize(names(&["Distance"])),
        ],
        checkpoint: CheckpointConfig {
            dir: root.join("checkpoint"),
        },
        output: OutputConfig {
            dir: root.join("shards"),
            parts_per_worker: 2,
        },
        loader: LoaderConfig {
            batch_size: 4,
            ..Default::default()
        },
        processing: ProcessingConfig {
            enable_metrics: false,
            ..Default::default()
        },
    }
}

#[test]
fn test_fit_writes_checkpoint_with_statistics() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), write_dataset(tmp.path()));

    let stats = run_fit(&config).unwrap();

    assert!(config.checkpoint.dir.join("workflow.json").is_file());
    assert!(config.checkpoint.dir.join("statistics.json").is_file());

    // Vocabulary covers a, b, none (filled null), c in first-seen order
    // plus the reserved unknown slot.
    let vocab = stats.vocabulary_for("StoreType").unwrap();
    assert_eq!(vocab.cardinality(), 5);
    assert_eq!(vocab.index_of("a"), 1);
    assert_eq!(vocab.index_of("none"), 3);

    // Moments cover all ten rows, nulls filled with 0.0 first.
    let moments = stats.moments_for("Distance").unwrap();
    assert_eq!(moments.count, 10);
    let expected_mean =
        (1000.0 + 0.0 + 3000.0 + 500.0 + 0.0 + 1500.0 + 2000.0 + 250.0 + 0.0 + 750.0) / 10.0;
    assert!((moments.mean - expected_mean).abs() < 1e-6);
}

#[test]
fn test_transform_writes_shards_and_metadata() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), write_dataset(tmp.path()));

    run_fit(&config).unwrap();
    let manifest = run_transform(&config).unwrap();

    // Chunks split per file: [4, 2] from the first, [4] from the second.
    // Round-robin over 2 parts puts chunks 0 and 2 in part 0.
    assert_eq!(manifest.total_rows, 10);
    assert_eq!(manifest.shard_rows, vec![8, 2]);

    let reloaded = DatasetManifest::load(&config.output.dir).unwrap();
    assert_eq!(reloaded.shards, manifest.shards);

    let metadata: DatasetMetadata = serde_json::from_str(
        &std::fs::read_to_string(config.output.dir.join("metadata.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(metadata.row_count, 10);
    assert!(metadata.continuous.contains_key("Distance"));
    let cat = metadata.categorical.get("StoreType").unwrap();
    assert_eq!(cat.cardinality, 5);
}

#[test]
fn test_round_trip_batches_preserve_rows() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), write_dataset(tmp.path()));

    run_fit(&config).unwrap();
    run_transform(&config).unwrap();

    let loader = load_batches(&config).unwrap();
    let batches: Vec<_> = loader.map(|b| b.unwrap()).collect();

    let sizes: Vec<usize> = batches.iter().map(|b| b.num_rows()).collect();
    assert_eq!(sizes.iter().sum::<usize>(), 10);
    assert!(sizes[..sizes.len() - 1].iter().all(|&s| s == 4));

    // Every categorical index is a known vocabulary slot (no raw strings
    // and no unknowns: fit and transform saw the same data).
    for batch in &batches {
        for &index in batch.categorical.iter() {
            assert!((1..=4).contains(&index));
        }
    }

    // Normalized values sum to ~0 over the full dataset.
    let sum: f32 = batches
        .iter()
        .flat_map(|b| b.continuous.iter().copied())
        .sum();
    assert!(sum.abs() < 1e-3);

    // Labels ride along unscaled; compare as a multiset since shard
    // fan-out reorders chunks.
    let mut labels: Vec<i64> = batches
        .iter()
        .flat_map(|b| b.labels.iter().map(|&v| v as i64))
        .collect();
    labels.sort_unstable();
    assert_eq!(labels, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
}

#[test]
fn test_unseen_category_round_trips_as_unknown() {
    let tmp = TempDir::new().unwrap();
    let train = write_dataset(tmp.path());
    let config = test_config(tmp.path(), train);
    run_fit(&config).unwrap();

    // Serve a file containing a category the fit never saw.
    let serve = tmp.path().join("serve.parquet");
    write_parquet(
        &serve,
        &[Some("a"), Some("zzz")],
        &[Some(1000.0), Some(2000.0)],
        &[1.0, 2.0],
    );
    let mut serve_config = test_config(tmp.path(), vec![serve]);
    serve_config.checkpoint.dir = config.checkpoint.dir.clone();
    serve_config.output.dir = tmp.path().join("serve_shards");

    run_transform(&serve_config).unwrap();

    let reader = crate::ChunkedDatasetReader::new(
        DatasetManifest::load(&serve_config.output.dir)
            .unwrap()
            .shard_paths(&serve_config.output.dir),
        Arc::new(serve_config.columns.clone()),
        16,
    )
    .unwrap();
    let chunks: Vec<_> = reader.traverse().unwrap().collect::<Result<_>>().unwrap();

    // "a" keeps its fitted index, "zzz" maps to the reserved unknown 0.
    assert_eq!(
        chunks[0].column("StoreType").unwrap(),
        &ColumnData::Index(vec![1, 0])
    );
}

#[test]
fn test_metrics_snapshot_records_stage_times() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path(), write_dataset(tmp.path()));
    let metrics_path = tmp.path().join("metrics.json");
    config.processing.metrics_output_path = Some(metrics_path.clone());

    run_fit(&config).unwrap();
    let fit: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&metrics_path).unwrap()).unwrap();
    assert_eq!(fit["rows_read"], 10);
    assert_eq!(fit["chunks_read"], 3);
    assert!(fit["read_secs"].as_f64().unwrap() > 0.0);

    run_transform(&config).unwrap();
    let transform: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&metrics_path).unwrap()).unwrap();
    assert_eq!(transform["chunks_transformed"], 3);
    assert!(transform["bytes_written"].as_u64().unwrap() > 0);
    assert!(transform["shard_write_secs"].as_f64().unwrap() > 0.0);
}

#[test]
fn test_transform_without_checkpoint_fails() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), write_dataset(tmp.path()));

    let err = run_transform(&config).unwrap_err();
    assert!(matches!(err, PipelineError::Checkpoint(_)));
}

#[test]
fn test_refit_refuses_existing_checkpoint() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), write_dataset(tmp.path()));

    run_fit(&config).unwrap();
    let err = run_fit(&config).unwrap_err();
    assert!(matches!(err, PipelineError::Checkpoint(_)));
}

#[test]
fn test_transform_is_reproducible() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), write_dataset(tmp.path()));
    run_fit(&config).unwrap();

    let first = run_transform(&config).unwrap();

    let mut second_config = config.clone();
    second_config.output.dir = tmp.path().join("shards_again");
    let second = run_transform(&second_config).unwrap();

    assert_eq!(first.total_rows, second.total_rows);
    assert_eq!(first.shard_rows, second.shard_rows);

    let read_all = |dir: &Path, cfg: &Config| -> Vec<(Vec<i64>, Vec<Option<f32>>)> {
        let manifest = DatasetManifest::load(dir).unwrap();
        let reader = crate::ChunkedDatasetReader::new(
            manifest.shard_paths(dir),
            Arc::new(cfg.columns.clone()),
            4,
        )
        .unwrap();
        reader
            .traverse()
            .unwrap()
            .map(|c| {
                let c = c.unwrap();
                let cats = match c.column("StoreType").unwrap() {
                    ColumnData::Index(v) => v.clone(),
                    other => panic!("expected index, got {:?}", other),
                };
                let conts = match c.column("Distance").unwrap() {
                    ColumnData::Float(v) => v.clone(),
                    other => panic!("expected float, got {:?}", other),
                };
                (cats, conts)
            })
            .collect()
    };

    assert_eq!(
        read_all(&config.output.dir, &config),
        read_all(&second_config.output.dir, &second_config)
    );
}
