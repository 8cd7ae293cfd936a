//! Durable workflow checkpoints.
//!
//! A checkpoint directory holds two files written once after a successful
//! fit pass:
//!
//! - `workflow.json` — serialized column schema + ordered operator list
//! - `statistics.json` — serialized statistics record
//!
//! Writes are all-or-nothing: both files land in a temporary sibling
//! directory which is renamed into place, so a crash mid-save never leaves
//! a partial checkpoint. Checkpoints are immutable once saved; a new fit
//! produces a new checkpoint directory.

use crate::error::{PipelineError, Result};
use crate::ops::Operator;
use crate::schema::ColumnSchema;
use crate::stats::StatisticsRecord;
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const WORKFLOW_FILE: &str = "workflow.json";
const STATISTICS_FILE: &str = "statistics.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct WorkflowManifest {
    version: u32,
    schema: ColumnSchema,
    operators: Vec<Operator>,
}

/// A loaded snapshot of {schema, operators, statistics}.
#[derive(Debug)]
pub struct Checkpoint {
    pub schema: ColumnSchema,
    pub operators: Vec<Operator>,
    pub statistics: StatisticsRecord,
}

impl Checkpoint {
    /// Rebuild the workflow this checkpoint was fitted with.
    pub fn workflow(&self) -> Result<Workflow> {
        Workflow::from_parts(self.schema.clone(), self.operators.clone())
    }
}

/// Persist a fitted workflow and its statistics to `dir`.
///
/// Fails if `dir` already exists; checkpoints are never mutated in place.
pub fn save(dir: &Path, workflow: &Workflow, statistics: &StatisticsRecord) -> Result<()> {
    if dir.exists() {
        return Err(PipelineError::Checkpoint(format!(
            "checkpoint directory already exists: {}",
            dir.display()
        )));
    }
    workflow.validate()?;
    workflow.validate_statistics(statistics)?;

    let staging = staging_path(dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let manifest = WorkflowManifest {
        version: FORMAT_VERSION,
        schema: workflow.schema().clone(),
        operators: workflow.operators().to_vec(),
    };

    let write = || -> Result<()> {
        fs::write(
            staging.join(WORKFLOW_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        fs::write(
            staging.join(STATISTICS_FILE),
            serde_json::to_string_pretty(statistics)?,
        )?;
        Ok(())
    };

    if let Err(e) = write() {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    fs::rename(&staging, dir)?;
    tracing::info!("Checkpoint saved to {}", dir.display());
    Ok(())
}

/// Load a checkpoint written by [`save`].
pub fn load(dir: &Path) -> Result<Checkpoint> {
    if !dir.is_dir() {
        return Err(PipelineError::Checkpoint(format!(
            "checkpoint directory not found: {}",
            dir.display()
        )));
    }

    let manifest: WorkflowManifest =
        serde_json::from_str(&fs::read_to_string(dir.join(WORKFLOW_FILE))?)?;
    if manifest.version != FORMAT_VERSION {
        return Err(PipelineError::Checkpoint(format!(
            "unsupported checkpoint version {} (expected {})",
            manifest.version, FORMAT_VERSION
        )));
    }

    let statistics: StatisticsRecord =
        serde_json::from_str(&fs::read_to_string(dir.join(STATISTICS_FILE))?)?;

    let checkpoint = Checkpoint {
        schema: manifest.schema,
        operators: manifest.operators,
        statistics,
    };

    // A checkpoint whose statistics do not cover its own operators is
    // corrupt, not merely stale.
    checkpoint
        .workflow()?
        .validate_statistics(&checkpoint.statistics)?;

    Ok(checkpoint)
}

fn staging_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "checkpoint".to_string());
    dir.with_file_name(format!(".{}.staging", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ColumnData};
    use crate::ops::FillValue;
    use tempfile::TempDir;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn fitted() -> (Workflow, StatisticsRecord) {
        let schema = ColumnSchema::new(
            names(&["StoreType"]),
            names(&["Distance"]),
            names(&["Sales"]),
        )
        .unwrap();

        let workflow = Workflow::new(schema)
            .op(Operator::fill_missing(names(&["Distance"]), FillValue::Number(0.0)))
            .op(Operator::categorify(names(&["StoreType"])))
            .op(Operator::normalize(names(&["Distance"])));

        let chunk = Chunk::new(
            0,
            vec![
                (
                    "StoreType".to_string(),
                    ColumnData::Utf8(vec![Some("a".to_string()), Some("b".to_string())]),
                ),
                (
                    "Distance".to_string(),
                    ColumnData::Float(vec![Some(10.0), None]),
                ),
            ],
        );

        let stats = workflow.fit(vec![chunk]).unwrap();
        (workflow, stats)
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ckpt");
        let (workflow, stats) = fitted();

        save(&dir, &workflow, &stats).unwrap();
        let loaded = load(&dir).unwrap();

        assert_eq!(&loaded.schema, workflow.schema());
        assert_eq!(loaded.operators, workflow.operators());
        assert_eq!(loaded.statistics, stats);
        assert_eq!(
            loaded
                .statistics
                .vocabulary_for("StoreType")
                .unwrap()
                .index_of("b"),
            2
        );
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ckpt");
        let (workflow, stats) = fitted();

        save(&dir, &workflow, &stats).unwrap();
        let err = save(&dir, &workflow, &stats).unwrap_err();
        assert!(matches!(err, PipelineError::Checkpoint(_)));
    }

    #[test]
    fn test_save_rejects_uncovered_statistics() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ckpt");
        let (workflow, _) = fitted();

        // Empty statistics do not cover categorify/normalize: nothing may
        // be persisted.
        let err = save(&dir, &workflow, &StatisticsRecord::new()).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
        assert!(!dir.exists());
    }

    #[test]
    fn test_load_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let err = load(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, PipelineError::Checkpoint(_)));
    }

    #[test]
    fn test_no_staging_left_behind() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ckpt");
        let (workflow, stats) = fitted();

        save(&dir, &workflow, &stats).unwrap();
        assert!(!staging_path(&dir).exists());
    }
}
