//! Typed column registry for tabular datasets.
//!
//! `ColumnSchema` declares which columns are categorical, continuous and
//! label columns. The three sets are disjoint and ordered. `finalize()`
//! produces the immutable output-schema snapshot consumed by the shard
//! writer and the batch assembler; label columns are tracked explicitly as
//! their own group rather than inferred by list membership.

use crate::error::{PipelineError, Result};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Declared role of a column within the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Categorical,
    Continuous,
    Label,
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColumnKind::Categorical => "categorical",
            ColumnKind::Continuous => "continuous",
            ColumnKind::Label => "label",
        };
        f.write_str(s)
    }
}

/// Registry of categorical, continuous and label columns.
///
/// Invariant: no name appears in more than one sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Categorical column names, in declared order
    pub categorical: Vec<String>,

    /// Continuous column names, in declared order
    pub continuous: Vec<String>,

    /// Label column names, excluded from model input
    pub labels: Vec<String>,
}

impl ColumnSchema {
    /// Create a schema, validating disjointness of the three sequences.
    pub fn new(
        categorical: Vec<String>,
        continuous: Vec<String>,
        labels: Vec<String>,
    ) -> Result<Self> {
        let schema = Self {
            categorical,
            continuous,
            labels,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Check the disjointness invariant and reject empty names.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut duplicates = Vec::new();

        for name in self.all_columns() {
            if name.is_empty() {
                return Err(PipelineError::Config(
                    "column names must be non-empty".to_string(),
                ));
            }
            if !seen.insert(name) {
                duplicates.push(name.to_string());
            }
        }

        if !duplicates.is_empty() {
            return Err(PipelineError::Config(format!(
                "column(s) declared in more than one role: {:?}",
                duplicates
            )));
        }
        Ok(())
    }

    /// All declared column names, categorical first, then continuous, then labels.
    pub fn all_columns(&self) -> impl Iterator<Item = &str> {
        self.categorical
            .iter()
            .chain(self.continuous.iter())
            .chain(self.labels.iter())
            .map(|s| s.as_str())
    }

    /// Role of a column, if declared.
    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        if self.categorical.iter().any(|c| c == name) {
            Some(ColumnKind::Categorical)
        } else if self.continuous.iter().any(|c| c == name) {
            Some(ColumnKind::Continuous)
        } else if self.labels.iter().any(|c| c == name) {
            Some(ColumnKind::Label)
        } else {
            None
        }
    }

    /// Total number of declared columns.
    pub fn num_columns(&self) -> usize {
        self.categorical.len() + self.continuous.len() + self.labels.len()
    }

    /// Produce the immutable output-schema snapshot.
    ///
    /// Model input is categorical + continuous; label columns are carried
    /// as their own group and never leak into the input sets.
    pub fn finalize(&self) -> FinalSchema {
        FinalSchema {
            categorical: self.categorical.clone(),
            continuous: self.continuous.clone(),
            labels: self.labels.clone(),
        }
    }
}

/// Immutable output-schema snapshot produced by [`ColumnSchema::finalize`].
///
/// After the transform pass, categorical columns hold `Int64` vocabulary
/// indices and continuous/label columns hold `Float32` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalSchema {
    pub categorical: Vec<String>,
    pub continuous: Vec<String>,
    pub labels: Vec<String>,
}

impl FinalSchema {
    /// Arrow schema for transformed shard files, in group order.
    pub fn to_arrow(&self) -> Arc<ArrowSchema> {
        let mut fields = Vec::with_capacity(self.num_columns());
        for name in &self.categorical {
            fields.push(Field::new(name, DataType::Int64, true));
        }
        for name in &self.continuous {
            fields.push(Field::new(name, DataType::Float32, true));
        }
        for name in &self.labels {
            fields.push(Field::new(name, DataType::Float32, true));
        }
        Arc::new(ArrowSchema::new(fields))
    }

    /// Column names consumed as model input (labels excluded).
    pub fn model_input(&self) -> impl Iterator<Item = &str> {
        self.categorical
            .iter()
            .chain(self.continuous.iter())
            .map(|s| s.as_str())
    }

    pub fn num_columns(&self) -> usize {
        self.categorical.len() + self.continuous.len() + self.labels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_schema_disjoint_ok() {
        let schema = ColumnSchema::new(
            names(&["StoreType", "Assortment"]),
            names(&["CompetitionDistance"]),
            names(&["Sales"]),
        );
        assert!(schema.is_ok());
    }

    #[test]
    fn test_schema_rejects_duplicate_across_roles() {
        let schema = ColumnSchema::new(
            names(&["StoreType"]),
            names(&["StoreType"]),
            names(&["Sales"]),
        );
        assert!(schema.is_err());
    }

    #[test]
    fn test_schema_rejects_empty_name() {
        let schema = ColumnSchema::new(names(&[""]), vec![], vec![]);
        assert!(schema.is_err());
    }

    #[test]
    fn test_kind_of() {
        let schema = ColumnSchema::new(
            names(&["StoreType"]),
            names(&["Distance"]),
            names(&["Sales"]),
        )
        .unwrap();

        assert_eq!(schema.kind_of("StoreType"), Some(ColumnKind::Categorical));
        assert_eq!(schema.kind_of("Distance"), Some(ColumnKind::Continuous));
        assert_eq!(schema.kind_of("Sales"), Some(ColumnKind::Label));
        assert_eq!(schema.kind_of("Missing"), None);
    }

    #[test]
    fn test_finalize_keeps_labels_out_of_model_input() {
        let schema = ColumnSchema::new(
            names(&["StoreType"]),
            names(&["Distance"]),
            names(&["Sales"]),
        )
        .unwrap();

        let final_schema = schema.finalize();
        let input: Vec<&str> = final_schema.model_input().collect();
        assert_eq!(input, vec!["StoreType", "Distance"]);
        assert_eq!(final_schema.labels, vec!["Sales".to_string()]);
    }

    #[test]
    fn test_final_schema_arrow_types() {
        let schema = ColumnSchema::new(
            names(&["StoreType"]),
            names(&["Distance"]),
            names(&["Sales"]),
        )
        .unwrap();

        let arrow = schema.finalize().to_arrow();
        assert_eq!(arrow.field(0).data_type(), &DataType::Int64);
        assert_eq!(arrow.field(1).data_type(), &DataType::Float32);
        assert_eq!(arrow.field(2).data_type(), &DataType::Float32);
    }
}
