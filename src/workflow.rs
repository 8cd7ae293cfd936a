//! Two-phase transform workflow.
//!
//! A `Workflow` binds an ordered operator pipeline to a [`ColumnSchema`].
//! `fit` makes exactly one pass over a traversal and accumulates a
//! [`StatisticsRecord`]; `apply` makes a second pass using the now-fixed
//! statistics and yields transformed chunks lazily. Workflows are plain
//! values passed explicitly to every call — there is no ambient
//! process-wide workflow state.

use crate::chunk::Chunk;
use crate::error::{PipelineError, Result};
use crate::ops::Operator;
use crate::schema::{ColumnSchema, FinalSchema};
use crate::stats::StatisticsRecord;
use std::sync::Arc;

/// Ordered operator pipeline bound to a column schema.
#[derive(Debug, Clone)]
pub struct Workflow {
    schema: ColumnSchema,
    ops: Vec<Operator>,
}

impl Workflow {
    /// Create an empty workflow over a schema.
    pub fn new(schema: ColumnSchema) -> Self {
        Self {
            schema,
            ops: Vec::new(),
        }
    }

    /// Append an operator. Operators execute in the order added; later
    /// operators observe columns as transformed by earlier ones.
    pub fn op(mut self, op: Operator) -> Self {
        self.ops.push(op);
        self
    }

    /// Build a workflow from a schema and an operator list, validating that
    /// every operator column is declared in the schema.
    pub fn from_parts(schema: ColumnSchema, ops: Vec<Operator>) -> Result<Self> {
        let workflow = Self { schema, ops };
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn operators(&self) -> &[Operator] {
        &self.ops
    }

    /// Immutable output-schema snapshot for downstream consumers.
    pub fn output_schema(&self) -> FinalSchema {
        self.schema.finalize()
    }

    /// Check that every operator column is declared somewhere in the schema.
    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        for op in &self.ops {
            let missing: Vec<String> = op
                .columns()
                .iter()
                .filter(|c| self.schema.kind_of(c).is_none())
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(PipelineError::SchemaMismatch {
                    context: format!("workflow operator '{}'", op.name()),
                    missing,
                });
            }
        }
        Ok(())
    }

    /// Fit pass: route every chunk through all operators in declared order,
    /// accumulating sufficient statistics. Stateless operators transform
    /// the in-flight chunk so later statistics observe filled and
    /// log-transformed values; nothing is persisted here — saving a
    /// checkpoint is an explicit caller step.
    pub fn fit<I>(&self, chunks: I) -> Result<StatisticsRecord>
    where
        I: IntoIterator<Item = Result<Chunk>>,
    {
        self.validate()?;

        let mut stats = StatisticsRecord::new();
        let mut num_chunks = 0usize;
        let mut num_rows = 0usize;

        for chunk in chunks {
            let mut chunk = chunk?;
            num_chunks += 1;
            num_rows += chunk.num_rows();

            for op in &self.ops {
                op.transform_stateless(&mut chunk)?;
                op.accumulate(&chunk, &mut stats)?;
            }
        }

        tracing::info!(
            "Fit pass complete: {} rows in {} chunks, {} moment column(s), {} vocabular(ies)",
            num_rows,
            num_chunks,
            stats.moments.len(),
            stats.vocabularies.len()
        );

        Ok(stats)
    }

    /// Check that the supplied statistics cover every statistic-requiring
    /// operator's columns. A gap signals a checkpoint/schema mismatch.
    pub fn validate_statistics(&self, stats: &StatisticsRecord) -> Result<()> {
        for op in &self.ops {
            if !op.requires_statistics() {
                continue;
            }
            let missing: Vec<String> = op
                .columns()
                .iter()
                .filter(|c| match op {
                    Operator::Normalize { .. } => stats.moments_for(c).is_none(),
                    Operator::Categorify { .. } => stats.vocabulary_for(c).is_none(),
                    _ => false,
                })
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(PipelineError::SchemaMismatch {
                    context: format!("checkpoint statistics for operator '{}'", op.name()),
                    missing,
                });
            }
        }
        Ok(())
    }

    /// Apply pass: lazily transform every chunk using fixed statistics.
    ///
    /// Coverage is validated up front, before any chunk is produced.
    /// Re-invoking with an equivalent traversal and the same statistics
    /// yields identical output; the returned iterator owns what it needs,
    /// so a fresh traversal restarts the sequence.
    pub fn apply<I>(&self, chunks: I, stats: Arc<StatisticsRecord>) -> Result<ApplyIter<I::IntoIter>>
    where
        I: IntoIterator<Item = Result<Chunk>>,
    {
        self.validate()?;
        self.validate_statistics(&stats)?;

        Ok(ApplyIter {
            chunks: chunks.into_iter(),
            ops: self.ops.clone(),
            stats,
        })
    }
}

/// Lazy sequence of transformed chunks produced by [`Workflow::apply`].
pub struct ApplyIter<I> {
    chunks: I,
    ops: Vec<Operator>,
    stats: Arc<StatisticsRecord>,
}

impl<I> Iterator for ApplyIter<I>
where
    I: Iterator<Item = Result<Chunk>>,
{
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = match self.chunks.next()? {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(e)),
        };

        let mut chunk = chunk;
        for op in &self.ops {
            if let Err(e) = op.transform(&mut chunk, &self.stats) {
                return Some(Err(e));
            }
        }
        Some(Ok(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ColumnData;
    use crate::ops::FillValue;
    use approx::assert_relative_eq;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn schema() -> ColumnSchema {
        ColumnSchema::new(names(&["StoreType"]), names(&["Distance"]), names(&["Sales"])).unwrap()
    }

    fn store_chunk(index: usize, values: &[&str]) -> Result<Chunk> {
        Chunk::new(
            index,
            vec![(
                "StoreType".to_string(),
                ColumnData::Utf8(values.iter().map(|s| Some(s.to_string())).collect()),
            )],
        )
    }

    fn distance_chunk(index: usize, values: &[Option<f32>]) -> Result<Chunk> {
        Chunk::new(
            index,
            vec![("Distance".to_string(), ColumnData::Float(values.to_vec()))],
        )
    }

    #[test]
    fn test_fit_vocabulary_across_chunks() {
        // StoreType ["a","b","a","c"] in two chunks of two rows.
        let workflow =
            Workflow::new(schema()).op(Operator::categorify(names(&["StoreType"])));

        let chunks = vec![store_chunk(0, &["a", "b"]), store_chunk(1, &["a", "c"])];
        let stats = workflow.fit(chunks).unwrap();

        let vocab = stats.vocabulary_for("StoreType").unwrap();
        assert_eq!(vocab.cardinality(), 4);
        assert_eq!(vocab.index_of("a"), 1);
        assert_eq!(vocab.index_of("b"), 2);
        assert_eq!(vocab.index_of("c"), 3);
    }

    #[test]
    fn test_apply_unseen_category() {
        let workflow =
            Workflow::new(schema()).op(Operator::categorify(names(&["StoreType"])));

        let stats = workflow
            .fit(vec![store_chunk(0, &["a", "b"]), store_chunk(1, &["a", "c"])])
            .unwrap();

        let stats = Arc::new(stats);
        let transformed: Vec<Chunk> = workflow
            .apply(vec![store_chunk(0, &["a", "d"])], stats)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            transformed[0].column("StoreType").unwrap(),
            &ColumnData::Index(vec![1, 0])
        );
    }

    #[test]
    fn test_fit_stats_independent_of_chunking() {
        let workflow = Workflow::new(schema()).op(Operator::normalize(names(&["Distance"])));

        let all = vec![distance_chunk(0, &[Some(1.0), Some(2.0), Some(3.0), Some(4.0)])];
        let split = vec![
            distance_chunk(0, &[Some(1.0)]),
            distance_chunk(1, &[Some(2.0), Some(3.0)]),
            distance_chunk(2, &[Some(4.0)]),
        ];

        let one = workflow.fit(all).unwrap();
        let many = workflow.fit(split).unwrap();

        let m1 = one.moments_for("Distance").unwrap();
        let m2 = many.moments_for("Distance").unwrap();
        assert_eq!(m1.count, m2.count);
        assert_relative_eq!(m1.mean, m2.mean, epsilon = 1e-10);
        assert_relative_eq!(m1.variance(), m2.variance(), epsilon = 1e-10);
        assert_relative_eq!(m1.mean, 2.5);
        assert_relative_eq!(m1.variance(), 1.25);
    }

    #[test]
    fn test_stats_computed_over_filled_distribution() {
        let workflow = Workflow::new(schema())
            .op(Operator::fill_missing(names(&["Distance"]), FillValue::Number(0.0)))
            .op(Operator::normalize(names(&["Distance"])));

        let stats = workflow
            .fit(vec![distance_chunk(0, &[Some(2.0), None, Some(4.0)])])
            .unwrap();

        // Null filled with 0.0 before accumulation: mean over [2, 0, 4] = 2.
        let m = stats.moments_for("Distance").unwrap();
        assert_eq!(m.count, 3);
        assert_relative_eq!(m.mean, 2.0);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let workflow = Workflow::new(schema())
            .op(Operator::categorify(names(&["StoreType"])))
            .op(Operator::normalize(names(&["Distance"])));

        let make_chunks = || {
            vec![Chunk::new(
                0,
                vec![
                    (
                        "StoreType".to_string(),
                        ColumnData::Utf8(vec![Some("a".to_string()), Some("b".to_string())]),
                    ),
                    (
                        "Distance".to_string(),
                        ColumnData::Float(vec![Some(1.0), Some(3.0)]),
                    ),
                ],
            )]
        };

        let stats = Arc::new(workflow.fit(make_chunks()).unwrap());

        let first: Vec<Chunk> = workflow
            .apply(make_chunks(), stats.clone())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let second: Vec<Chunk> = workflow
            .apply(make_chunks(), stats)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.column("StoreType"), b.column("StoreType"));
            assert_eq!(a.column("Distance"), b.column("Distance"));
        }
    }

    #[test]
    fn test_apply_rejects_uncovered_statistics() {
        let workflow =
            Workflow::new(schema()).op(Operator::categorify(names(&["StoreType"])));

        let err = workflow
            .apply(vec![store_chunk(0, &["a"])], Arc::new(StatisticsRecord::new()))
            .err();
        assert!(matches!(err, Some(PipelineError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_workflow_rejects_undeclared_op_column() {
        let workflow = Workflow::new(schema()).op(Operator::normalize(names(&["Nope"])));
        let err = workflow.validate().unwrap_err();
        match err {
            PipelineError::SchemaMismatch { missing, .. } => {
                assert_eq!(missing, vec!["Nope".to_string()]);
            }
            other => panic!("expected SchemaMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_label_can_pass_through_continuous_ops() {
        // Sales is a label but the log transform may target it during fit;
        // the output schema still keeps it out of model input.
        let workflow = Workflow::new(schema()).op(Operator::log_transform(names(&["Sales"])));
        workflow.validate().unwrap();

        let output = workflow.output_schema();
        assert!(!output.model_input().any(|c| c == "Sales"));
        assert_eq!(output.labels, vec!["Sales".to_string()]);
    }
}
