//! Accumulated sufficient statistics for the fit pass.
//!
//! Moments use Welford's online update with Chan's pairwise merge, so
//! accumulating a dataset as one chunk or as N chunks of varying size
//! produces the same mean and variance (within floating-point tolerance).
//! Vocabularies assign indices in first-seen order with index 0 reserved
//! for values unseen during fit.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Reserved vocabulary index for values unseen during fit.
pub const UNKNOWN_INDEX: i64 = 0;

/// Running count/mean/variance accumulator for one continuous column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the running mean.
    pub m2: f64,
}

impl Moments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Welford single-value update.
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Chan's merge. Associative and commutative, so chunk order does not
    /// affect the final statistic.
    pub fn merge(&mut self, other: &Moments) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * (other.count as f64 / total as f64);
        let m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64 / total as f64);
        self.count = total;
        self.mean = mean;
        self.m2 = m2;
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Deduplicated ordered vocabulary for one categorical column.
///
/// Entry `i` of `entries` maps to index `i + 1`; index 0 is the reserved
/// unknown slot. Only `entries` is serialized; the lookup map is rebuilt
/// on deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "VocabularyEntries", into = "VocabularyEntries")]
pub struct Vocabulary {
    entries: Vec<String>,
    lookup: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VocabularyEntries {
    entries: Vec<String>,
}

impl From<VocabularyEntries> for Vocabulary {
    fn from(v: VocabularyEntries) -> Self {
        let lookup = v
            .entries
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), (i + 1) as i64))
            .collect();
        Self {
            entries: v.entries,
            lookup,
        }
    }
}

impl From<Vocabulary> for VocabularyEntries {
    fn from(v: Vocabulary) -> Self {
        Self { entries: v.entries }
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value, assigning the next index if unseen.
    pub fn observe(&mut self, value: &str) {
        if !self.lookup.contains_key(value) {
            let index = (self.entries.len() + 1) as i64;
            self.entries.push(value.to_string());
            self.lookup.insert(value.to_string(), index);
        }
    }

    /// Index of a value; `UNKNOWN_INDEX` if it was never observed.
    pub fn index_of(&self, value: &str) -> i64 {
        self.lookup.get(value).copied().unwrap_or(UNKNOWN_INDEX)
    }

    /// Vocabulary size including the reserved unknown slot.
    pub fn cardinality(&self) -> usize {
        self.entries.len() + 1
    }

    /// Entries in first-seen order (unknown slot excluded).
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Merge another vocabulary. Entries already present keep their index;
    /// new entries append in the other vocabulary's order.
    pub fn merge(&mut self, other: &Vocabulary) {
        for entry in &other.entries {
            self.observe(entry);
        }
    }
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

/// Per-column statistics accumulated across the fit traversal.
///
/// BTreeMaps keep checkpoint serialization deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub moments: BTreeMap<String, Moments>,
    pub vocabularies: BTreeMap<String, Vocabulary>,
}

impl StatisticsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate non-null continuous values for a column.
    pub fn accumulate_moments<'a>(
        &mut self,
        column: &str,
        values: impl Iterator<Item = &'a Option<f32>>,
    ) {
        let moments = self.moments.entry(column.to_string()).or_default();
        for value in values.flatten() {
            moments.push(*value as f64);
        }
    }

    /// Accumulate non-null categorical values for a column.
    pub fn accumulate_vocabulary<'a>(
        &mut self,
        column: &str,
        values: impl Iterator<Item = &'a Option<String>>,
    ) {
        let vocab = self.vocabularies.entry(column.to_string()).or_default();
        for value in values.flatten() {
            vocab.observe(value);
        }
    }

    pub fn moments_for(&self, column: &str) -> Option<&Moments> {
        self.moments.get(column)
    }

    pub fn vocabulary_for(&self, column: &str) -> Option<&Vocabulary> {
        self.vocabularies.get(column)
    }

    /// Merge statistics from another record (e.g. a parallel partition).
    pub fn merge(&mut self, other: &StatisticsRecord) {
        for (column, moments) in &other.moments {
            self.moments.entry(column.clone()).or_default().merge(moments);
        }
        for (column, vocab) in &other.vocabularies {
            self.vocabularies
                .entry(column.clone())
                .or_default()
                .merge(vocab);
        }
    }
}

/// Derived embedding sizing for one categorical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmbeddingSize {
    /// Vocabulary size including the unknown slot
    pub cardinality: usize,

    /// Dense-vector width assigned to the column
    pub embedding_width: usize,
}

/// Per-column `(cardinality, embedding_width)` derived from fitted
/// vocabularies. Pure function of the statistics; recomputed wherever
/// needed, never stored.
pub fn embedding_sizes(stats: &StatisticsRecord) -> BTreeMap<String, EmbeddingSize> {
    stats
        .vocabularies
        .iter()
        .map(|(column, vocab)| {
            let cardinality = vocab.cardinality();
            (
                column.clone(),
                EmbeddingSize {
                    cardinality,
                    embedding_width: embedding_width(cardinality),
                },
            )
        })
        .collect()
}

/// `min(600, round(1.6 * cardinality^0.56))`
fn embedding_width(cardinality: usize) -> usize {
    let width = (1.6 * (cardinality as f64).powf(0.56)).round() as usize;
    width.min(600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_moments_concrete() {
        // Continuous column [1,2,3,4]: mean=2.5, population variance=1.25.
        let mut m = Moments::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            m.push(v);
        }
        assert_eq!(m.count, 4);
        assert_relative_eq!(m.mean, 2.5);
        assert_relative_eq!(m.variance(), 1.25);
    }

    #[test]
    fn test_moments_merge_matches_single_pass() {
        let values = [1.0, 5.0, -3.0, 7.5, 2.25, 0.0, 11.0];

        let mut single = Moments::new();
        for v in values {
            single.push(v);
        }

        // Split into uneven chunks and merge.
        let mut a = Moments::new();
        let mut b = Moments::new();
        let mut c = Moments::new();
        for v in &values[..2] {
            a.push(*v);
        }
        for v in &values[2..3] {
            b.push(*v);
        }
        for v in &values[3..] {
            c.push(*v);
        }

        let mut merged = Moments::new();
        merged.merge(&a);
        merged.merge(&b);
        merged.merge(&c);

        assert_eq!(merged.count, single.count);
        assert_relative_eq!(merged.mean, single.mean, epsilon = 1e-10);
        assert_relative_eq!(merged.variance(), single.variance(), epsilon = 1e-10);
    }

    #[test]
    fn test_moments_merge_commutative() {
        let mut a = Moments::new();
        let mut b = Moments::new();
        for v in [1.0, 2.0] {
            a.push(v);
        }
        for v in [10.0, 20.0, 30.0] {
            b.push(v);
        }

        let mut ab = a;
        ab.merge(&b);
        let mut ba = b;
        ba.merge(&a);

        assert_relative_eq!(ab.mean, ba.mean, epsilon = 1e-12);
        assert_relative_eq!(ab.m2, ba.m2, epsilon = 1e-9);
    }

    #[test]
    fn test_moments_merge_empty() {
        let mut a = Moments::new();
        a.push(3.0);
        let before = a;
        a.merge(&Moments::new());
        assert_eq!(a, before);

        let mut empty = Moments::new();
        empty.merge(&before);
        assert_eq!(empty, before);
    }

    #[test]
    fn test_vocabulary_first_seen_order() {
        let mut vocab = Vocabulary::new();
        for v in ["a", "b", "a", "c"] {
            vocab.observe(v);
        }

        assert_eq!(vocab.cardinality(), 4);
        assert_eq!(vocab.index_of("a"), 1);
        assert_eq!(vocab.index_of("b"), 2);
        assert_eq!(vocab.index_of("c"), 3);
        assert_eq!(vocab.index_of("d"), UNKNOWN_INDEX);
    }

    #[test]
    fn test_vocabulary_serde_rebuilds_lookup() {
        let mut vocab = Vocabulary::new();
        vocab.observe("x");
        vocab.observe("y");

        let json = serde_json::to_string(&vocab).unwrap();
        let restored: Vocabulary = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.index_of("x"), 1);
        assert_eq!(restored.index_of("y"), 2);
        assert_eq!(restored.index_of("z"), UNKNOWN_INDEX);
    }

    #[test]
    fn test_statistics_record_skips_nulls() {
        let mut stats = StatisticsRecord::new();
        let values = vec![Some(1.0f32), None, Some(3.0)];
        stats.accumulate_moments("x", values.iter());

        let m = stats.moments_for("x").unwrap();
        assert_eq!(m.count, 2);
        assert_relative_eq!(m.mean, 2.0);
    }

    #[test]
    fn test_statistics_record_merge() {
        let mut left = StatisticsRecord::new();
        left.accumulate_moments("x", [Some(1.0f32), Some(2.0)].iter());
        left.accumulate_vocabulary("c", [Some("a".to_string())].iter());

        let mut right = StatisticsRecord::new();
        right.accumulate_moments("x", [Some(3.0f32), Some(4.0)].iter());
        right.accumulate_vocabulary("c", [Some("b".to_string()), Some("a".to_string())].iter());

        left.merge(&right);

        let m = left.moments_for("x").unwrap();
        assert_eq!(m.count, 4);
        assert_relative_eq!(m.mean, 2.5);

        let v = left.vocabulary_for("c").unwrap();
        assert_eq!(v.index_of("a"), 1);
        assert_eq!(v.index_of("b"), 2);
    }

    #[test]
    fn test_embedding_width_formula() {
        // cardinality 4: 1.6 * 4^0.56 = 3.478 -> 3
        assert_eq!(embedding_width(4), 3);
        // Large cardinality caps at 600.
        assert_eq!(embedding_width(100_000_000), 600);
    }

    #[test]
    fn test_embedding_sizes_pure_function() {
        let mut stats = StatisticsRecord::new();
        stats.accumulate_vocabulary(
            "StoreType",
            [Some("a".to_string()), Some("b".to_string()), Some("c".to_string())].iter(),
        );

        let sizes = embedding_sizes(&stats);
        let size = sizes.get("StoreType").unwrap();
        assert_eq!(size.cardinality, 4);
        assert_eq!(size.embedding_width, 3);

        // Recomputing yields identical results.
        assert_eq!(embedding_sizes(&stats), sizes);
    }
}
