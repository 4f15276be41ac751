//! Metric accumulators and their mergeable results

use super::MetricKind;
use crate::error::{Result, ShardfuseError};
use serde::{Deserialize, Serialize};

/// Exact running sum kept as non-overlapping partials.
///
/// Adding values or merging sums in any order yields the same partial
/// total, and `value` rounds it once, so a sum does not depend on how
/// documents were split across shards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExactSum {
    partials: Vec<f64>,
}

impl ExactSum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        let mut x = value;
        let mut kept = 0;
        for j in 0..self.partials.len() {
            let mut y = self.partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[kept] = lo;
                kept += 1;
            }
            x = hi;
        }
        self.partials.truncate(kept);
        if !x.is_finite() {
            // overflow: keep the infinity and stop tracking error terms
            self.partials.clear();
        }
        self.partials.push(x);
    }

    pub fn merge(mut self, other: ExactSum) -> ExactSum {
        for partial in other.partials {
            self.add(partial);
        }
        self
    }

    /// Correctly rounded total
    pub fn value(&self) -> f64 {
        let partials = &self.partials;
        let Some(&last) = partials.last() else {
            return 0.0;
        };
        let mut n = partials.len() - 1;
        let mut hi = last;
        let mut lo = 0.0;
        while n > 0 {
            let x = hi;
            n -= 1;
            let y = partials[n];
            hi = x + y;
            lo = y - (hi - x);
            if lo != 0.0 {
                break;
            }
        }
        // half-way case: the remaining partials decide the rounding direction
        if n > 0 && ((lo < 0.0 && partials[n - 1] < 0.0) || (lo > 0.0 && partials[n - 1] > 0.0)) {
            let y = lo * 2.0;
            let x = hi + y;
            if y == x - hi {
                hi = x;
            }
        }
        hi
    }
}

impl From<f64> for ExactSum {
    fn from(value: f64) -> Self {
        let mut sum = ExactSum::new();
        sum.add(value);
        sum
    }
}

impl PartialEq for ExactSum {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

/// Running state for `stats`: enough to derive every summary after merging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsState {
    pub count: u64,
    pub sum: ExactSum,
    pub sum_squares: ExactSum,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Derived statistics reported from a [`StatsState`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub count: u64,
    pub sum: f64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum_squares: f64,
    pub variance: Option<f64>,
    pub std_dev: Option<f64>,
}

impl StatsState {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum.add(value);
        self.sum_squares.add(value * value);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn merge(self, other: StatsState) -> StatsState {
        StatsState {
            count: self.count + other.count,
            sum: self.sum.merge(other.sum),
            sum_squares: self.sum_squares.merge(other.sum_squares),
            min: min_opt(self.min, other.min),
            max: max_opt(self.max, other.max),
        }
    }

    pub fn summary(&self) -> StatsSummary {
        let sum = self.sum.value();
        let sum_squares = self.sum_squares.value();
        let (avg, variance) = if self.count > 0 {
            let n = self.count as f64;
            let avg = sum / n;
            let variance = (sum_squares / n - avg * avg).max(0.0);
            (Some(avg), Some(variance))
        } else {
            (None, None)
        };
        StatsSummary {
            count: self.count,
            sum,
            avg,
            min: self.min,
            max: self.max,
            sum_squares,
            variance,
            std_dev: variance.map(f64::sqrt),
        }
    }
}

/// Mergeable state of one metric.
///
/// `Min`/`Max` carry `None` when nothing contributed, so an empty shard
/// never looks like a zero-valued document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricResult {
    Sum { sum: ExactSum },
    Count { count: u64 },
    Min { min: Option<f64> },
    Max { max: Option<f64> },
    Avg { sum: ExactSum, count: u64 },
    SumSquares { sum_squares: ExactSum },
    Stats(StatsState),
}

impl MetricResult {
    /// Identity element for `kind`
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Sum => MetricResult::Sum {
                sum: ExactSum::new(),
            },
            MetricKind::Count => MetricResult::Count { count: 0 },
            MetricKind::Min => MetricResult::Min { min: None },
            MetricKind::Max => MetricResult::Max { max: None },
            MetricKind::Avg => MetricResult::Avg {
                sum: ExactSum::new(),
                count: 0,
            },
            MetricKind::SumSquares => MetricResult::SumSquares {
                sum_squares: ExactSum::new(),
            },
            MetricKind::Stats => MetricResult::Stats(StatsState::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricResult::Sum { .. } => MetricKind::Sum,
            MetricResult::Count { .. } => MetricKind::Count,
            MetricResult::Min { .. } => MetricKind::Min,
            MetricResult::Max { .. } => MetricKind::Max,
            MetricResult::Avg { .. } => MetricKind::Avg,
            MetricResult::SumSquares { .. } => MetricKind::SumSquares,
            MetricResult::Stats(_) => MetricKind::Stats,
        }
    }

    /// Reported value; `None` means "no value", e.g. min over nothing.
    /// For `stats` this is the average.
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricResult::Sum { sum } => Some(sum.value()),
            MetricResult::Count { count } => Some(*count as f64),
            MetricResult::Min { min } => *min,
            MetricResult::Max { max } => *max,
            MetricResult::Avg { sum, count } => (*count > 0).then(|| sum.value() / *count as f64),
            MetricResult::SumSquares { sum_squares } => Some(sum_squares.value()),
            MetricResult::Stats(state) => state.summary().avg,
        }
    }

    pub fn stats(&self) -> Option<StatsSummary> {
        match self {
            MetricResult::Stats(state) => Some(state.summary()),
            _ => None,
        }
    }

    fn push(&mut self, value: f64) {
        match self {
            MetricResult::Sum { sum } => sum.add(value),
            MetricResult::Count { count } => *count += 1,
            MetricResult::Min { min } => *min = Some(min.map_or(value, |m| m.min(value))),
            MetricResult::Max { max } => *max = Some(max.map_or(value, |m| m.max(value))),
            MetricResult::Avg { sum, count } => {
                sum.add(value);
                *count += 1;
            }
            MetricResult::SumSquares { sum_squares } => sum_squares.add(value * value),
            MetricResult::Stats(state) => state.push(value),
        }
    }

    /// Combine two partial states of the same kind
    pub fn merge(self, other: MetricResult, path: &str) -> Result<MetricResult> {
        let merged = match (self, other) {
            (MetricResult::Sum { sum: a }, MetricResult::Sum { sum: b }) => {
                MetricResult::Sum { sum: a.merge(b) }
            }
            (MetricResult::Count { count: a }, MetricResult::Count { count: b }) => {
                MetricResult::Count { count: a + b }
            }
            (MetricResult::Min { min: a }, MetricResult::Min { min: b }) => {
                MetricResult::Min { min: min_opt(a, b) }
            }
            (MetricResult::Max { max: a }, MetricResult::Max { max: b }) => {
                MetricResult::Max { max: max_opt(a, b) }
            }
            (
                MetricResult::Avg { sum: sa, count: ca },
                MetricResult::Avg { sum: sb, count: cb },
            ) => MetricResult::Avg {
                sum: sa.merge(sb),
                count: ca + cb,
            },
            (
                MetricResult::SumSquares { sum_squares: a },
                MetricResult::SumSquares { sum_squares: b },
            ) => MetricResult::SumSquares {
                sum_squares: a.merge(b),
            },
            (MetricResult::Stats(a), MetricResult::Stats(b)) => MetricResult::Stats(a.merge(b)),
            (a, b) => {
                return Err(ShardfuseError::shape(
                    path,
                    format!(
                        "cannot merge metric '{}' with '{}'",
                        a.kind().as_str(),
                        b.kind().as_str()
                    ),
                ))
            }
        };
        Ok(merged)
    }
}

fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Reduces one field's numeric values over a document stream
#[derive(Debug, Clone)]
pub struct MetricAccumulator {
    field: String,
    state: MetricResult,
}

impl MetricAccumulator {
    pub fn new(kind: MetricKind, field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            state: MetricResult::empty(kind),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Feed one document's value; absent and non-finite values are skipped
    pub fn consume(&mut self, value: Option<f64>) {
        if let Some(value) = value.filter(|v| v.is_finite()) {
            self.state.push(value);
        }
    }

    pub fn result(&self) -> MetricResult {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(kind: MetricKind, values: &[Option<f64>]) -> MetricResult {
        let mut acc = MetricAccumulator::new(kind, "price");
        for v in values {
            acc.consume(*v);
        }
        acc.result()
    }

    #[test]
    fn test_missing_values_do_not_count() {
        let values = [Some(2.0), None, Some(4.0), Some(f64::NAN)];
        assert_eq!(run(MetricKind::Sum, &values).value(), Some(6.0));
        assert_eq!(run(MetricKind::Count, &values).value(), Some(2.0));
        assert_eq!(run(MetricKind::Avg, &values).value(), Some(3.0));
    }

    #[test]
    fn test_min_max_over_nothing_is_undefined() {
        assert_eq!(run(MetricKind::Min, &[]).value(), None);
        assert_eq!(run(MetricKind::Max, &[None, None]).value(), None);
        assert_eq!(run(MetricKind::Avg, &[]).value(), None);
        // A real zero stays distinguishable from "no data"
        assert_eq!(run(MetricKind::Min, &[Some(0.0)]).value(), Some(0.0));
    }

    #[test]
    fn test_avg_merges_sum_and_count() {
        let shard1 = run(MetricKind::Avg, &[Some(10.0)]);
        let shard2 = run(MetricKind::Avg, &[Some(20.0), Some(30.0), Some(40.0)]);
        // averaging the averages would give 20.0
        let naive = (shard1.value().unwrap() + shard2.value().unwrap()) / 2.0;
        let merged = shard1.merge(shard2, "avg").unwrap();

        assert_eq!(merged.value(), Some(25.0));
        assert_ne!(merged.value().unwrap(), naive);
    }

    #[test]
    fn test_min_merge_ignores_empty_side() {
        let empty = run(MetricKind::Min, &[]);
        let some = run(MetricKind::Min, &[Some(5.0), Some(3.0)]);
        assert_eq!(empty.clone().merge(some.clone(), "m").unwrap().value(), Some(3.0));
        assert_eq!(some.merge(empty, "m").unwrap().value(), Some(3.0));
    }

    #[test]
    fn test_stats_summary() {
        let stats = run(MetricKind::Stats, &[Some(2.0), Some(4.0), Some(4.0), Some(6.0)]);
        let summary = stats.stats().unwrap();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.avg, Some(4.0));
        assert_eq!(summary.min, Some(2.0));
        assert_eq!(summary.max, Some(6.0));
        assert!((summary.variance.unwrap() - 2.0).abs() < 1e-9);
        assert!((summary.std_dev.unwrap() - 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_sums_do_not_depend_on_split() {
        let values = [0.1, 0.2, 0.3, 0.7, 1e16, -1e16];
        let whole = run(MetricKind::Sum, &values.map(Some));

        for parts in 2..=3 {
            let mut merged = MetricResult::empty(MetricKind::Sum);
            for part in 0..parts {
                let slice: Vec<Option<f64>> = values
                    .iter()
                    .skip(part)
                    .step_by(parts)
                    .map(|v| Some(*v))
                    .collect();
                merged = merged.merge(run(MetricKind::Sum, &slice), "sum").unwrap();
            }
            assert_eq!(merged.value(), whole.value(), "{} parts", parts);
        }
        assert!((whole.value().unwrap() - 1.3).abs() < 1e-12);
    }

    #[test]
    fn test_exact_sum_rounds_once() {
        let mut sum = ExactSum::new();
        for _ in 0..10 {
            sum.add(0.1);
        }
        assert_eq!(sum.value(), 1.0);
        assert_eq!(ExactSum::from(1e100).merge(ExactSum::from(-1e100)).value(), 0.0);
        assert_eq!(ExactSum::new().value(), 0.0);
    }

    #[test]
    fn test_kind_mismatch_fails() {
        let sum = MetricResult::empty(MetricKind::Sum);
        let count = MetricResult::empty(MetricKind::Count);
        let err = sum.merge(count, "by_brand/total").unwrap_err();
        assert!(matches!(err, ShardfuseError::ShapeMismatch { .. }));
    }
}
