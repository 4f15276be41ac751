//! Aggregation engine
//!
//! Declarative aggregation requests, the per-shard accumulator tree that
//! evaluates them, and the result trees that merge across shards.
//!
//! Metrics never merge lossy summaries: `avg` travels as a `(sum, count)`
//! pair and is only divided when the value is reported.

mod bucket;
mod metric;
mod result;
mod tree;

pub use bucket::{BucketAccumulator, DateRangeSpec, RangeSpec};
pub use metric::{ExactSum, MetricAccumulator, MetricResult, StatsState, StatsSummary};
pub use result::{AggregationResult, AggregationResults, Bucket};
pub use tree::AggregationTree;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terms bucket size used when a request does not set one
pub const DEFAULT_TERMS_SIZE: usize = 10;

/// Metric reducer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    SumSquares,
    Stats,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Sum => "sum",
            MetricKind::Avg => "avg",
            MetricKind::Min => "min",
            MetricKind::Max => "max",
            MetricKind::Count => "count",
            MetricKind::SumSquares => "sum_squares",
            MetricKind::Stats => "stats",
        }
    }
}

/// Bucket partitioning kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    Terms,
    Range,
    DateRange,
}

impl BucketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::Terms => "terms",
            BucketKind::Range => "range",
            BucketKind::DateRange => "date_range",
        }
    }
}

/// One node of an aggregation request tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationRequest {
    Metric { kind: MetricKind, field: String },
    Bucket(BucketRequest),
}

impl AggregationRequest {
    pub fn metric(kind: MetricKind, field: impl Into<String>) -> Self {
        AggregationRequest::Metric {
            kind,
            field: field.into(),
        }
    }

    pub fn sum(field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Sum, field)
    }

    pub fn avg(field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Avg, field)
    }

    pub fn min(field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Min, field)
    }

    pub fn max(field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Max, field)
    }

    pub fn count(field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Count, field)
    }

    pub fn sum_squares(field: impl Into<String>) -> Self {
        Self::metric(MetricKind::SumSquares, field)
    }

    pub fn stats(field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Stats, field)
    }

    pub fn field(&self) -> &str {
        match self {
            AggregationRequest::Metric { field, .. } => field,
            AggregationRequest::Bucket(bucket) => &bucket.field,
        }
    }
}

impl From<BucketRequest> for AggregationRequest {
    fn from(bucket: BucketRequest) -> Self {
        AggregationRequest::Bucket(bucket)
    }
}

/// Bucket aggregation request with its nested sub-aggregations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRequest {
    pub kind: BucketKind,
    pub field: String,

    /// Number of terms buckets kept in the final merged result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,

    /// Literal prefix filter on terms (wins over `regex`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Regular expression filter on terms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<RangeSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub date_ranges: Vec<DateRangeSpec>,

    #[serde(default, skip_serializing_if = "AggregationsRequest::is_empty")]
    pub sub_aggregations: AggregationsRequest,
}

impl BucketRequest {
    fn new(kind: BucketKind, field: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            size: None,
            prefix: None,
            regex: None,
            ranges: Vec::new(),
            date_ranges: Vec::new(),
            sub_aggregations: AggregationsRequest::new(),
        }
    }

    /// Group documents by analyzed term; keep the top `size` buckets
    pub fn terms(field: impl Into<String>, size: usize) -> Self {
        let mut req = Self::new(BucketKind::Terms, field);
        req.size = Some(size);
        req
    }

    /// Group documents into half-open numeric ranges
    pub fn range(field: impl Into<String>, ranges: Vec<RangeSpec>) -> Self {
        let mut req = Self::new(BucketKind::Range, field);
        req.ranges = ranges;
        req
    }

    /// Group documents into half-open date ranges over an epoch-millis field
    pub fn date_range(field: impl Into<String>, ranges: Vec<DateRangeSpec>) -> Self {
        let mut req = Self::new(BucketKind::DateRange, field);
        req.date_ranges = ranges;
        req
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_prefix_filter(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_regex_filter(mut self, pattern: impl Into<String>) -> Self {
        self.regex = Some(pattern.into());
        self
    }

    pub fn with_sub_aggregation(
        mut self,
        name: impl Into<String>,
        request: impl Into<AggregationRequest>,
    ) -> Self {
        self.add_sub_aggregation(name, request);
        self
    }

    pub fn add_sub_aggregation(
        &mut self,
        name: impl Into<String>,
        request: impl Into<AggregationRequest>,
    ) {
        self.sub_aggregations.add(name, request);
    }

    /// Size used for final truncation of terms buckets
    pub fn effective_size(&self, default_size: usize) -> usize {
        match self.size {
            Some(size) if size > 0 => size,
            _ => default_size,
        }
    }
}

/// Name-keyed set of sibling aggregation requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationsRequest(BTreeMap<String, AggregationRequest>);

impl AggregationsRequest {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add (or replace) a named aggregation
    pub fn add(&mut self, name: impl Into<String>, request: impl Into<AggregationRequest>) {
        self.0.insert(name.into(), request.into());
    }

    pub fn with(mut self, name: impl Into<String>, request: impl Into<AggregationRequest>) -> Self {
        self.add(name, request);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AggregationRequest> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AggregationRequest)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every field read anywhere in the tree
    pub fn fields(&self) -> Vec<String> {
        let mut fields = std::collections::BTreeSet::new();
        collect_fields(self, &mut fields);
        fields.into_iter().collect()
    }
}

fn collect_fields(request: &AggregationsRequest, out: &mut std::collections::BTreeSet<String>) {
    for (_, agg) in request.iter() {
        out.insert(agg.field().to_string());
        if let AggregationRequest::Bucket(bucket) = agg {
            collect_fields(&bucket.sub_aggregations, out);
        }
    }
}
