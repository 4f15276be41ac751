//! Bucket accumulators: terms, numeric ranges and date ranges

use super::result::{AggregationResult, Bucket};
use super::tree::AggregationTree;
use super::{BucketKind, BucketRequest};
use crate::error::{Result, ShardfuseError};
use crate::index::FieldValueExtractor;
use ahash::AHashMap;
use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Named numeric range, `min` inclusive and `max` exclusive.
/// A missing bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl RangeSpec {
    pub fn new(name: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }
}

/// Named date range with RFC 3339 bounds, `start` inclusive and `end` exclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRangeSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl DateRangeSpec {
    pub fn new(name: impl Into<String>, start: Option<&str>, end: Option<&str>) -> Self {
        Self {
            name: name.into(),
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        }
    }

    /// Resolve to an epoch-millisecond [`RangeSpec`]
    pub fn to_range_spec(&self) -> Result<RangeSpec> {
        Ok(RangeSpec {
            name: self.name.clone(),
            min: self.start.as_deref().map(parse_epoch_millis).transpose()?,
            max: self.end.as_deref().map(parse_epoch_millis).transpose()?,
        })
    }
}

fn parse_epoch_millis(raw: &str) -> Result<f64> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis() as f64)
        .map_err(|e| ShardfuseError::InvalidRequest(format!("invalid date '{}': {}", raw, e)))
}

#[derive(Debug, Clone)]
enum TermFilter {
    All,
    Prefix(String),
    Pattern(Regex),
}

impl TermFilter {
    fn from_request(request: &BucketRequest) -> Result<Self> {
        if let Some(prefix) = request.prefix.as_deref().filter(|p| !p.is_empty()) {
            return Ok(TermFilter::Prefix(prefix.to_string()));
        }
        if let Some(pattern) = request.regex.as_deref().filter(|p| !p.is_empty()) {
            let regex = Regex::new(pattern).map_err(|e| {
                ShardfuseError::InvalidRequest(format!(
                    "invalid regex filter '{}' on field '{}': {}",
                    pattern, request.field, e
                ))
            })?;
            return Ok(TermFilter::Pattern(regex));
        }
        Ok(TermFilter::All)
    }

    fn accepts(&self, term: &str) -> bool {
        match self {
            TermFilter::All => true,
            TermFilter::Prefix(prefix) => term.starts_with(prefix.as_str()),
            TermFilter::Pattern(regex) => regex.is_match(term),
        }
    }
}

#[derive(Debug, Clone)]
enum Router {
    Terms {
        filter: TermFilter,
        buckets: AHashMap<String, BucketState>,
    },
    Ranges {
        specs: Vec<RangeSpec>,
        states: Vec<BucketState>,
    },
}

#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    tree: AggregationTree,
}

/// Routes each document to at most one bucket and feeds it to that
/// bucket's own aggregation tree
#[derive(Debug, Clone)]
pub struct BucketAccumulator {
    kind: BucketKind,
    field: String,
    router: Router,
    prototype: AggregationTree,
}

impl BucketAccumulator {
    pub fn build(request: &BucketRequest) -> Result<Self> {
        let prototype = AggregationTree::build(&request.sub_aggregations)?;
        let router = match request.kind {
            BucketKind::Terms => Router::Terms {
                filter: TermFilter::from_request(request)?,
                buckets: AHashMap::new(),
            },
            BucketKind::Range => Self::range_router(request.ranges.clone(), &prototype),
            BucketKind::DateRange => {
                let specs = request
                    .date_ranges
                    .iter()
                    .map(DateRangeSpec::to_range_spec)
                    .collect::<Result<Vec<_>>>()?;
                Self::range_router(specs, &prototype)
            }
        };
        if let Router::Ranges { specs, .. } = &router {
            if specs.is_empty() {
                return Err(ShardfuseError::InvalidRequest(format!(
                    "{} aggregation on '{}' has no ranges",
                    request.kind.as_str(),
                    request.field
                )));
            }
        }

        Ok(Self {
            kind: request.kind,
            field: request.field.clone(),
            router,
            prototype,
        })
    }

    fn range_router(specs: Vec<RangeSpec>, prototype: &AggregationTree) -> Router {
        let states = specs
            .iter()
            .map(|_| BucketState {
                count: 0,
                tree: prototype.clone(),
            })
            .collect();
        Router::Ranges { specs, states }
    }

    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Assign `doc_id` to its bucket, if any
    pub fn consume(&mut self, doc_id: &str, extractor: &dyn FieldValueExtractor) {
        match &mut self.router {
            Router::Terms { filter, buckets } => {
                let terms = extractor.terms(doc_id, &self.field);
                let Some(term) = terms.into_iter().find(|t| filter.accepts(t)) else {
                    return;
                };
                let state = buckets.entry(term).or_insert_with(|| BucketState {
                    count: 0,
                    tree: self.prototype.clone(),
                });
                state.count += 1;
                state.tree.consume(doc_id, extractor);
            }
            Router::Ranges { specs, states } => {
                let Some(value) = extractor.numeric(doc_id, &self.field) else {
                    return;
                };
                if let Some(idx) = specs.iter().position(|spec| spec.contains(value)) {
                    let state = &mut states[idx];
                    state.count += 1;
                    state.tree.consume(doc_id, extractor);
                }
            }
        }
    }

    /// Untruncated result; terms buckets come back sorted count desc, key asc
    pub fn result(&self) -> AggregationResult {
        let buckets = match &self.router {
            Router::Terms { buckets, .. } => {
                let mut out: Vec<Bucket> = buckets
                    .iter()
                    .map(|(term, state)| {
                        Bucket::new(term.clone(), state.count, state.tree.results())
                    })
                    .collect();
                Bucket::sort_by_count(&mut out);
                out
            }
            Router::Ranges { specs, states } => specs
                .iter()
                .zip(states)
                .map(|(spec, state)| {
                    Bucket::new(spec.name.clone(), state.count, state.tree.results())
                        .with_bounds(spec.min, spec.max)
                })
                .collect(),
        };
        AggregationResult::Buckets {
            kind: self.kind,
            field: self.field.clone(),
            buckets,
        }
    }
}
