//! Facets: term, numeric-range and date-range counts over matching documents
//!
//! Facets are the lighter sibling of aggregations. Every facet tracks how
//! many values it saw (`total`), how many documents had no value
//! (`missing`) and, once cut down to size, how many values fell outside the
//! reported entries (`other`).

use crate::aggregation::{DateRangeSpec, RangeSpec};
use crate::error::{Result, ShardfuseError};
use crate::index::FieldValueExtractor;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Facet size used when a request does not set one
pub const DEFAULT_FACET_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetKind {
    Terms,
    Numeric,
    Date,
}

/// A single facet request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetRequest {
    pub field: String,
    #[serde(default)]
    pub size: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub numeric_ranges: Vec<RangeSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub date_ranges: Vec<DateRangeSpec>,
}

impl FacetRequest {
    pub fn terms(field: impl Into<String>, size: usize) -> Self {
        Self {
            field: field.into(),
            size,
            numeric_ranges: Vec::new(),
            date_ranges: Vec::new(),
        }
    }

    /// Numeric range facet; add ranges with [`FacetRequest::add_numeric_range`]
    pub fn numeric(field: impl Into<String>, size: usize) -> Self {
        Self::terms(field, size)
    }

    /// Date range facet over an epoch-millisecond field
    pub fn date(field: impl Into<String>, size: usize) -> Self {
        Self::terms(field, size)
    }

    pub fn add_numeric_range(
        &mut self,
        name: impl Into<String>,
        min: Option<f64>,
        max: Option<f64>,
    ) -> &mut Self {
        self.numeric_ranges.push(RangeSpec::new(name, min, max));
        self
    }

    pub fn add_date_range(
        &mut self,
        name: impl Into<String>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> &mut Self {
        self.date_ranges.push(DateRangeSpec::new(name, start, end));
        self
    }

    pub fn kind(&self) -> FacetKind {
        if !self.numeric_ranges.is_empty() {
            FacetKind::Numeric
        } else if !self.date_ranges.is_empty() {
            FacetKind::Date
        } else {
            FacetKind::Terms
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.numeric_ranges.is_empty() && !self.date_ranges.is_empty() {
            return Err(ShardfuseError::InvalidRequest(format!(
                "facet on '{}' mixes numeric and date ranges",
                self.field
            )));
        }
        for range in &self.date_ranges {
            range.to_range_spec()?;
        }
        Ok(())
    }

    fn effective_size(&self, default_size: usize) -> usize {
        if self.size > 0 {
            self.size
        } else {
            default_size
        }
    }
}

/// Name-keyed facet requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacetsRequest(BTreeMap<String, FacetRequest>);

impl FacetsRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, request: FacetRequest) {
        self.0.insert(name.into(), request);
    }

    pub fn get(&self, name: &str) -> Option<&FacetRequest> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FacetRequest)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        self.0.values().try_for_each(FacetRequest::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermFacet {
    pub term: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRangeFacet {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRangeFacet {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    pub count: u64,
}

/// Counts for one facet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetResult {
    pub field: String,
    pub total: u64,
    pub missing: u64,
    pub other: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<TermFacet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub numeric_ranges: Vec<NumericRangeFacet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub date_ranges: Vec<DateRangeFacet>,
}

impl FacetResult {
    fn empty(field: &str) -> Self {
        Self {
            field: field.to_string(),
            total: 0,
            missing: 0,
            other: 0,
            terms: Vec::new(),
            numeric_ranges: Vec::new(),
            date_ranges: Vec::new(),
        }
    }

    pub fn term_count(&self, term: &str) -> Option<u64> {
        self.terms.iter().find(|t| t.term == term).map(|t| t.count)
    }

    pub fn range_count(&self, name: &str) -> Option<u64> {
        self.numeric_ranges
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.count)
            .or_else(|| self.date_ranges.iter().find(|r| r.name == name).map(|r| r.count))
    }

    /// Add another shard's counts into this one
    pub fn merge(&mut self, other: FacetResult) {
        self.total += other.total;
        self.missing += other.missing;
        self.other += other.other;

        for term in other.terms {
            match self.terms.iter_mut().find(|t| t.term == term.term) {
                Some(existing) => existing.count += term.count,
                None => self.terms.push(term),
            }
        }
        for range in other.numeric_ranges {
            match self.numeric_ranges.iter_mut().find(|r| r.name == range.name) {
                Some(existing) => existing.count += range.count,
                None => self.numeric_ranges.push(range),
            }
        }
        for range in other.date_ranges {
            match self.date_ranges.iter_mut().find(|r| r.name == range.name) {
                Some(existing) => existing.count += range.count,
                None => self.date_ranges.push(range),
            }
        }
    }

    /// Sort entries by count and keep `size` of them; dropped counts move to `other`
    pub fn fixup(&mut self, size: usize) {
        self.terms
            .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
        self.numeric_ranges
            .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        self.date_ranges
            .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

        let dropped: u64 = self.terms.iter().skip(size).map(|t| t.count).sum::<u64>()
            + self.numeric_ranges.iter().skip(size).map(|r| r.count).sum::<u64>()
            + self.date_ranges.iter().skip(size).map(|r| r.count).sum::<u64>();
        self.terms.truncate(size);
        self.numeric_ranges.truncate(size);
        self.date_ranges.truncate(size);
        self.other += dropped;
    }
}

/// Name-keyed facet results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacetResults(BTreeMap<String, FacetResult>);

impl FacetResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, result: FacetResult) {
        self.0.insert(name.into(), result);
    }

    pub fn get(&self, name: &str) -> Option<&FacetResult> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FacetResult)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge by facet name; a facet seen on only one side is carried over
    pub fn merge(&mut self, other: FacetResults) {
        for (name, result) in other.0 {
            match self.0.get_mut(&name) {
                Some(existing) => existing.merge(result),
                None => {
                    self.0.insert(name, result);
                }
            }
        }
    }

    /// Cut every facet down to its requested size
    pub fn fixup(&mut self, request: &FacetsRequest, default_size: usize) {
        for (name, result) in self.0.iter_mut() {
            let size = request
                .get(name)
                .map_or(default_size, |r| r.effective_size(default_size));
            result.fixup(size);
        }
    }
}

enum FacetCounter {
    Terms(AHashMap<String, u64>),
    Ranges {
        specs: Vec<RangeSpec>,
        counts: Vec<u64>,
    },
}

struct FacetBuilder {
    request: FacetRequest,
    counter: FacetCounter,
    total: u64,
    missing: u64,
}

impl FacetBuilder {
    fn new(request: &FacetRequest) -> Result<Self> {
        let counter = match request.kind() {
            FacetKind::Terms => FacetCounter::Terms(AHashMap::new()),
            FacetKind::Numeric => FacetCounter::Ranges {
                specs: request.numeric_ranges.clone(),
                counts: vec![0; request.numeric_ranges.len()],
            },
            FacetKind::Date => FacetCounter::Ranges {
                specs: request
                    .date_ranges
                    .iter()
                    .map(DateRangeSpec::to_range_spec)
                    .collect::<Result<Vec<_>>>()?,
                counts: vec![0; request.date_ranges.len()],
            },
        };
        Ok(Self {
            request: request.clone(),
            counter,
            total: 0,
            missing: 0,
        })
    }

    fn consume(&mut self, doc_id: &str, extractor: &dyn FieldValueExtractor) {
        let field = self.request.field.as_str();
        match &mut self.counter {
            FacetCounter::Terms(counts) => {
                let terms = extractor.terms(doc_id, field);
                if terms.is_empty() {
                    self.missing += 1;
                    return;
                }
                for term in terms {
                    *counts.entry(term).or_insert(0) += 1;
                    self.total += 1;
                }
            }
            FacetCounter::Ranges { specs, counts } => {
                let Some(value) = extractor.numeric(doc_id, field) else {
                    self.missing += 1;
                    return;
                };
                for (spec, count) in specs.iter().zip(counts.iter_mut()) {
                    if spec.contains(value) {
                        *count += 1;
                        self.total += 1;
                    }
                }
            }
        }
    }

    fn result(&self) -> FacetResult {
        let mut result = FacetResult::empty(&self.request.field);
        result.total = self.total;
        result.missing = self.missing;
        match &self.counter {
            FacetCounter::Terms(counts) => {
                result.terms = counts
                    .iter()
                    .map(|(term, count)| TermFacet {
                        term: term.clone(),
                        count: *count,
                    })
                    .collect();
            }
            FacetCounter::Ranges { specs, counts } => {
                if self.request.kind() == FacetKind::Date {
                    result.date_ranges = self
                        .request
                        .date_ranges
                        .iter()
                        .zip(counts)
                        .filter(|(_, count)| **count > 0)
                        .map(|(range, count)| DateRangeFacet {
                            name: range.name.clone(),
                            start: range.start.clone(),
                            end: range.end.clone(),
                            count: *count,
                        })
                        .collect();
                } else {
                    result.numeric_ranges = specs
                        .iter()
                        .zip(counts)
                        .filter(|(_, count)| **count > 0)
                        .map(|(spec, count)| NumericRangeFacet {
                            name: spec.name.clone(),
                            min: spec.min,
                            max: spec.max,
                            count: *count,
                        })
                        .collect();
                }
            }
        }
        result
    }
}

/// Evaluates every requested facet over one shard's matching documents.
///
/// Results are left un-fixed-up; truncation happens once, after the merge.
pub struct FacetsBuilder {
    builders: Vec<(String, FacetBuilder)>,
}

impl FacetsBuilder {
    pub fn build(request: &FacetsRequest) -> Result<Self> {
        let builders = request
            .iter()
            .map(|(name, req)| Ok((name.clone(), FacetBuilder::new(req)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { builders })
    }

    pub fn consume(&mut self, doc_id: &str, extractor: &dyn FieldValueExtractor) {
        for (_, builder) in &mut self.builders {
            builder.consume(doc_id, extractor);
        }
    }

    pub fn results(&self) -> FacetResults {
        let mut results = FacetResults::new();
        for (name, builder) in &self.builders {
            results.insert(name.clone(), builder.result());
        }
        results
    }
}
