//! Aggregation result trees and their cross-shard merge

use super::metric::MetricResult;
use super::{AggregationRequest, AggregationsRequest, BucketKind};
use crate::error::{Result, ShardfuseError};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One bucket with the results of its sub-aggregations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub count: u64,
    /// Bounds of the range this bucket covers (range kinds only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "AggregationResults::is_empty")]
    pub sub_results: AggregationResults,
}

impl Bucket {
    pub fn new(key: impl Into<String>, count: u64, sub_results: AggregationResults) -> Self {
        Self {
            key: key.into(),
            count,
            min: None,
            max: None,
            sub_results,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Count descending, key ascending
    pub fn sort_by_count(buckets: &mut [Bucket]) {
        buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    }
}

/// Result of one named aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationResult {
    Metric {
        field: String,
        /// Reported value, derived from `state`
        value: Option<f64>,
        state: MetricResult,
    },
    Buckets {
        kind: BucketKind,
        field: String,
        buckets: Vec<Bucket>,
    },
}

impl AggregationResult {
    pub fn metric(field: impl Into<String>, state: MetricResult) -> Self {
        AggregationResult::Metric {
            field: field.into(),
            value: state.value(),
            state,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            AggregationResult::Metric { field, .. } | AggregationResult::Buckets { field, .. } => {
                field
            }
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            AggregationResult::Metric { value, .. } => *value,
            AggregationResult::Buckets { .. } => None,
        }
    }

    pub fn state(&self) -> Option<&MetricResult> {
        match self {
            AggregationResult::Metric { state, .. } => Some(state),
            AggregationResult::Buckets { .. } => None,
        }
    }

    pub fn buckets(&self) -> Option<&[Bucket]> {
        match self {
            AggregationResult::Buckets { buckets, .. } => Some(buckets),
            AggregationResult::Metric { .. } => None,
        }
    }

    pub fn bucket(&self, key: &str) -> Option<&Bucket> {
        self.buckets()?.iter().find(|b| b.key == key)
    }

    fn merge(self, other: AggregationResult, path: &str) -> Result<AggregationResult> {
        match (self, other) {
            (
                AggregationResult::Metric { field, state, .. },
                AggregationResult::Metric { state: other, .. },
            ) => Ok(AggregationResult::metric(field, state.merge(other, path)?)),
            (
                AggregationResult::Buckets {
                    kind,
                    field,
                    buckets,
                },
                AggregationResult::Buckets {
                    kind: other_kind,
                    buckets: other_buckets,
                    ..
                },
            ) => {
                if kind != other_kind {
                    return Err(ShardfuseError::shape(
                        path,
                        format!(
                            "cannot merge '{}' buckets with '{}' buckets",
                            kind.as_str(),
                            other_kind.as_str()
                        ),
                    ));
                }
                let buckets = match kind {
                    BucketKind::Terms => merge_terms(buckets, other_buckets, path)?,
                    BucketKind::Range | BucketKind::DateRange => {
                        merge_ranges(buckets, other_buckets, path)?
                    }
                };
                Ok(AggregationResult::Buckets {
                    kind,
                    field,
                    buckets,
                })
            }
            _ => Err(ShardfuseError::shape(
                path,
                "cannot merge a metric with a bucket aggregation",
            )),
        }
    }
}

fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path, name)
    }
}

fn merge_terms(left: Vec<Bucket>, right: Vec<Bucket>, path: &str) -> Result<Vec<Bucket>> {
    let mut order: Vec<Bucket> = Vec::with_capacity(left.len() + right.len());
    let mut positions: AHashMap<String, usize> = AHashMap::with_capacity(left.len());
    for bucket in left.into_iter().chain(right) {
        match positions.get(&bucket.key).copied() {
            Some(idx) => {
                let existing = &mut order[idx];
                existing.count += bucket.count;
                let sub = std::mem::take(&mut existing.sub_results);
                let sub_path = child_path(path, &bucket.key);
                existing.sub_results = sub.merge(bucket.sub_results, &sub_path)?;
            }
            None => {
                positions.insert(bucket.key.clone(), order.len());
                order.push(bucket);
            }
        }
    }
    Bucket::sort_by_count(&mut order);
    Ok(order)
}

fn merge_ranges(left: Vec<Bucket>, right: Vec<Bucket>, path: &str) -> Result<Vec<Bucket>> {
    if left.len() != right.len() {
        return Err(ShardfuseError::shape(
            path,
            format!("range count differs: {} vs {}", left.len(), right.len()),
        ));
    }
    left.into_iter()
        .zip(right)
        .map(|(a, b)| {
            if a.key != b.key {
                return Err(ShardfuseError::shape(
                    path,
                    format!("range '{}' does not line up with '{}'", a.key, b.key),
                ));
            }
            let sub_results = a.sub_results.merge(b.sub_results, &child_path(path, &a.key))?;
            Ok(Bucket::new(a.key, a.count + b.count, sub_results).with_bounds(a.min, a.max))
        })
        .collect()
}

/// Name-keyed aggregation results from one shard or from a merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationResults(BTreeMap<String, AggregationResult>);

impl AggregationResults {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, result: AggregationResult) {
        self.0.insert(name.into(), result);
    }

    pub fn get(&self, name: &str) -> Option<&AggregationResult> {
        self.0.get(name)
    }

    /// Metric value of aggregation `name`
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(AggregationResult::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AggregationResult)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Combine two partial trees.
    ///
    /// Both sides must carry the same names with the same shapes. A side
    /// missing every aggregation is a mismatch, not an identity.
    pub fn merge(self, other: AggregationResults, path: &str) -> Result<AggregationResults> {
        if self.0.len() != other.0.len() || self.0.keys().ne(other.0.keys()) {
            return Err(ShardfuseError::shape(
                if path.is_empty() { "<root>" } else { path },
                format!(
                    "aggregation names differ: {:?} vs {:?}",
                    self.0.keys().collect::<Vec<_>>(),
                    other.0.keys().collect::<Vec<_>>()
                ),
            ));
        }
        let mut right = other.0;
        let mut merged = BTreeMap::new();
        for (name, left) in self.0 {
            let sub_path = child_path(path, &name);
            let Some(right) = right.remove(&name) else {
                return Err(ShardfuseError::shape(sub_path, "missing on one side"));
            };
            let result = left.merge(right, &sub_path)?;
            merged.insert(name, result);
        }
        Ok(AggregationResults(merged))
    }

    /// Final pass at the top of the search: check the tree against the
    /// request and cut every terms aggregation down to its size
    pub fn finalize(
        &mut self,
        request: &AggregationsRequest,
        default_terms_size: usize,
    ) -> Result<()> {
        finalize_level(self, request, default_terms_size, "")
    }
}

fn finalize_level(
    results: &mut AggregationResults,
    request: &AggregationsRequest,
    default_terms_size: usize,
    path: &str,
) -> Result<()> {
    if results.len() != request.len() {
        return Err(ShardfuseError::shape(
            if path.is_empty() { "<root>" } else { path },
            format!(
                "expected {} aggregation(s), found {}",
                request.len(),
                results.len()
            ),
        ));
    }
    for (name, agg) in request.iter() {
        let sub_path = child_path(path, name);
        let Some(result) = results.0.get_mut(name) else {
            return Err(ShardfuseError::shape(sub_path, "no result for requested aggregation"));
        };
        match (agg, result) {
            (AggregationRequest::Metric { kind, .. }, AggregationResult::Metric { state, .. }) => {
                if state.kind() != *kind {
                    return Err(ShardfuseError::shape(
                        sub_path,
                        format!(
                            "requested '{}' but got '{}'",
                            kind.as_str(),
                            state.kind().as_str()
                        ),
                    ));
                }
            }
            (
                AggregationRequest::Bucket(bucket_request),
                AggregationResult::Buckets { kind, buckets, .. },
            ) => {
                if bucket_request.kind != *kind {
                    return Err(ShardfuseError::shape(
                        sub_path,
                        format!(
                            "requested '{}' but got '{}'",
                            bucket_request.kind.as_str(),
                            kind.as_str()
                        ),
                    ));
                }
                if *kind == BucketKind::Terms {
                    buckets.truncate(bucket_request.effective_size(default_terms_size));
                }
                for bucket in buckets.iter_mut() {
                    finalize_level(
                        &mut bucket.sub_results,
                        &bucket_request.sub_aggregations,
                        default_terms_size,
                        &child_path(&sub_path, &bucket.key),
                    )?;
                }
            }
            _ => {
                return Err(ShardfuseError::shape(
                    sub_path,
                    "result type does not match the request",
                ))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{BucketRequest, MetricKind};

    fn avg(sum: f64, count: u64) -> AggregationResult {
        let state = MetricResult::Avg {
            sum: sum.into(),
            count,
        };
        AggregationResult::metric("price", state)
    }

    fn terms(buckets: Vec<(&str, u64, f64)>) -> AggregationResult {
        AggregationResult::Buckets {
            kind: BucketKind::Terms,
            field: "brand".to_string(),
            buckets: buckets
                .into_iter()
                .map(|(key, count, sum)| {
                    let mut sub = AggregationResults::new();
                    sub.insert("avg_price", avg(sum, count));
                    Bucket::new(key, count, sub)
                })
                .collect(),
        }
    }

    fn single(name: &str, result: AggregationResult) -> AggregationResults {
        let mut results = AggregationResults::new();
        results.insert(name, result);
        results
    }

    #[test]
    fn test_terms_merge_unions_and_resorts() {
        let a = single("by_brand", terms(vec![("apple", 2, 2298.0), ("google", 1, 699.0)]));
        let b = single("by_brand", terms(vec![("samsung", 3, 2297.0), ("google", 1, 799.0)]));
        let merged = a.merge(b, "").unwrap();
        let by_brand = merged.get("by_brand").unwrap();
        let keys: Vec<(&str, u64)> = by_brand
            .buckets()
            .unwrap()
            .iter()
            .map(|b| (b.key.as_str(), b.count))
            .collect();
        assert_eq!(keys, vec![("samsung", 3), ("apple", 2), ("google", 2)]);
        assert_eq!(
            by_brand.bucket("google").unwrap().sub_results.value("avg_price"),
            Some(749.0)
        );
    }

    #[test]
    fn test_name_mismatch_is_shape_error() {
        let a = single("x", avg(1.0, 1));
        let b = single("y", avg(1.0, 1));
        assert!(matches!(
            a.merge(b, ""),
            Err(ShardfuseError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_metric_vs_bucket_is_shape_error() {
        let a = single("x", avg(1.0, 1));
        let b = single("x", terms(vec![]));
        let err = a.merge(b, "").unwrap_err();
        assert!(matches!(err, ShardfuseError::ShapeMismatch { ref path, .. } if path == "x"));
    }

    #[test]
    fn test_empty_side_is_a_shape_error() {
        let a = single("x", avg(1.0, 1));
        assert!(matches!(
            a.clone().merge(AggregationResults::new(), ""),
            Err(ShardfuseError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            AggregationResults::new().merge(a, ""),
            Err(ShardfuseError::ShapeMismatch { .. })
        ));
        // no aggregations on either side is fine
        let none = AggregationResults::new().merge(AggregationResults::new(), "").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_finalize_truncates_terms_only() {
        let request = AggregationsRequest::new().with(
            "by_brand",
            BucketRequest::terms("brand", 2).with_sub_aggregation(
                "avg_price",
                AggregationRequest::metric(MetricKind::Avg, "price"),
            ),
        );
        let mut results = single(
            "by_brand",
            terms(vec![("samsung", 3, 2297.0), ("apple", 2, 2298.0), ("google", 2, 1498.0)]),
        );
        results.finalize(&request, 10).unwrap();
        assert_eq!(results.get("by_brand").unwrap().buckets().unwrap().len(), 2);
    }

    #[test]
    fn test_finalize_rejects_kind_drift() {
        let request = AggregationsRequest::new().with("p", AggregationRequest::sum("price"));
        let mut results = single("p", avg(1.0, 1));
        assert!(results.finalize(&request, 10).is_err());
    }
}
