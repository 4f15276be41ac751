//! Gather step: combine shard results into one answer

use super::{ScoreMethod, SearchRequest};
use crate::aggregation::AggregationResults;
use crate::config::Config;
use crate::error::{Result, ShardfuseError};
use crate::fusion::{ranked, Component};
use crate::model::{dedupe_hits, sort_hits, DocumentMatch, Explanation, PartialResult};
use ahash::AHashSet;
use tracing::debug;

/// Combines per-shard results.
///
/// `merge_partials` is lossless and associative, so nested aliases return
/// its output unchanged and only the top-level alias calls `complete`
/// (score combination, pagination, facet fixup, terms truncation).
#[derive(Debug, Clone)]
pub struct ResultMerger {
    default_terms_size: usize,
    default_facet_size: usize,
}

impl ResultMerger {
    pub fn new(default_terms_size: usize, default_facet_size: usize) -> Self {
        Self {
            default_terms_size,
            default_facet_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.aggregation.default_terms_size, config.facets.default_size)
    }

    /// Merge and finish in one step
    pub fn merge(
        &self,
        request: &SearchRequest,
        partials: Vec<PartialResult>,
    ) -> Result<PartialResult> {
        let merged = self.merge_partials(request, partials)?;
        self.complete(request, merged)
    }

    /// Sum statuses and totals, union hits, merge aggregations and facets.
    ///
    /// With KNN sub-queries every component is cut back to its global
    /// window: the primary ranking to `from + size`, KNN query `i` to `k_i`.
    pub fn merge_partials(
        &self,
        request: &SearchRequest,
        partials: Vec<PartialResult>,
    ) -> Result<PartialResult> {
        let count = partials.len();
        let aggregations_requested = request
            .aggregations
            .as_ref()
            .is_some_and(|aggregations| !aggregations.is_empty());
        let mut merged = PartialResult::default();
        let mut aggregations: Option<AggregationResults> = None;
        let mut hits = Vec::new();

        for partial in partials {
            if aggregations_requested && partial.aggregations.is_empty() {
                return Err(ShardfuseError::shape(
                    "<root>",
                    "a shard returned no aggregations for a request that asked for them",
                ));
            }
            merged.status.merge(partial.status);
            merged.total += partial.total;
            merged.max_score = merged.max_score.max(partial.max_score);
            merged.took = merged.took.max(partial.took);
            hits.extend(partial.hits);
            aggregations = Some(match aggregations {
                Some(acc) => acc.merge(partial.aggregations, "")?,
                None => partial.aggregations,
            });
            merged.facets.merge(partial.facets);
        }
        merged.aggregations = aggregations.unwrap_or_default();

        let mut hits = dedupe_hits(hits);
        if !request.knn.is_empty() {
            let before = hits.len();
            hits = restrict_to_windows(hits, request);
            debug!("Window restriction kept {} of {} hits", hits.len(), before);
        }
        sort_hits(&mut hits);
        merged.hits = hits;

        debug!(
            "Merged {} partial results: {} hits, total {}",
            count,
            merged.hits.len(),
            merged.total
        );
        Ok(merged)
    }

    /// Default-scoring completion: add KNN similarities to the primary score, then finish
    pub fn complete(
        &self,
        request: &SearchRequest,
        mut merged: PartialResult,
    ) -> Result<PartialResult> {
        if request.score == ScoreMethod::Default && !request.knn.is_empty() {
            for hit in merged.hits.iter_mut() {
                combine_scores(hit, request.explain);
            }
            merged.max_score = merged
                .hits
                .iter()
                .map(|h| h.score)
                .fold(merged.max_score, f64::max);
        }
        self.finish(request, &mut merged)?;
        Ok(merged)
    }

    /// Sort, cut the page, fix up facets and truncate terms aggregations
    pub fn finish(&self, request: &SearchRequest, merged: &mut PartialResult) -> Result<()> {
        sort_hits(&mut merged.hits);
        let hits = std::mem::take(&mut merged.hits);
        merged.hits = hits.into_iter().skip(request.from).take(request.size).collect();

        if let Some(facets) = &request.facets {
            merged.facets.fixup(facets, self.default_facet_size);
        }
        if let Some(aggregations) = &request.aggregations {
            merged.aggregations.finalize(aggregations, self.default_terms_size)?;
        }
        Ok(())
    }
}

impl Default for ResultMerger {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn restrict_to_windows(
    mut hits: Vec<DocumentMatch>,
    request: &SearchRequest,
) -> Vec<DocumentMatch> {
    let keep = window_members(&hits, Component::Primary, request.window());
    for (idx, hit) in hits.iter_mut().enumerate() {
        if !keep.contains(&idx) {
            hit.clear_primary();
        }
    }

    for (position, knn) in request.knn.iter().enumerate() {
        let keep = window_members(&hits, Component::Knn(position), knn.k);
        for (idx, hit) in hits.iter_mut().enumerate() {
            if keep.contains(&idx) {
                continue;
            }
            if let Some(score) = hit.knn_scores.get_mut(position) {
                *score = None;
            }
            if let Some(explanation) = hit.knn_explanations.get_mut(position) {
                *explanation = None;
            }
        }
    }

    hits.retain(DocumentMatch::has_any_component);
    hits
}

fn window_members(hits: &[DocumentMatch], component: Component, window: usize) -> AHashSet<usize> {
    ranked(hits, component, window).into_iter().map(|(idx, _)| idx).collect()
}

fn combine_scores(hit: &mut DocumentMatch, explain: bool) {
    let knn_total: f64 = hit.knn_scores.iter().flatten().sum();
    if !hit.knn_scores.iter().any(Option::is_some) {
        return;
    }
    let combined = hit.score + knn_total;
    if explain {
        let mut children = Vec::new();
        if let Some(primary) = hit.explanation.take() {
            children.push(primary);
        }
        children.extend(hit.knn_explanations.iter().flatten().cloned());
        hit.explanation = Some(Explanation::with_children(combined, "sum of:", children));
    }
    hit.score = combined;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregationRequest, AggregationResult, MetricKind, MetricResult};
    use crate::search::{KnnRequest, Query};

    fn partial(hits: Vec<DocumentMatch>, total: u64) -> PartialResult {
        let max_score = hits.iter().map(|h| h.score).fold(0.0, f64::max);
        PartialResult {
            status: crate::model::SearchStatus::success(),
            hits,
            total,
            max_score,
            ..Default::default()
        }
    }

    #[test]
    fn test_pages_across_shards() {
        let request = SearchRequest::new(Query::match_all()).with_from(1).with_size(2);
        let a = partial(vec![DocumentMatch::new("a1", 5.0), DocumentMatch::new("a2", 1.0)], 2);
        let b = partial(vec![DocumentMatch::new("b1", 3.0), DocumentMatch::new("b2", 2.0)], 2);

        let merged = ResultMerger::default().merge(&request, vec![a, b]).unwrap();
        let ids: Vec<&str> = merged.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2"]);
        assert_eq!(merged.total, 4);
        assert_eq!(merged.max_score, 5.0);
        assert_eq!(merged.status.successful, 2);
    }

    #[test]
    fn test_avg_merges_sums_and_counts() {
        let request = SearchRequest::new(Query::match_all())
            .add_aggregation("avg_price", AggregationRequest::avg("price"));

        let shard = |sum: f64, count: u64| {
            let mut aggs = AggregationResults::new();
            aggs.insert(
                "avg_price",
                AggregationResult::metric(
                    "price",
                    MetricResult::Avg {
                        sum: sum.into(),
                        count,
                    },
                ),
            );
            PartialResult {
                aggregations: aggs,
                ..Default::default()
            }
        };

        let merged = ResultMerger::default()
            .merge(&request, vec![shard(300.0, 3), shard(100.0, 1)])
            .unwrap();
        // 400 / 4, not (100 + 100) / 2
        assert_eq!(merged.aggregations.value("avg_price"), Some(100.0));
        assert_eq!(
            merged.aggregations.get("avg_price").and_then(|r| r.state()).map(|s| s.kind()),
            Some(MetricKind::Avg)
        );
    }

    #[test]
    fn test_shard_without_aggregations_is_rejected() {
        let request = SearchRequest::new(Query::match_all())
            .add_aggregation("n", AggregationRequest::count("price"));

        let mut aggs = AggregationResults::new();
        aggs.insert(
            "n",
            AggregationResult::metric("price", MetricResult::Count { count: 1 }),
        );
        let full = PartialResult {
            aggregations: aggs,
            total: 1,
            ..Default::default()
        };
        let bare = partial(Vec::new(), 5);

        for partials in [vec![full.clone(), bare.clone()], vec![bare, full]] {
            let err = ResultMerger::default().merge_partials(&request, partials).unwrap_err();
            assert!(matches!(err, ShardfuseError::ShapeMismatch { .. }));
        }
    }

    #[test]
    fn test_zero_scored_primary_match_keeps_its_place() {
        let request = SearchRequest::new(Query::match_all().with_boost(0.0))
            .with_size(2)
            .add_knn(KnnRequest::new("vec", vec![1.0], 1));

        let mut a = DocumentMatch::new("a", 0.0).matched();
        a.knn_scores = vec![Some(0.9)];
        let mut b = DocumentMatch::new("b", 0.0).matched();
        b.knn_scores = vec![None];

        let merged = ResultMerger::default()
            .merge(&request, vec![partial(vec![a], 1), partial(vec![b], 1)])
            .unwrap();
        let ids: Vec<&str> = merged.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(merged.total, 2);
    }

    #[test]
    fn test_knn_windows_and_default_combination() {
        let request = SearchRequest::new(Query::match_all())
            .with_size(1)
            .add_knn(KnnRequest::new("vec", vec![1.0], 1));

        let mut a = DocumentMatch::new("a", 2.0);
        a.knn_scores = vec![Some(0.5)];
        let mut b = DocumentMatch::new("b", 1.0);
        b.knn_scores = vec![Some(0.9)];
        let mut c = DocumentMatch::new("c", 0.0);
        c.knn_scores = vec![Some(0.1)];

        let merged = ResultMerger::default()
            .merge(&request, vec![partial(vec![a, c], 2), partial(vec![b], 1)])
            .unwrap();
        // a keeps its primary score, b keeps its knn score, c falls out of every window
        assert_eq!(merged.hits.len(), 1);
        assert_eq!(merged.hits[0].id, "a");
        assert_eq!(merged.hits[0].score, 2.0);
        assert_eq!(merged.max_score, 2.0);
    }
}
