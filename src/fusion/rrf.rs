//! Reciprocal Rank Fusion

use super::{ranked, Component, Contributions, FusionResult};
use crate::model::DocumentMatch;

/// Fuse rankings with `score(doc) = Σ weight_i / (rank_constant + rank_i)`.
///
/// # Arguments
/// * `hits` - Candidate hits, deduplicated by id
/// * `weights` - Component weights: primary first, then one per KNN query
/// * `rank_constant` - The `k` in the formula, at least 1
/// * `window` - Ranks considered per component, and the number of hits kept
/// * `explain` - Nest each component's explanation under the fused one
///
/// A document missing from a component contributes 0 for it.
pub fn reciprocal_rank_fusion(
    hits: Vec<DocumentMatch>,
    weights: &[f64],
    rank_constant: usize,
    window: usize,
    explain: bool,
) -> FusionResult {
    if hits.is_empty() {
        return FusionResult::default();
    }
    let knn_count = weights.len().saturating_sub(1);
    let mut contributions = Contributions::new(hits.len(), knn_count, explain);

    for component in Component::all(knn_count) {
        let weight = weights[component.position()];
        for (rank0, (idx, _)) in ranked(&hits, component, window).into_iter().enumerate() {
            let rank = rank0 + 1;
            let value = weight / (rank_constant + rank) as f64;
            contributions.add(&hits, idx, component, value, value, || {
                format!(
                    "rrf(weight={:.3}, rank={}, rank_constant={}) of:",
                    weight, rank, rank_constant
                )
            });
        }
    }

    contributions.finish(hits, window)
}
