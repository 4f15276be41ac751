//! Score-based fusion: relative (min-max) and distribution-based

use super::{ranked, Component, Contributions, FusionResult};
use crate::model::DocumentMatch;

/// Min and max of a best-first window
pub fn rsf_bounds(scores: &[f64]) -> (f64, f64) {
    match (scores.last(), scores.first()) {
        (Some(min), Some(max)) => (*min, *max),
        _ => (0.0, 0.0),
    }
}

/// `mean ± 3σ` of the window; all-equal (or empty) windows give `(0, 0)`
pub fn dbsf_bounds(scores: &[f64]) -> (f64, f64) {
    let Some(first) = scores.first() else {
        return (0.0, 0.0);
    };
    if scores.iter().all(|s| s == first) {
        return (0.0, 0.0);
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    (mean - 3.0 * std_dev, mean + 3.0 * std_dev)
}

/// Normalise each component's window scores to `[0, 1]`, weight, and sum.
///
/// With `distribution_based` the bounds are `mean ± 3σ` of the window
/// instead of its min and max. A component whose bounds collapse
/// (`max <= min`) gives every member 1.0.
pub fn score_fusion(
    hits: Vec<DocumentMatch>,
    weights: &[f64],
    window: usize,
    distribution_based: bool,
    explain: bool,
) -> FusionResult {
    if hits.is_empty() {
        return FusionResult::default();
    }
    let knn_count = weights.len().saturating_sub(1);
    let label = if distribution_based { "dbsf" } else { "rsf" };
    let mut contributions = Contributions::new(hits.len(), knn_count, explain);

    for component in Component::all(knn_count) {
        let weight = weights[component.position()];
        let window_hits = ranked(&hits, component, window);
        let scores: Vec<f64> = window_hits.iter().map(|(_, s)| *s).collect();
        let (min, max) = if distribution_based {
            dbsf_bounds(&scores)
        } else {
            rsf_bounds(&scores)
        };

        for (idx, raw) in window_hits {
            let normalized = if max > min { (raw - min) / (max - min) } else { 1.0 };
            contributions.add(&hits, idx, component, weight * normalized, normalized, || {
                format!(
                    "{}(weight={:.3}, normalized={:.6}, min={:.6}, max={:.6}) of:",
                    label, weight, normalized, min, max
                )
            });
        }
    }

    contributions.finish(hits, window)
}
