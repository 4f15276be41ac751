//! Hybrid rescoring: fuse the primary ranking with KNN rankings
//!
//! Every fusion method works on the same closed set of components: the
//! primary query ranking and one ranking per KNN sub-query. Each component
//! is a ranked list (best first, ties by id) cut to the score window.

mod rescorer;
mod rrf;
mod score;

pub use rescorer::Rescorer;
pub use rrf::reciprocal_rank_fusion;
pub use score::{dbsf_bounds, rsf_bounds, score_fusion};

use crate::model::{compare_scored, sort_hits, DocumentMatch, Explanation};
use serde::{Deserialize, Serialize};

/// Rank constant used when neither the request nor configuration sets one
pub const DEFAULT_RANK_CONSTANT: usize = 60;

/// Fused hits replacing the merged answer's hits, total and max score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub hits: Vec<DocumentMatch>,
    pub total: u64,
    pub max_score: f64,
}

/// One ranked input to fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Primary,
    Knn(usize),
}

impl Component {
    /// All components for a request with `knn_count` KNN sub-queries, in
    /// breakdown order
    pub fn all(knn_count: usize) -> impl Iterator<Item = Component> {
        std::iter::once(Component::Primary).chain((0..knn_count).map(Component::Knn))
    }

    /// Slot in `score_breakdown` and in the weight vector
    pub fn position(&self) -> usize {
        match self {
            Component::Primary => 0,
            Component::Knn(i) => i + 1,
        }
    }

    /// Raw score of `hit` in this component
    pub fn score(&self, hit: &DocumentMatch) -> Option<f64> {
        match self {
            Component::Primary => hit.matches_primary().then_some(hit.score),
            Component::Knn(i) => hit.knn_score(*i),
        }
    }

    fn explanation<'a>(&self, hit: &'a DocumentMatch) -> Option<&'a Explanation> {
        match self {
            Component::Primary => hit.explanation.as_ref(),
            Component::Knn(i) => hit.knn_explanations.get(*i).and_then(Option::as_ref),
        }
    }
}

/// Hits of one component as `(hit index, raw score)`, best first, cut to `window`
pub(crate) fn ranked(
    hits: &[DocumentMatch],
    component: Component,
    window: usize,
) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = hits
        .iter()
        .enumerate()
        .filter_map(|(idx, hit)| component.score(hit).map(|score| (idx, score)))
        .collect();
    ranked.sort_by(|a, b| compare_scored(a.1, &hits[a.0].id, b.1, &hits[b.0].id));
    ranked.truncate(window);
    ranked
}

/// Per-hit contributions collected while walking the components
pub(crate) struct Contributions {
    breakdown: Vec<Vec<f64>>,
    children: Vec<Vec<Explanation>>,
    explain: bool,
}

impl Contributions {
    pub(crate) fn new(hit_count: usize, knn_count: usize, explain: bool) -> Self {
        Self {
            breakdown: vec![vec![0.0; knn_count + 1]; hit_count],
            children: vec![Vec::new(); if explain { hit_count } else { 0 }],
            explain,
        }
    }

    /// Record `value` for hit `idx` from `component`.
    /// `explain_value` is what the explanation node reports (e.g. the
    /// normalised score for score fusion).
    pub(crate) fn add(
        &mut self,
        hits: &[DocumentMatch],
        idx: usize,
        component: Component,
        value: f64,
        explain_value: f64,
        message: impl FnOnce() -> String,
    ) {
        self.breakdown[idx][component.position()] += value;
        if self.explain {
            let wrapped = component.explanation(&hits[idx]).cloned().into_iter().collect();
            self.children[idx].push(Explanation::with_children(explain_value, message(), wrapped));
        }
    }

    /// Apply fused scores, sort, and cut to `window`
    pub(crate) fn finish(self, mut hits: Vec<DocumentMatch>, window: usize) -> FusionResult {
        let mut max_score = 0.0f64;
        let mut children = self.children.into_iter();
        for (hit, breakdown) in hits.iter_mut().zip(self.breakdown) {
            let score: f64 = breakdown.iter().sum();
            max_score = max_score.max(score);
            hit.score = score;
            hit.score_breakdown = Some(breakdown);
            if let Some(children) = children.next() {
                if !children.is_empty() {
                    hit.explanation = Some(Explanation::with_children(score, "sum of:", children));
                }
            }
        }

        sort_hits(&mut hits);
        hits.truncate(window);
        FusionResult {
            total: hits.len() as u64,
            hits,
            max_score,
        }
    }
}
