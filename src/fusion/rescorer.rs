//! Request rewrite and rescoring for fused hybrid search

use super::{reciprocal_rank_fusion, score_fusion, FusionResult};
use crate::config::FusionConfig;
use crate::error::{Result, ShardfuseError};
use crate::model::{dedupe_hits, DocumentMatch};
use crate::search::{ScoreMethod, SearchRequest};
use tracing::debug;

/// Scoped rewrite of a request for hybrid scoring.
///
/// `prepare` neutralises every boost and widens the page to the score
/// window; `restore` puts the caller's values back. Callers must run
/// `restore` whatever the outcome of the search in between.
#[derive(Debug, Clone)]
pub struct Rescorer {
    method: ScoreMethod,
    rank_constant: usize,
    window_size: usize,
    explain: bool,
    original_from: usize,
    original_size: usize,
    /// Primary boost first (1.0 if the query is not boostable), then each KNN boost
    weights: Vec<f64>,
    original_knn_boosts: Vec<Option<f64>>,
}

impl Rescorer {
    /// Rewrite `request` for rescoring. Request parameters win over `defaults`.
    pub fn prepare(request: &mut SearchRequest, defaults: &FusionConfig) -> Self {
        let rank_constant = request.params.rank_constant.unwrap_or(defaults.rank_constant);
        let window_size = request.fusion_window(defaults);

        let mut weights = Vec::with_capacity(request.knn.len() + 1);
        weights.push(request.query.boost().unwrap_or(1.0));
        request.query.set_boost(1.0);

        let original_knn_boosts: Vec<Option<f64>> = request.knn.iter().map(|k| k.boost).collect();
        for knn in request.knn.iter_mut() {
            weights.push(knn.effective_boost());
            knn.boost = Some(1.0);
        }

        let rescorer = Self {
            method: request.score,
            rank_constant,
            window_size,
            explain: request.explain,
            original_from: request.from,
            original_size: request.size,
            weights,
            original_knn_boosts,
        };

        request.from = 0;
        request.size = window_size;

        debug!(
            "Prepared {} rescoring: rank_constant={}, window={}, weights={:?}",
            rescorer.method, rescorer.rank_constant, rescorer.window_size, rescorer.weights
        );
        rescorer
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Fuse the merged candidate hits into the final ranking
    pub fn rescore(&self, hits: Vec<DocumentMatch>) -> Result<FusionResult> {
        let hits = dedupe_hits(hits);
        let result = match self.method {
            ScoreMethod::Rrf => reciprocal_rank_fusion(
                hits,
                &self.weights,
                self.rank_constant,
                self.window_size,
                self.explain,
            ),
            ScoreMethod::Rsf => {
                score_fusion(hits, &self.weights, self.window_size, false, self.explain)
            }
            ScoreMethod::Dbsf => {
                score_fusion(hits, &self.weights, self.window_size, true, self.explain)
            }
            ScoreMethod::Default => {
                return Err(ShardfuseError::InvalidFusion(
                    "default scoring does not rescore".to_string(),
                ))
            }
        };
        debug!(
            "{} fused {} hits, max score {:.6}",
            self.method, result.total, result.max_score
        );
        Ok(result)
    }

    /// Write back the caller's page and boosts
    pub fn restore(&self, request: &mut SearchRequest) {
        request.from = self.original_from;
        request.size = self.original_size;
        if let Some(boost) = self.weights.first() {
            request.query.set_boost(*boost);
        }
        for (knn, boost) in request.knn.iter_mut().zip(&self.original_knn_boosts) {
            knn.boost = *boost;
        }
    }
}
