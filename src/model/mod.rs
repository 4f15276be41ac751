//! Shared data model: document matches, explanations and partial results
//!
//! A `PartialResult` is produced by every shard and is also the type of the
//! merged answer handed back to callers.

use crate::aggregation::AggregationResults;
use crate::facets::FacetResults;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

/// Explanation tree describing how a score was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub value: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Explanation>,
}

impl Explanation {
    pub fn new(value: f64, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(
        value: f64,
        message: impl Into<String>,
        children: Vec<Explanation>,
    ) -> Self {
        Self {
            value,
            message: message.into(),
            children,
        }
    }
}

/// A single matching document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMatch {
    /// Opaque document identifier, unique across every shard
    pub id: String,

    /// Name of the shard that produced this hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Primary query score (0.0 when the document only matched KNN)
    pub score: f64,

    /// Whether the primary query matched; unset falls back to a non-zero score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_match: Option<bool>,

    /// Raw similarity per KNN sub-query, indexed by KNN position
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knn_scores: Vec<Option<f64>>,

    /// Per-component contribution after fusion, primary query first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knn_explanations: Vec<Option<Explanation>>,

    /// Loaded stored field values
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl DocumentMatch {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            index: None,
            score,
            primary_match: None,
            knn_scores: Vec::new(),
            score_breakdown: None,
            explanation: None,
            knn_explanations: Vec::new(),
            fields: serde_json::Map::new(),
        }
    }

    /// Similarity for KNN query `idx`, if this document is in that ranking
    pub fn knn_score(&self, idx: usize) -> Option<f64> {
        self.knn_scores.get(idx).copied().flatten()
    }

    /// Mark this hit as a primary match, even when it scored zero
    pub fn matched(mut self) -> Self {
        self.primary_match = Some(true);
        self
    }

    pub fn matches_primary(&self) -> bool {
        self.primary_match.unwrap_or(self.score != 0.0)
    }

    /// Drop this hit from the primary ranking
    pub fn clear_primary(&mut self) {
        self.score = 0.0;
        self.explanation = None;
        if self.primary_match.is_some() {
            self.primary_match = Some(false);
        }
    }

    /// Whether any ranking (primary or KNN) still references this document
    pub fn has_any_component(&self) -> bool {
        self.matches_primary() || self.knn_scores.iter().any(Option::is_some)
    }

    /// Fold another match for the same document into this one.
    ///
    /// Used when the same id arrives from several rankings; component scores
    /// present on either side survive.
    pub fn absorb(&mut self, other: DocumentMatch) {
        debug_assert_eq!(self.id, other.id);
        let (mine, theirs) = (self.matches_primary(), other.matches_primary());
        if theirs && (!mine || other.score > self.score) {
            self.score = other.score;
            if other.explanation.is_some() {
                self.explanation = other.explanation;
            }
        }
        if self.primary_match.is_some() || other.primary_match.is_some() {
            self.primary_match = Some(mine || theirs);
        }
        if self.knn_scores.len() < other.knn_scores.len() {
            self.knn_scores.resize(other.knn_scores.len(), None);
        }
        if self.knn_explanations.len() < other.knn_explanations.len() {
            self.knn_explanations.resize(other.knn_explanations.len(), None);
        }
        for (idx, score) in other.knn_scores.into_iter().enumerate() {
            if let Some(score) = score {
                if self.knn_scores[idx].map_or(true, |s| score > s) {
                    self.knn_scores[idx] = Some(score);
                    if let Some(expl) = other.knn_explanations.get(idx).cloned().flatten() {
                        self.knn_explanations[idx] = Some(expl);
                    }
                }
            }
        }
        for (key, value) in other.fields {
            self.fields.entry(key).or_insert(value);
        }
        if self.index.is_none() {
            self.index = other.index;
        }
    }
}

/// Total order used everywhere hits are ranked: score descending, then id ascending
pub fn compare_hits(a: &DocumentMatch, b: &DocumentMatch) -> Ordering {
    compare_scored(a.score, &a.id, b.score, &b.id)
}

/// Score descending, id ascending; NaN sorts last
pub fn compare_scored(a_score: f64, a_id: &str, b_score: f64, b_id: &str) -> Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or_else(|| a_score.is_nan().cmp(&b_score.is_nan()))
        .then_with(|| a_id.cmp(b_id))
}

/// Sort hits in place with [`compare_hits`]
pub fn sort_hits(hits: &mut [DocumentMatch]) {
    hits.sort_by(compare_hits);
}

/// Collapse matches sharing an id into one, keeping first-seen order
pub fn dedupe_hits(hits: Vec<DocumentMatch>) -> Vec<DocumentMatch> {
    let mut positions: ahash::AHashMap<String, usize> = ahash::AHashMap::with_capacity(hits.len());
    let mut out: Vec<DocumentMatch> = Vec::with_capacity(hits.len());
    for hit in hits {
        match positions.get(&hit.id).copied() {
            Some(idx) => out[idx].absorb(hit),
            None => {
                positions.insert(hit.id.clone(), out.len());
                out.push(hit);
            }
        }
    }
    out
}

/// Status block counting how many leaf shards were queried
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub total: usize,
    pub failed: usize,
    pub successful: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

impl SearchStatus {
    /// Status of a single successful leaf
    pub fn success() -> Self {
        Self {
            total: 1,
            successful: 1,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: SearchStatus) {
        self.total += other.total;
        self.failed += other.failed;
        self.successful += other.successful;
        self.errors.extend(other.errors);
    }
}

/// Hits, totals and summaries from one shard, or the merged answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialResult {
    pub status: SearchStatus,
    pub hits: Vec<DocumentMatch>,
    pub total: u64,
    pub max_score: f64,
    #[serde(default, skip_serializing_if = "AggregationResults::is_empty")]
    pub aggregations: AggregationResults,
    #[serde(default, skip_serializing_if = "FacetResults::is_empty")]
    pub facets: FacetResults,
    #[serde(with = "duration_millis", default)]
    pub took: Duration,
}

impl PartialResult {
    /// Summary line per hit, in rank order
    pub fn describe(&self) -> String {
        if self.hits.is_empty() {
            return "No matches".to_string();
        }
        let mut out = format!("{} matches\n", self.total);
        for (i, hit) in self.hits.iter().enumerate() {
            out.push_str(&format!("{:5}. {} ({:.6})\n", i + 1, hit.id, hit.score));
        }
        out
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
