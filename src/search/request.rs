//! Search requests: paging, KNN sub-queries, summaries and the score method

use super::query::{KnnRequest, Query};
use crate::aggregation::{AggregationRequest, AggregationTree, AggregationsRequest};
use crate::config::FusionConfig;
use crate::error::{Result, ShardfuseError};
use crate::facets::{FacetRequest, FacetsRequest};
use crate::model::DocumentMatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the final ranking is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMethod {
    /// Primary score plus boosted KNN similarities
    #[default]
    Default,
    /// Reciprocal rank fusion
    Rrf,
    /// Relative score fusion (min-max normalised)
    Rsf,
    /// Distribution-based score fusion (mean ± 3σ normalised)
    Dbsf,
}

impl ScoreMethod {
    pub fn is_fusion(&self) -> bool {
        !matches!(self, ScoreMethod::Default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreMethod::Default => "default",
            ScoreMethod::Rrf => "rrf",
            ScoreMethod::Rsf => "rsf",
            ScoreMethod::Dbsf => "dbsf",
        }
    }
}

impl fmt::Display for ScoreMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoreMethod {
    type Err = ShardfuseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "default" | "none" => Ok(ScoreMethod::Default),
            "rrf" => Ok(ScoreMethod::Rrf),
            "rsf" => Ok(ScoreMethod::Rsf),
            "dbsf" => Ok(ScoreMethod::Dbsf),
            other => Err(ShardfuseError::InvalidFusion(format!(
                "unsupported score method '{}'",
                other
            ))),
        }
    }
}

/// Fusion tuning; unset values fall back to configuration / request size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_constant: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
}

/// A search as submitted to an alias or a shard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Caller-supplied id, used as the search id in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_context_id: Option<String>,

    #[serde(default)]
    pub query: Query,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knn: Vec<KnnRequest>,

    #[serde(default)]
    pub from: usize,

    #[serde(default = "default_size")]
    pub size: usize,

    #[serde(default)]
    pub explain: bool,

    /// Stored fields to load on hits; `"*"` loads all of them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<AggregationsRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<FacetsRequest>,

    #[serde(default)]
    pub score: ScoreMethod,

    #[serde(default)]
    pub params: FusionParams,

    /// Globally merged KNN hits from the pre-search phase; when set, shards
    /// use these instead of running their own KNN
    #[serde(skip)]
    pub knn_presearch: Option<Vec<DocumentMatch>>,
}

fn default_size() -> usize {
    10
}

impl SearchRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            size: default_size(),
            ..Default::default()
        }
    }

    pub fn with_from(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn add_knn(mut self, knn: KnnRequest) -> Self {
        self.knn.push(knn);
        self
    }

    pub fn with_score(mut self, score: ScoreMethod) -> Self {
        self.score = score;
        self
    }

    pub fn with_rank_constant(mut self, rank_constant: usize) -> Self {
        self.params.rank_constant = Some(rank_constant);
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.params.window_size = Some(window_size);
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_client_context_id(mut self, id: impl Into<String>) -> Self {
        self.client_context_id = Some(id.into());
        self
    }

    pub fn add_aggregation(
        mut self,
        name: impl Into<String>,
        request: impl Into<AggregationRequest>,
    ) -> Self {
        self.aggregations
            .get_or_insert_with(AggregationsRequest::new)
            .add(name, request);
        self
    }

    pub fn add_facet(mut self, name: impl Into<String>, request: FacetRequest) -> Self {
        self.facets
            .get_or_insert_with(FacetsRequest::new)
            .add(name, request);
        self
    }

    /// Number of leading hits every shard must return
    pub fn window(&self) -> usize {
        self.from.saturating_add(self.size)
    }

    /// Request sent to each child: the same search, starting at 0 and deep
    /// enough to cover the caller's page
    pub fn child_request(&self) -> Self {
        let mut child = self.clone();
        child.from = 0;
        child.size = self.window();
        child
    }

    /// Score window a fused search ranks over: the request's window, else
    /// the configured one, else the page size
    pub fn fusion_window(&self, defaults: &FusionConfig) -> usize {
        self.params
            .window_size
            .or(defaults.window_size)
            .unwrap_or(self.size)
    }

    /// Reject anything that would fail later, before any shard work
    pub fn validate(&self) -> Result<()> {
        self.validate_with(&FusionConfig::default())
    }

    /// [`validate`](Self::validate) with the fusion defaults the search runs under
    pub fn validate_with(&self, fusion: &FusionConfig) -> Result<()> {
        if self.from.checked_add(self.size).is_none() {
            return Err(ShardfuseError::InvalidRequest(format!(
                "from ({}) + size ({}) overflows",
                self.from, self.size
            )));
        }
        for (idx, knn) in self.knn.iter().enumerate() {
            if knn.k == 0 {
                return Err(ShardfuseError::InvalidRequest(format!(
                    "knn[{}] on '{}' must have k > 0",
                    idx, knn.field
                )));
            }
            if knn.vector.is_empty() {
                return Err(ShardfuseError::InvalidRequest(format!(
                    "knn[{}] on '{}' has an empty vector",
                    idx, knn.field
                )));
            }
        }
        if let Some(aggregations) = &self.aggregations {
            AggregationTree::build(aggregations)?;
        }
        if let Some(facets) = &self.facets {
            facets.validate()?;
        }
        if self.score.is_fusion() {
            if self.params.rank_constant == Some(0) {
                return Err(ShardfuseError::InvalidFusion(
                    "rank_constant must be at least 1".to_string(),
                ));
            }
            if self.fusion_window(fusion) == 0 {
                return Err(ShardfuseError::InvalidFusion(
                    "window_size must be greater than 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::BucketRequest;

    #[test]
    fn test_child_request_covers_page() {
        let request = SearchRequest::new(Query::match_all()).with_from(20).with_size(5);
        let child = request.child_request();
        assert_eq!(child.from, 0);
        assert_eq!(child.size, 25);
    }

    #[test]
    fn test_validation_errors() {
        let overflow = SearchRequest::new(Query::match_all())
            .with_from(usize::MAX)
            .with_size(1);
        assert!(matches!(
            overflow.validate(),
            Err(ShardfuseError::InvalidRequest(_))
        ));

        let zero_window = SearchRequest::new(Query::match_all())
            .with_score(ScoreMethod::Rrf)
            .with_window_size(0);
        assert!(matches!(
            zero_window.validate(),
            Err(ShardfuseError::InvalidFusion(_))
        ));

        // no explicit window: the page size stands in for it
        let zero_size = SearchRequest::new(Query::match_all())
            .with_score(ScoreMethod::Dbsf)
            .with_size(0);
        assert!(matches!(
            zero_size.validate(),
            Err(ShardfuseError::InvalidFusion(_))
        ));
        let configured = FusionConfig {
            window_size: Some(20),
            ..FusionConfig::default()
        };
        assert!(zero_size.validate_with(&configured).is_ok());
        assert!(SearchRequest::new(Query::match_all())
            .with_size(0)
            .validate()
            .is_ok());

        let zero_rank = SearchRequest::new(Query::match_all())
            .with_score(ScoreMethod::Rsf)
            .with_rank_constant(0);
        assert!(zero_rank.validate().unwrap_err().is_validation());

        let bad_regex = SearchRequest::new(Query::match_all())
            .add_aggregation("codes", BucketRequest::terms("code", 5).with_regex_filter("(["));
        assert!(bad_regex.validate().is_err());
    }

    #[test]
    fn test_score_method_parsing() {
        assert_eq!("RRF".parse::<ScoreMethod>().unwrap(), ScoreMethod::Rrf);
        assert_eq!("".parse::<ScoreMethod>().unwrap(), ScoreMethod::Default);
        assert!(matches!(
            "borda".parse::<ScoreMethod>(),
            Err(ShardfuseError::InvalidFusion(_))
        ));
    }

    #[test]
    fn test_request_from_json() {
        let request: SearchRequest = serde_json::from_str(
            r#"{
                "query": {"type": "term", "field": "brand", "term": "apple"},
                "score": "rrf",
                "params": {"rank_constant": 1},
                "aggregations": {
                    "total": {"type": "metric", "kind": "sum", "field": "price"}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(request.size, 10);
        assert_eq!(request.score, ScoreMethod::Rrf);
        assert_eq!(request.params.rank_constant, Some(1));
        assert!(request.validate().is_ok());
    }
}
