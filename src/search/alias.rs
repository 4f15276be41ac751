//! Index aliases: one searchable name over shards and nested aliases

use super::fanout::{Shard, ShardFanout};
use super::merger::ResultMerger;
use super::{Query, SearchRequest};
use crate::config::{Config, FusionConfig};
use crate::error::Result;
use crate::fusion::Rescorer;
use crate::index::ShardExecutor;
use crate::model::{DocumentMatch, PartialResult};
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};

/// A named group of shards searched as one index.
///
/// Shards are leaf executors or other aliases, nested to any depth. Only
/// the alias a caller searches directly paginates, rescores and fixes up
/// facets; nested aliases hand back their lossless merge.
#[derive(Debug)]
pub struct IndexAlias {
    name: String,
    shards: Vec<Shard>,
    fanout: ShardFanout,
    merger: ResultMerger,
    fusion: FusionConfig,
}

impl IndexAlias {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &Config::default())
    }

    pub fn with_config(name: impl Into<String>, config: &Config) -> Self {
        Self {
            name: name.into(),
            shards: Vec::new(),
            fanout: ShardFanout::new(config.fanout.max_concurrent_shards),
            merger: ResultMerger::from_config(config),
            fusion: config.fusion.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn add_shard(&mut self, shard: Shard) -> &mut Self {
        self.shards.push(shard);
        self
    }

    pub fn add_index(&mut self, executor: impl ShardExecutor + 'static) -> &mut Self {
        self.add_shard(Shard::index(executor))
    }

    pub fn add_alias(&mut self, alias: IndexAlias) -> &mut Self {
        self.add_shard(Shard::alias(alias))
    }

    /// Search every shard and return the finished answer.
    ///
    /// The request is rewritten while a fused search runs and is always
    /// handed back with the caller's page and boosts, also on error.
    pub async fn search(&self, request: &mut SearchRequest) -> Result<PartialResult> {
        request.validate_with(&self.fusion)?;

        let search_id = request
            .client_context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = info_span!("search", search_id = %search_id, alias = %self.name);

        self.search_in_span(request).instrument(span).await
    }

    async fn search_in_span(&self, request: &mut SearchRequest) -> Result<PartialResult> {
        let start = Instant::now();

        let mut result = if request.score.is_fusion() {
            let rescorer = Rescorer::prepare(request, &self.fusion);
            let outcome = self.fused(request, &rescorer).await;
            rescorer.restore(request);

            let mut merged = outcome?;
            self.merger.finish(request, &mut merged)?;
            merged
        } else {
            let merged = self.gather(request).await?;
            self.merger.complete(request, merged)?
        };
        result.took = start.elapsed();

        info!(
            "Search on '{}' complete: {} hits of {} total, max score {:.4}, {} shards, {}ms",
            self.name,
            result.hits.len(),
            result.total,
            result.max_score,
            result.status.total,
            result.took.as_millis()
        );
        Ok(result)
    }

    async fn fused(&self, request: &SearchRequest, rescorer: &Rescorer) -> Result<PartialResult> {
        let mut merged = self.gather(request).await?;
        let fused = rescorer.rescore(std::mem::take(&mut merged.hits))?;
        merged.hits = fused.hits;
        merged.total = fused.total;
        merged.max_score = fused.max_score;
        Ok(merged)
    }

    /// Lossless search used when this alias is a shard of another alias
    pub async fn search_partial(&self, request: SearchRequest) -> Result<PartialResult> {
        debug!("Nested search on alias '{}'", self.name);
        self.gather(&request).await
    }

    /// Fan out and merge, running the KNN pre-search first when needed
    async fn gather(&self, request: &SearchRequest) -> Result<PartialResult> {
        if request.knn.is_empty() || request.knn_presearch.is_some() {
            return self.fan_out(request).await;
        }
        let presearch = self.knn_presearch(request).await?;
        let mut request = request.clone();
        request.knn_presearch = Some(presearch);
        self.fan_out(&request).await
    }

    async fn fan_out(&self, request: &SearchRequest) -> Result<PartialResult> {
        let partials = self.fanout.run(request, &self.shards).await?;
        self.merger.merge_partials(request, partials)
    }

    /// Global top `k` of every KNN query, so shards score KNN the same way
    /// whatever the shard layout
    async fn knn_presearch(&self, request: &SearchRequest) -> Result<Vec<DocumentMatch>> {
        let mut presearch = request.clone();
        presearch.query = Query::MatchNone;
        presearch.from = 0;
        presearch.size = 0;
        presearch.fields = Vec::new();
        presearch.aggregations = None;
        presearch.facets = None;

        let merged = self.fan_out(&presearch).await?;
        debug!(
            "KNN pre-search on '{}' kept {} candidates",
            self.name,
            merged.hits.len()
        );
        Ok(merged.hits)
    }
}
