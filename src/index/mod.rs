//! Shard-side collaborators: the executor contract and field value access

mod memory;

pub use memory::{analyze, MemoryIndex};

use crate::error::Result;
use crate::model::PartialResult;
use crate::search::SearchRequest;

/// Runs one search against a single shard.
///
/// Implementations are blocking; the fan-out moves each call onto tokio's
/// blocking pool. An executor must:
/// - return primary hits for the `[from, from + size)` window
/// - fill `knn_scores[i]` for its top `k` documents of KNN query `i`
///   (or for the request's pre-search hits that live on this shard)
/// - compute aggregations and facets over every member document, without
///   truncating terms buckets or fixing up facets
pub trait ShardExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, request: &SearchRequest) -> Result<PartialResult>;
}

/// Per-document field access used by aggregations and facets
pub trait FieldValueExtractor {
    /// Numeric value of `field`, if present
    fn numeric(&self, doc_id: &str, field: &str) -> Option<f64>;

    /// Analyzed terms of `field`, in field order
    fn terms(&self, doc_id: &str, field: &str) -> Vec<String>;
}
