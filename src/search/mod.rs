//! Distributed search: requests, shard fan-out, result merging and aliases

mod alias;
mod fanout;
mod merger;
mod query;
mod request;

pub use alias::IndexAlias;
pub use fanout::{Shard, ShardFanout, ShardFuture};
pub use merger::ResultMerger;
pub use query::{KnnRequest, Query};
pub use request::{FusionParams, ScoreMethod, SearchRequest};
