//! Shardfuse - result combination for distributed search
//!
//! Fans a search out over shards and nested aliases, merges hits,
//! aggregations and facets into one answer that does not depend on how
//! documents are spread across shards, and fuses full-text and KNN
//! rankings with reciprocal rank, relative score or distribution-based
//! score fusion.

pub mod aggregation;
pub mod cli;
pub mod config;
pub mod error;
pub mod facets;
pub mod fusion;
pub mod index;
pub mod model;
pub mod search;

pub use error::{Result, ShardfuseError};
