//! Search primitives: metadata filtering and request/result types.

/// Metadata filter evaluation.
pub mod filter;
/// Search results, options, requests, and index statistics.
pub mod types;

pub use filter::matches;
pub use types::{IndexStats, InsertRequest, SearchOptions, SearchRequest, SearchResult};
