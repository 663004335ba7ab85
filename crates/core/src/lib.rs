//! # quantann-core
//!
//! Embeddable in-memory approximate nearest neighbor index built on HNSW,
//! with optional scalar, product, and binary quantization of stored vectors,
//! metadata-filtered search, and checksummed snapshots.
//!
//! The crate has no async dependencies. [`HnswIndex`] is the single-threaded
//! core; [`SharedIndex`] adds a reader/writer lock and interceptors on top.
//!
//! ```no_run
//! use quantann_core::{DistanceMetric, HnswIndex, IndexConfig, SearchOptions};
//!
//! let mut index = HnswIndex::new(3, DistanceMetric::Cosine, IndexConfig::default())?;
//! index.insert("a", &[1.0, 0.0, 0.0], None)?;
//! index.insert("b", &[0.0, 1.0, 0.0], None)?;
//! let hits = index.search(&[0.9, 0.1, 0.0], 1, &SearchOptions::default())?;
//! assert_eq!(hits[0].id, "a");
//! # Ok::<(), quantann_core::IndexError>(())
//! ```

/// Cooperative cancellation for batch operations.
pub mod cancel;
/// Global configuration constants: limits, defaults, and format identifiers.
pub mod config;
/// Error type and result alias.
pub mod error;
/// Metadata filter expressions.
pub mod filter_types;
/// HNSW graph: construction, search, deletion, and distance metrics.
pub mod hnsw;
/// Per-vector metadata values.
pub mod metadata;
/// Interceptors run around inserts and searches.
pub mod middleware;
/// Vector codecs: scalar, product, and binary quantization.
pub mod quantization;
/// Metadata filtering and request/result types.
pub mod search;
/// Shared handles, registry, and snapshot persistence.
pub mod storage;

pub use cancel::CancellationToken;
pub use error::{IndexError, Result};
pub use filter_types::FilterExpr;
pub use hnsw::{DeleteMode, DistanceMetric, HnswIndex, IndexConfig, NodeState};
pub use metadata::{metadata_from, Metadata, MetadataValue};
pub use middleware::{Interceptor, InterceptorChain};
pub use quantization::{
    BinaryQuantizer, Codec, ProductQuantizer, QuantizationConfig, ScalarQuantizer, VectorCodec,
};
pub use search::{IndexStats, InsertRequest, SearchOptions, SearchRequest, SearchResult};
pub use storage::{IndexRegistry, SharedIndex};
