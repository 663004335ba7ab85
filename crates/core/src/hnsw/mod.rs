//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Vectors are stored raw until a codec is trained; afterwards traversal uses
//! asymmetric f32-query-vs-code distances and the final candidates are rescored
//! with raw vectors (when `store_raw_vectors` is set) or decoded codes.
//!
//! The graph uses a Struct-of-Arrays (SoA) layout: vector data lives in
//! contiguous arenas, with separate arrays for ids, metadata, neighbor lists,
//! layer assignments and node states.

/// Soft and hard deletion, neighbor repair, and compaction.
pub mod delete;
/// Distance metrics: cosine, euclidean, dot product, manhattan, and hamming.
pub mod distance;
/// HNSW graph structure, configuration, and data storage.
pub mod graph;
/// HNSW insertion algorithm with bidirectional connections and heuristic pruning.
pub mod insert;
/// HNSW search: single-layer search, multi-layer KNN, and filtered search.
pub mod search;
/// Generation-based visited set for efficient graph traversal.
pub mod visited;

pub use delete::DeleteMode;
pub use distance::DistanceMetric;
pub use graph::{HnswIndex, IndexConfig, NodeState};
