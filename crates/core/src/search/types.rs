//! Request and result types shared by the index, the shared handle, and interceptors.

use crate::filter_types::FilterExpr;
use crate::hnsw::distance::DistanceMetric;
use crate::metadata::Metadata;
use crate::quantization::QuantizationConfig;
use serde::{Deserialize, Serialize};

/// A ranked search hit.
///
/// `score` follows the metric's caller-facing convention:
/// - **Cosine**: similarity `1 - d` (higher = more similar)
/// - **Dot product**: the dot product (higher = more similar)
/// - **Euclidean**: L2 distance (lower = closer)
/// - **Manhattan / Hamming**: L1 distance / differing sign bits (lower = closer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub metadata: Option<Metadata>,
}

/// Per-query search parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Overrides the index's `ef_search` for this query.
    #[serde(default)]
    pub ef: Option<usize>,
    #[serde(default)]
    pub filter: Option<FilterExpr>,
}

impl SearchOptions {
    pub fn with_ef(mut self, ef: usize) -> Self {
        self.ef = Some(ef);
        self
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// One vector to insert, as seen by batch inserts and interceptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRequest {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl InsertRequest {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, metadata: Option<Metadata>) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }
}

/// A search call, as seen by interceptors.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: Vec<f32>,
    pub k: usize,
    pub options: SearchOptions,
}

/// Index statistics returned by [`HnswIndex::stats`](crate::hnsw::HnswIndex::stats).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    /// Live (searchable) vectors.
    pub node_count: usize,
    /// Soft-deleted and removed slots awaiting compaction.
    pub deleted_count: usize,
    pub layer_count: usize,
    pub dimensions: usize,
    pub metric: DistanceMetric,
    pub quantization: QuantizationConfig,
    pub quantizer_trained: bool,
    pub memory_estimate_bytes: usize,
    /// Raw bits per code bit; 1.0 while no codec is trained.
    pub compression_ratio: f32,
}
