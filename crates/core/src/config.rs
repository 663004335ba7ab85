//! Global configuration constants for quantann.
//!
//! All tuning defaults, validation limits, and format constants are defined here.
//! These are compile-time constants; runtime configuration is carried by
//! [`IndexConfig`](crate::hnsw::IndexConfig) and
//! [`QuantizationConfig`](crate::quantization::QuantizationConfig).

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const DEFAULT_EF_SEARCH: usize = 100;

/// Default maximum number of node slots (live + deleted) before `CapacityExceeded`.
pub const DEFAULT_MAX_ELEMENTS: usize = 1_000_000;

/// Maximum number of layers in the HNSW graph.
pub const DEFAULT_MAX_LAYERS: usize = 16;

/// Default seed for level assignment and k-means initialisation.
pub const DEFAULT_SEED: u64 = 0x5eed_cafe_f00d_d00d;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Adaptive filtered search: ef may grow up to this multiple of the base ef.
pub const FILTER_EF_GROWTH_LIMIT: usize = 4;

/// Default number of bits per product quantization code (256 centroids).
pub const PQ_DEFAULT_BITS: u8 = 8;

/// Number of Lloyd iterations run after k-means++ initialisation.
pub const PQ_KMEANS_ITERATIONS: usize = 20;

/// Number of u8 levels used by the scalar quantizer.
pub const SCALAR_LEVELS: f32 = 255.0;

/// Magic bytes at the start of every serialized index.
pub const FORMAT_MAGIC: &[u8; 4] = b"QANN";

/// Current on-disk format version. Readers reject anything else.
pub const FORMAT_VERSION: u16 = 1;

/// Header length: magic(4) + version(2) + flags(2) + payload length(8).
pub const FORMAT_HEADER_LEN: usize = 16;

/// Footer length: CRC32 of the payload.
pub const FORMAT_FOOTER_LEN: usize = 4;
