//! Vector codecs for memory compression.
//!
//! Three codecs share the [`VectorCodec`] trait:
//! - [`scalar::ScalarQuantizer`]: per-dimension f32 → u8 (4×)
//! - [`pq::ProductQuantizer`]: S sub-vectors × b-bit centroid codes (`32·dim / (S·b)`)
//! - [`binary::BinaryQuantizer`]: one sign bit per dimension (32×, coarse)
//!
//! The index stores a [`Codec`] (serde-serializable enum) and, per query, builds a
//! [`QueryTable`] so traversal compares the f32 query against stored codes without
//! decoding them (asymmetric distance).

/// Sign-bit quantization with Hamming distance.
pub mod binary;
/// Sub-byte bit packing shared by the product and binary codecs.
pub mod bits;
/// Product quantization: k-means codebooks per subspace and ADC lookup tables.
pub mod pq;
/// Scalar quantization: f32 → u8 with per-dimension min/scale calibration.
pub mod scalar;

use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::distance::{norm_sq, DistanceMetric};
use serde::{Deserialize, Serialize};

pub use binary::BinaryQuantizer;
pub use pq::{PqDistanceTable, ProductQuantizer};
pub use scalar::ScalarQuantizer;

/// Codec selection for an index. Deserializes from `"none"`, `"scalar"`,
/// `"binary"` or `{"product": {"subvectors": 8, "bits": 8}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationConfig {
    #[default]
    None,
    Scalar,
    Product {
        subvectors: usize,
        #[serde(default = "default_pq_bits")]
        bits: u8,
    },
    Binary,
}

fn default_pq_bits() -> u8 {
    config::PQ_DEFAULT_BITS
}

impl QuantizationConfig {
    /// Checks codec parameters against the index dimensionality.
    pub fn validate(&self, dimensions: usize) -> Result<()> {
        match *self {
            QuantizationConfig::Product { subvectors, bits } => {
                ProductQuantizer::validate(dimensions, subvectors, bits)
            }
            _ => Ok(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, QuantizationConfig::None)
    }
}

/// Common interface of all codecs. Codes are opaque byte strings of
/// [`code_size`](VectorCodec::code_size) bytes.
pub trait VectorCodec {
    /// Dimensionality of the vectors this codec was trained on.
    fn dimensions(&self) -> usize;

    /// Bytes per encoded vector.
    fn code_size(&self) -> usize;

    /// Information bits per encoded vector (may be less than `code_size * 8`
    /// when codes are bit-packed).
    fn code_bits(&self) -> usize {
        self.code_size() * 8
    }

    /// Appends the code for `vector` to `out`.
    fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>);

    /// Writes the reconstruction of `code` into `out` (`dimensions()` floats).
    fn decode_into(&self, code: &[u8], out: &mut [f32]);

    /// Distance between two codes under `metric`. Lower is better.
    fn distance(&self, a: &[u8], b: &[u8], metric: DistanceMetric) -> f32;

    fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code_size());
        self.encode_into(vector, &mut out);
        out
    }

    fn decode(&self, code: &[u8]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimensions()];
        self.decode_into(code, &mut out);
        out
    }

    /// Uncompressed bits (32 per dimension) divided by code bits.
    fn compression_ratio(&self) -> f32 {
        (32 * self.dimensions()) as f32 / self.code_bits() as f32
    }
}

/// A trained codec. This is what an index persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Codec {
    Scalar(ScalarQuantizer),
    Product(ProductQuantizer),
    Binary(BinaryQuantizer),
}

impl Codec {
    /// Trains the codec selected by `config` on a contiguous `n * dimensions` sample.
    /// Returns `Ok(None)` when quantization is disabled.
    pub fn train(
        config: &QuantizationConfig,
        dimensions: usize,
        sample: &[f32],
        seed: u64,
    ) -> Result<Option<Codec>> {
        let codec = match *config {
            QuantizationConfig::None => return Ok(None),
            QuantizationConfig::Scalar => Codec::Scalar(ScalarQuantizer::train(sample, dimensions)?),
            QuantizationConfig::Product { subvectors, bits } => Codec::Product(
                ProductQuantizer::train(sample, dimensions, subvectors, bits, seed)?,
            ),
            QuantizationConfig::Binary => Codec::Binary(BinaryQuantizer::train(sample, dimensions)?),
        };
        Ok(Some(codec))
    }

    pub fn as_codec(&self) -> &dyn VectorCodec {
        match self {
            Codec::Scalar(q) => q,
            Codec::Product(q) => q,
            Codec::Binary(q) => q,
        }
    }

    /// Builds the per-query asymmetric distance table.
    pub fn query_table<'a>(&'a self, query: &'a [f32], metric: DistanceMetric) -> QueryTable<'a> {
        match self {
            Codec::Scalar(q) => QueryTable::Scalar {
                codec: q,
                query,
                metric,
                query_norm_sq: norm_sq(query),
            },
            Codec::Product(q) => QueryTable::Product(q.build_distance_table(query, metric)),
            Codec::Binary(q) => QueryTable::Binary(q.encode(query)),
        }
    }

    /// Codebook shape check used by integrity verification and loading.
    pub(crate) fn check_dimensions(&self, dimensions: usize) -> Result<()> {
        match self {
            Codec::Scalar(q) => scalar::check_trained(q, dimensions),
            Codec::Product(q) => pq::check_trained(q, dimensions),
            _ if self.as_codec().dimensions() != dimensions => Err(IndexError::IndexCorruption(
                format!(
                    "codebook has {} dimensions, index has {}",
                    self.as_codec().dimensions(),
                    dimensions
                ),
            )),
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Scalar(_) => "scalar",
            Codec::Product(_) => "product",
            Codec::Binary(_) => "binary",
        }
    }
}

/// Per-query state for comparing an f32 query against stored codes.
#[derive(Debug)]
pub enum QueryTable<'a> {
    Scalar {
        codec: &'a ScalarQuantizer,
        query: &'a [f32],
        metric: DistanceMetric,
        query_norm_sq: f32,
    },
    Product(PqDistanceTable),
    /// Sign bits of the query; distance is Hamming regardless of metric.
    Binary(Vec<u8>),
}

impl QueryTable<'_> {
    #[inline]
    pub fn distance(&self, code: &[u8]) -> f32 {
        match self {
            QueryTable::Scalar {
                codec,
                query,
                metric,
                query_norm_sq,
            } => codec.asymmetric_distance(query, code, *metric, *query_norm_sq),
            QueryTable::Product(table) => table.distance(code),
            QueryTable::Binary(bits) => bits::hamming(bits, code) as f32,
        }
    }
}

/// Validates a training sample arena: non-empty and a whole number of vectors.
pub(crate) fn check_sample(sample: &[f32], dimensions: usize) -> Result<()> {
    if sample.is_empty() {
        return Err(IndexError::EmptyTrainingSample);
    }
    if dimensions == 0 || sample.len() % dimensions != 0 {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            actual: sample.len() % dimensions.max(1),
        });
    }
    Ok(())
}
