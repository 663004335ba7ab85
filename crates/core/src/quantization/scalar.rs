//! Scalar quantization implementation.
//!
//! Each dimension is compressed from f32 to u8 by linearly mapping the trained
//! per-dimension range `[min, max]` onto `[0, 255]`:
//! `code = round((v - min) / (max - min) * 255)`. Values outside the trained
//! range clamp to the nearest end. `scale` is precomputed as `(max - min) / 255`
//! to avoid redundant division in hot paths.
//!
//! Asymmetric distances decode on the fly inside fixed-size chunks and fold into
//! an f64 accumulator, so no temporary buffer is needed during search.

use super::VectorCodec;
use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::distance::{cosine_from_parts, DistanceMetric};
use serde::{Deserialize, Serialize};

/// Per-dimension scalar quantizer: f32 → u8 with trained min/scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    pub min: Vec<f32>,
    /// `(max - min) / 255`; zero for constant dimensions.
    pub scale: Vec<f32>,
}

const CHUNK_F32: usize = 8;

impl ScalarQuantizer {
    /// Scan a contiguous sample arena (`n * dimensions` floats) for per-dimension min/max.
    pub fn train(sample: &[f32], dimensions: usize) -> Result<Self> {
        super::check_sample(sample, dimensions)?;
        let mut min = vec![f32::MAX; dimensions];
        let mut max = vec![f32::MIN; dimensions];
        for row in sample.chunks_exact(dimensions) {
            for (d, &v) in row.iter().enumerate() {
                if v < min[d] {
                    min[d] = v;
                }
                if v > max[d] {
                    max[d] = v;
                }
            }
        }
        let scale = min
            .iter()
            .zip(&max)
            .map(|(&lo, &hi)| {
                let range = hi - lo;
                if range < f32::EPSILON {
                    0.0
                } else {
                    range / config::SCALAR_LEVELS
                }
            })
            .collect();
        Ok(Self { min, scale })
    }

    #[inline]
    fn decode_component(&self, d: usize, code: u8) -> f32 {
        self.min[d] + code as f32 * self.scale[d]
    }

    /// Asymmetric distance: f32 query vs u8 stored code.
    #[allow(clippy::needless_range_loop)]
    pub fn asymmetric_distance(
        &self,
        query: &[f32],
        code: &[u8],
        metric: DistanceMetric,
        query_norm_sq: f32,
    ) -> f32 {
        debug_assert_eq!(query.len(), code.len());
        let len = query.len();
        match metric {
            DistanceMetric::Cosine | DistanceMetric::DotProduct => {
                let mut dot = 0.0f64;
                let mut norm_s = 0.0f64;
                let full_chunks = len / CHUNK_F32;
                for c in 0..full_chunks {
                    let base = c * CHUNK_F32;
                    let mut cd = 0.0f32;
                    let mut cns = 0.0f32;
                    for j in 0..CHUNK_F32 {
                        let s = self.decode_component(base + j, code[base + j]);
                        cd += query[base + j] * s;
                        cns += s * s;
                    }
                    dot += cd as f64;
                    norm_s += cns as f64;
                }
                for i in (full_chunks * CHUNK_F32)..len {
                    let s = self.decode_component(i, code[i]) as f64;
                    dot += query[i] as f64 * s;
                    norm_s += s * s;
                }
                if metric == DistanceMetric::DotProduct {
                    -(dot as f32)
                } else {
                    1.0 - cosine_from_parts(dot as f32, query_norm_sq, norm_s as f32)
                }
            }
            DistanceMetric::Euclidean | DistanceMetric::Manhattan => {
                let squared = metric == DistanceMetric::Euclidean;
                let mut sum = 0.0f64;
                let full_chunks = len / CHUNK_F32;
                for c in 0..full_chunks {
                    let base = c * CHUNK_F32;
                    let mut acc = 0.0f32;
                    for j in 0..CHUNK_F32 {
                        let diff = query[base + j] - self.decode_component(base + j, code[base + j]);
                        acc += if squared { diff * diff } else { diff.abs() };
                    }
                    sum += acc as f64;
                }
                for i in (full_chunks * CHUNK_F32)..len {
                    let diff = query[i] as f64 - self.decode_component(i, code[i]) as f64;
                    sum += if squared { diff * diff } else { diff.abs() };
                }
                sum as f32
            }
            DistanceMetric::Hamming => (0..len)
                .filter(|&i| (query[i] > 0.0) != (self.decode_component(i, code[i]) > 0.0))
                .count() as f32,
        }
    }
}

impl VectorCodec for ScalarQuantizer {
    fn dimensions(&self) -> usize {
        self.min.len()
    }

    fn code_size(&self) -> usize {
        self.min.len()
    }

    fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        out.extend(vector.iter().enumerate().map(|(d, &v)| {
            let scale = self.scale[d];
            if scale == 0.0 {
                0
            } else {
                ((v - self.min[d]) / scale).round().clamp(0.0, 255.0) as u8
            }
        }));
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        for (d, (&c, o)) in code.iter().zip(out.iter_mut()).enumerate() {
            *o = self.decode_component(d, c);
        }
    }

    fn distance(&self, a: &[u8], b: &[u8], metric: DistanceMetric) -> f32 {
        let da = self.decode(a);
        let db = self.decode(b);
        metric.distance(&da, &db)
    }
}

/// Validates the trained range against a vector, used by integrity checks.
pub(crate) fn check_trained(q: &ScalarQuantizer, dimensions: usize) -> Result<()> {
    if q.min.len() != dimensions || q.scale.len() != dimensions {
        return Err(IndexError::IndexCorruption(format!(
            "scalar codebook has {} dimensions, index has {}",
            q.min.len(),
            dimensions
        )));
    }
    Ok(())
}
