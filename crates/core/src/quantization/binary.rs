//! Binary (sign-bit) quantization.
//!
//! One bit per dimension (`x > 0`), packed into `ceil(dim / 8)` bytes. Distance
//! between codes is the Hamming distance, computed with `count_ones` over the
//! XOR of the packed bytes. Ratio is 32×; recall is coarse and is meant to be
//! recovered by reranking with raw vectors.
//!
//! Decoding reconstructs `±mean(|x_d|)` per dimension so decoded vectors keep
//! a plausible magnitude for metrics other than Hamming.

use super::{bits, VectorCodec};
use crate::error::Result;
use crate::hnsw::distance::DistanceMetric;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryQuantizer {
    /// Reconstruction magnitude per dimension.
    pub magnitude: Vec<f32>,
}

impl BinaryQuantizer {
    pub fn train(sample: &[f32], dimensions: usize) -> Result<Self> {
        super::check_sample(sample, dimensions)?;
        let n = sample.len() / dimensions;
        let mut sums = vec![0.0f64; dimensions];
        for row in sample.chunks_exact(dimensions) {
            for (s, &v) in sums.iter_mut().zip(row) {
                *s += v.abs() as f64;
            }
        }
        let magnitude = sums
            .into_iter()
            .map(|s| {
                let m = (s / n as f64) as f32;
                if m > 0.0 {
                    m
                } else {
                    1.0
                }
            })
            .collect();
        Ok(Self { magnitude })
    }
}

impl VectorCodec for BinaryQuantizer {
    fn dimensions(&self) -> usize {
        self.magnitude.len()
    }

    fn code_size(&self) -> usize {
        bits::packed_len(self.magnitude.len(), 1)
    }

    fn code_bits(&self) -> usize {
        self.magnitude.len()
    }

    fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        let signs: Vec<u8> = vector.iter().map(|&v| u8::from(v > 0.0)).collect();
        bits::pack_into(&signs, 1, out);
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        for (d, o) in out.iter_mut().enumerate() {
            let m = self.magnitude[d];
            *o = if bits::unpack(code, d, 1) == 1 { m } else { -m };
        }
    }

    /// Hamming distance between sign codes. The metric is ignored.
    fn distance(&self, a: &[u8], b: &[u8], _metric: DistanceMetric) -> f32 {
        bits::hamming(a, b) as f32
    }
}
