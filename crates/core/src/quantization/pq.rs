//! Product Quantization (PQ) for compact storage and fast approximate distance.
//!
//! Splits vectors into `S` subspaces and learns `K = 2^b` centroids per subspace
//! via k-means. Each vector is encoded as `S` codes of `b` bits, bit-packed into
//! `ceil(S*b/8)` bytes. Query distance uses a precomputed lookup table
//! (asymmetric distance computation): `S` table lookups + `S` additions instead
//! of `D` multiply-adds.

use super::{bits, VectorCodec};
use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::distance::{cosine_from_parts, euclidean_sq, norm_sq, DistanceMetric};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// PQ codebook: S subspaces × K centroids × sub_dim floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    pub dimensions: usize,
    pub num_subspaces: usize,
    pub bits: u8,
    pub num_centroids: usize,
    pub sub_dim: usize,
    /// Flat centroid array: `centroids[s * K * sub_dim + k * sub_dim .. + sub_dim]`.
    pub centroids: Vec<f32>,
}

/// Precomputed distance table for a single query: `[S][K]` partial distances.
#[derive(Debug)]
pub struct PqDistanceTable {
    table: Vec<f32>,
    /// Cosine only: `[S][K]` squared centroid norms, summed to get the stored norm.
    norms: Option<Vec<f32>>,
    query_norm_sq: f32,
    num_subspaces: usize,
    num_centroids: usize,
    bits: u8,
}

impl ProductQuantizer {
    /// Validates `dimensions / subvectors` and the code width.
    pub fn validate(dimensions: usize, subvectors: usize, bits: u8) -> Result<()> {
        if subvectors == 0 || subvectors > dimensions || dimensions % subvectors != 0 {
            return Err(IndexError::InvalidSubvectorCount {
                dimensions,
                subvectors,
            });
        }
        if !(1..=8).contains(&bits) {
            return Err(IndexError::InvalidConfig(format!(
                "product quantization bits must be in 1..=8, got {bits}"
            )));
        }
        Ok(())
    }

    /// Train a PQ codebook on a contiguous arena of `n * dimensions` floats.
    pub fn train(
        sample: &[f32],
        dimensions: usize,
        subvectors: usize,
        bits: u8,
        seed: u64,
    ) -> Result<Self> {
        Self::validate(dimensions, subvectors, bits)?;
        super::check_sample(sample, dimensions)?;

        let k = 1usize << bits;
        let sub_dim = dimensions / subvectors;
        let n = sample.len() / dimensions;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut centroids = vec![0.0f32; subvectors * k * sub_dim];

        for sub in 0..subvectors {
            // Extract sub-vectors for this subspace
            let mut sub_vectors = vec![0.0f32; n * sub_dim];
            for i in 0..n {
                let src_start = i * dimensions + sub * sub_dim;
                sub_vectors[i * sub_dim..(i + 1) * sub_dim]
                    .copy_from_slice(&sample[src_start..src_start + sub_dim]);
            }

            let sub_centroids = kmeans(&sub_vectors, sub_dim, k, &mut rng);
            let out_start = sub * k * sub_dim;
            centroids[out_start..out_start + k * sub_dim].copy_from_slice(&sub_centroids);
        }

        tracing::debug!(subvectors, bits, samples = n, "trained product quantizer");
        Ok(Self {
            dimensions,
            num_subspaces: subvectors,
            bits,
            num_centroids: k,
            sub_dim,
            centroids,
        })
    }

    #[inline]
    fn centroid(&self, subspace: usize, ci: usize) -> &[f32] {
        let start = (subspace * self.num_centroids + ci) * self.sub_dim;
        &self.centroids[start..start + self.sub_dim]
    }

    /// Find nearest centroid in a subspace (L2). Returns the centroid index.
    #[inline]
    fn find_nearest_centroid(&self, subspace: usize, sub_vec: &[f32]) -> u8 {
        let mut best_idx = 0u8;
        let mut best_dist = f32::MAX;
        for ci in 0..self.num_centroids {
            let dist = euclidean_sq(sub_vec, self.centroid(subspace, ci));
            if dist < best_dist {
                best_dist = dist;
                best_idx = ci as u8;
            }
        }
        best_idx
    }

    /// Build the distance lookup table for a query vector and distance metric.
    /// `table[s*K + k]` is the partial distance from query sub-vector `s` to centroid `k`.
    pub fn build_distance_table(&self, query: &[f32], metric: DistanceMetric) -> PqDistanceTable {
        let k = self.num_centroids;
        let mut table = vec![0.0f32; self.num_subspaces * k];
        let mut norms = (metric == DistanceMetric::Cosine).then(|| vec![0.0f32; table.len()]);

        for sub in 0..self.num_subspaces {
            let q_sub = &query[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            for ci in 0..k {
                let centroid = self.centroid(sub, ci);
                let slot = sub * k + ci;
                table[slot] = match metric {
                    DistanceMetric::Euclidean => euclidean_sq(q_sub, centroid),
                    DistanceMetric::DotProduct => -dot(q_sub, centroid),
                    DistanceMetric::Cosine => dot(q_sub, centroid),
                    DistanceMetric::Manhattan => q_sub
                        .iter()
                        .zip(centroid)
                        .map(|(a, b)| (a - b).abs())
                        .sum(),
                    DistanceMetric::Hamming => q_sub
                        .iter()
                        .zip(centroid)
                        .filter(|(&a, &b)| (a > 0.0) != (b > 0.0))
                        .count() as f32,
                };
                if let Some(ref mut n) = norms {
                    n[slot] = norm_sq(centroid);
                }
            }
        }

        PqDistanceTable {
            table,
            norms,
            query_norm_sq: norm_sq(query),
            num_subspaces: self.num_subspaces,
            num_centroids: k,
            bits: self.bits,
        }
    }
}

impl VectorCodec for ProductQuantizer {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn code_size(&self) -> usize {
        bits::packed_len(self.num_subspaces, self.bits)
    }

    fn code_bits(&self) -> usize {
        self.num_subspaces * self.bits as usize
    }

    fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        let codes: Vec<u8> = (0..self.num_subspaces)
            .map(|sub| {
                let sub_vec = &vector[sub * self.sub_dim..(sub + 1) * self.sub_dim];
                self.find_nearest_centroid(sub, sub_vec)
            })
            .collect();
        bits::pack_into(&codes, self.bits, out);
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        for sub in 0..self.num_subspaces {
            let ci = bits::unpack(code, sub, self.bits) as usize;
            out[sub * self.sub_dim..(sub + 1) * self.sub_dim]
                .copy_from_slice(self.centroid(sub, ci));
        }
    }

    fn distance(&self, a: &[u8], b: &[u8], metric: DistanceMetric) -> f32 {
        metric.distance(&self.decode(a), &self.decode(b))
    }
}

impl PqDistanceTable {
    /// Approximate distance for a PQ-encoded vector (`ceil(S*b/8)` bytes).
    #[inline]
    pub fn distance(&self, code: &[u8]) -> f32 {
        let k = self.num_centroids;
        let mut dist = 0.0f32;
        let mut stored_norm_sq = 0.0f32;
        for sub in 0..self.num_subspaces {
            let slot = sub * k + bits::unpack(code, sub, self.bits) as usize;
            dist += self.table[slot];
            if let Some(ref norms) = self.norms {
                stored_norm_sq += norms[slot];
            }
        }
        if self.norms.is_some() {
            1.0 - cosine_from_parts(dist, self.query_norm_sq, stored_norm_sq)
        } else {
            dist
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// K-means clustering with k-means++ initialization.
/// Returns `k * sub_dim` centroids as a flat `Vec<f32>`.
fn kmeans(data: &[f32], sub_dim: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / sub_dim;
    let mut centroids = vec![0.0f32; k * sub_dim];
    if n <= k {
        // Fewer points than centroids: every centroid is a real point (cycled)
        for ci in 0..k {
            let p = ci % n;
            centroids[ci * sub_dim..(ci + 1) * sub_dim]
                .copy_from_slice(&data[p * sub_dim..(p + 1) * sub_dim]);
        }
        return centroids;
    }

    // First centroid: random point
    let first = rng.gen_range(0..n);
    centroids[..sub_dim].copy_from_slice(&data[first * sub_dim..(first + 1) * sub_dim]);

    // Distance from each point to its nearest chosen centroid
    let mut min_dists = vec![f32::MAX; n];
    for ci in 1..k {
        let last = &centroids[(ci - 1) * sub_dim..ci * sub_dim];
        let mut total = 0.0f64;
        for i in 0..n {
            let d = euclidean_sq(&data[i * sub_dim..(i + 1) * sub_dim], last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
            total += min_dists[i] as f64;
        }

        let chosen = if total < 1e-30 {
            // All points coincide with existing centroids
            rng.gen_range(0..n)
        } else {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0f64;
            let mut chosen = n - 1;
            for (i, &d) in min_dists.iter().enumerate() {
                cumulative += d as f64;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centroids[ci * sub_dim..(ci + 1) * sub_dim]
            .copy_from_slice(&data[chosen * sub_dim..(chosen + 1) * sub_dim]);
    }

    // Lloyd iterations
    let mut assignments = vec![0usize; n];
    let mut counts = vec![0u32; k];
    let mut sums = vec![0.0f32; k * sub_dim];
    for _ in 0..config::PQ_KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, slot) in assignments.iter_mut().enumerate() {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for ci in 0..k {
                let d = euclidean_sq(point, &centroids[ci * sub_dim..(ci + 1) * sub_dim]);
                if d < best_dist {
                    best_dist = d;
                    best = ci;
                }
            }
            if *slot != best {
                *slot = best;
                changed = true;
            }
        }

        counts.fill(0);
        sums.fill(0.0);
        for (i, &ci) in assignments.iter().enumerate() {
            counts[ci] += 1;
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            for (s, p) in sums[ci * sub_dim..(ci + 1) * sub_dim].iter_mut().zip(point) {
                *s += p;
            }
        }
        // Empty clusters keep their previous centroid
        for ci in 0..k {
            if counts[ci] > 0 {
                let inv = 1.0 / counts[ci] as f32;
                for d in 0..sub_dim {
                    centroids[ci * sub_dim + d] = sums[ci * sub_dim + d] * inv;
                }
            }
        }
        if !changed {
            break;
        }
    }

    centroids
}

/// Validates the codebook layout against the index, used by integrity checks.
pub(crate) fn check_trained(q: &ProductQuantizer, dimensions: usize) -> Result<()> {
    let corrupt = |what: String| Err(IndexError::IndexCorruption(format!("product codebook {what}")));
    if q.dimensions != dimensions {
        return corrupt(format!("has {} dimensions, index has {dimensions}", q.dimensions));
    }
    if !(1..=8).contains(&q.bits) || q.num_centroids != 1usize << q.bits {
        return corrupt(format!(
            "has {} centroids for {} bits",
            q.num_centroids, q.bits
        ));
    }
    if q.num_subspaces == 0 || q.sub_dim.checked_mul(q.num_subspaces) != Some(dimensions) {
        return corrupt(format!(
            "splits {dimensions} dimensions into {} x {}",
            q.num_subspaces, q.sub_dim
        ));
    }
    if q.centroids.len() != q.num_subspaces * q.num_centroids * q.sub_dim {
        return corrupt(format!(
            "holds {} floats, expected {}",
            q.centroids.len(),
            q.num_subspaces * q.num_centroids * q.sub_dim
        ));
    }
    Ok(())
}
