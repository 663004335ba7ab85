//! Distance metric implementations for HNSW search.
//!
//! Supports five distance functions: cosine, euclidean (L2), dot product,
//! manhattan (L1), and hamming (sign-bit mismatches). Internally every metric is
//! expressed as a distance where **lower is better**; [`DistanceMetric::score`]
//! converts back to the caller-facing convention.
//!
//! Loops run over fixed-size f32 chunks (auto-vectorization friendly) and fold
//! each chunk into an f64 accumulator to limit rounding error on long vectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance metric used for vector similarity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    #[default]
    Cosine,
    /// Squared Euclidean distance (L2²) internally; scores report true L2.
    Euclidean,
    /// Negative dot product: `-dot(a, b)`. Lower = higher similarity.
    DotProduct,
    /// Sum of absolute differences (L1).
    Manhattan,
    /// Number of dimensions whose sign bit (`x > 0`) differs.
    Hamming,
}

/// 8 × f32 = 256 bit = one AVX register.
const CHUNK_F32: usize = 8;

impl DistanceMetric {
    /// Exact f32-vs-f32 distance. Lower is better for every metric.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::Euclidean => euclidean_sq(a, b),
            DistanceMetric::DotProduct => -dot_product(a, b),
            DistanceMetric::Manhattan => manhattan(a, b),
            DistanceMetric::Hamming => sign_hamming(a, b) as f32,
        }
    }

    /// Cosine distance with a precomputed query norm squared.
    /// Other metrics ignore `query_norm_sq` and fall through to [`distance`](Self::distance).
    #[inline]
    pub fn distance_prenorm(&self, query: &[f32], stored: &[f32], query_norm_sq: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let stored_norm_sq = norm_sq(stored);
                1.0 - cosine_from_parts(dot_product(query, stored), query_norm_sq, stored_norm_sq)
            }
            _ => self.distance(query, stored),
        }
    }

    /// Converts an internal distance into the caller-facing score.
    ///
    /// Cosine → similarity, dot product → dot, euclidean → L2,
    /// manhattan and hamming unchanged.
    #[inline]
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::Euclidean => distance.max(0.0).sqrt(),
            DistanceMetric::DotProduct => -distance,
            DistanceMetric::Manhattan | DistanceMetric::Hamming => distance,
        }
    }

    /// Whether larger scores mean "more similar" (cosine, dot product).
    pub fn higher_is_better(&self) -> bool {
        matches!(self, DistanceMetric::Cosine | DistanceMetric::DotProduct)
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::DotProduct => "dot_product",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Hamming => "hamming",
        };
        f.write_str(name)
    }
}

/// Dot product of two f32 slices.
#[allow(clippy::needless_range_loop)]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let mut sum = 0.0f64;
    let full_chunks = len / CHUNK_F32;
    for c in 0..full_chunks {
        let base = c * CHUNK_F32;
        let mut acc = 0.0f32;
        for j in 0..CHUNK_F32 {
            acc += a[base + j] * b[base + j];
        }
        sum += acc as f64;
    }
    for i in (full_chunks * CHUNK_F32)..len {
        sum += a[i] as f64 * b[i] as f64;
    }
    sum as f32
}

/// Sum of squares of an f32 slice.
pub fn norm_sq(a: &[f32]) -> f32 {
    dot_product(a, a)
}

/// Squared Euclidean distance between two f32 slices.
#[allow(clippy::needless_range_loop)]
pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let mut sum = 0.0f64;
    let full_chunks = len / CHUNK_F32;
    for c in 0..full_chunks {
        let base = c * CHUNK_F32;
        let mut acc = 0.0f32;
        for j in 0..CHUNK_F32 {
            let d = a[base + j] - b[base + j];
            acc += d * d;
        }
        sum += acc as f64;
    }
    for i in (full_chunks * CHUNK_F32)..len {
        let d = a[i] as f64 - b[i] as f64;
        sum += d * d;
    }
    sum as f32
}

/// L1 distance between two f32 slices.
#[allow(clippy::needless_range_loop)]
pub fn manhattan(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let mut sum = 0.0f64;
    let full_chunks = len / CHUNK_F32;
    for c in 0..full_chunks {
        let base = c * CHUNK_F32;
        let mut acc = 0.0f32;
        for j in 0..CHUNK_F32 {
            acc += (a[base + j] - b[base + j]).abs();
        }
        sum += acc as f64;
    }
    for i in (full_chunks * CHUNK_F32)..len {
        sum += (a[i] as f64 - b[i] as f64).abs();
    }
    sum as f32
}

/// Number of positions where `a[i] > 0` and `b[i] > 0` disagree.
pub fn sign_hamming(a: &[f32], b: &[f32]) -> u32 {
    a.iter()
        .zip(b)
        .filter(|(&x, &y)| (x > 0.0) != (y > 0.0))
        .count() as u32
}

/// Cosine similarity between two f32 slices. Returns 0 when either norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_from_parts(dot_product(a, b), norm_sq(a), norm_sq(b))
}

#[inline]
pub(crate) fn cosine_from_parts(dot: f32, norm_a_sq: f32, norm_b_sq: f32) -> f32 {
    let denom = (norm_a_sq as f64).sqrt() * (norm_b_sq as f64).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot as f64 / denom) as f32
}
