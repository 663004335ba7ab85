//! Synthetic datasets and recall helpers shared by the integration tests.

#![allow(dead_code)]

use quantann_core::{DistanceMetric, HnswIndex, IndexConfig, SearchOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// `n` vectors with components uniform in [-1, 1).
pub fn uniform(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

/// `n` vectors drawn around `clusters` random centers with uniform noise of
/// half-width `spread`.
pub fn clustered(n: usize, dim: usize, clusters: usize, spread: f32, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers: Vec<Vec<f32>> = (0..clusters)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect();
    (0..n)
        .map(|i| {
            centers[i % clusters]
                .iter()
                .map(|&c| c + rng.gen_range(-spread..spread))
                .collect()
        })
        .collect()
}

pub fn flatten(vectors: &[Vec<f32>]) -> Vec<f32> {
    vectors.iter().flatten().copied().collect()
}

pub fn build(vectors: &[Vec<f32>], metric: DistanceMetric, config: IndexConfig) -> HnswIndex {
    let mut index = HnswIndex::new(vectors[0].len(), metric, config).unwrap();
    for (i, v) in vectors.iter().enumerate() {
        index.insert(i.to_string(), v, None).unwrap();
    }
    index
}

/// Exact top-k ids by linear scan over `data`, ties broken by position.
pub fn exact_top_k(data: &[Vec<f32>], query: &[f32], k: usize, metric: DistanceMetric) -> Vec<String> {
    let mut scored: Vec<(f32, usize)> = data
        .iter()
        .enumerate()
        .map(|(i, v)| (metric.distance(query, v), i))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, i)| i.to_string()).collect()
}

/// Fraction of the exact top-k over `data` that the index returns, averaged
/// over `queries`.
pub fn recall(
    index: &HnswIndex,
    data: &[Vec<f32>],
    queries: &[Vec<f32>],
    k: usize,
    options: &SearchOptions,
) -> f64 {
    let mut found = 0usize;
    for q in queries {
        let truth: HashSet<String> = exact_top_k(data, q, k, index.metric()).into_iter().collect();
        let got = index.search(q, k, options).unwrap();
        found += got.iter().filter(|r| truth.contains(&r.id)).count();
    }
    found as f64 / (queries.len() * k) as f64
}
