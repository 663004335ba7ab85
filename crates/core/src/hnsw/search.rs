//! HNSW search algorithms: single-layer search and multi-layer KNN.
//!
//! Supports filtering via a predicate `Fn(u32) -> bool` applied during graph
//! traversal. Filtered nodes are still used for navigation but excluded from
//! results. Traversal compares the f32 query against stored codes through a
//! [`QueryTable`] when a codec is trained, and against raw vectors otherwise.

use crate::error::{IndexError, Result};
use crate::hnsw::distance::{norm_sq, DistanceMetric};
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::{with_visited, VisitedSet};
use crate::quantization::QueryTable;
use crate::search::filter::matches;
use crate::search::types::{SearchOptions, SearchResult};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// A scored node. Ordering is by distance, then by internal id, so equal
/// distances resolve to the lower id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    distance: OrderedFloat<f32>,
    id: u32,
}

/// How the query is compared against stored nodes during traversal.
pub(crate) enum QueryDistance<'a> {
    Coded(QueryTable<'a>),
    Raw {
        query: &'a [f32],
        metric: DistanceMetric,
        query_norm_sq: f32,
    },
}

impl<'a> QueryDistance<'a> {
    pub(crate) fn new(index: &'a HnswIndex, query: &'a [f32]) -> Self {
        match index.codec {
            Some(ref codec) => QueryDistance::Coded(codec.query_table(query, index.metric)),
            None => QueryDistance::Raw {
                query,
                metric: index.metric,
                query_norm_sq: norm_sq(query),
            },
        }
    }

    #[inline]
    fn distance(&self, index: &HnswIndex, id: u32) -> f32 {
        match self {
            QueryDistance::Coded(table) => table.distance(index.code(id)),
            QueryDistance::Raw {
                query,
                metric,
                query_norm_sq,
            } => metric.distance_prenorm(query, index.raw_vector(id), *query_norm_sq),
        }
    }
}

#[inline]
fn sort_by_distance(results: &mut [(f32, u32)]) {
    results.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
}

/// Search a single layer of the HNSW graph.
/// Returns up to `ef` nodes passing `filter_fn`, closest first.
/// `ef` is capped at the slot count. A neighbor id outside the graph or pointing
/// at a removed node poisons the index.
pub(crate) fn search_layer<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &QueryDistance<'_>,
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    filter_fn: &F,
) -> Result<Vec<(f32, u32)>> {
    visited.reset(index.slot_count());
    let ef = ef.clamp(1, index.slot_count().max(1));
    let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst distance, avoids repeated heap peeks in the hot loop
    let mut worst_dist = f32::MAX;

    for &ep in entry_points {
        if visited.insert(ep) {
            let c = Candidate {
                distance: OrderedFloat(query.distance(index, ep)),
                id: ep,
            };
            candidates.push(Reverse(c));
            if filter_fn(ep) {
                results.push(c);
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    let slots = index.slot_count();
    while let Some(Reverse(candidate)) = candidates.pop() {
        // If the closest candidate is farther than the worst result, stop
        if results.len() >= ef && candidate.distance.0 > worst_dist {
            break;
        }

        let Some(neighbor_list) = index.neighbors[candidate.id as usize].get(layer) else {
            continue;
        };
        for &neighbor_id in neighbor_list {
            if neighbor_id as usize >= slots || index.is_removed(neighbor_id) {
                return Err(index.poison(format!(
                    "node {} links to invalid node {neighbor_id} at layer {layer}",
                    candidate.id
                )));
            }
            if !visited.insert(neighbor_id) {
                continue;
            }

            let dist = query.distance(index, neighbor_id);
            if results.len() < ef || dist < worst_dist {
                let c = Candidate {
                    distance: OrderedFloat(dist),
                    id: neighbor_id,
                };
                candidates.push(Reverse(c));
                if filter_fn(neighbor_id) {
                    results.push(c);
                    if results.len() > ef {
                        results.pop(); // remove worst
                    }
                    if results.len() >= ef {
                        worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                    }
                }
            }
        }
    }

    Ok(results
        .into_sorted_vec()
        .into_iter()
        .map(|c| (c.distance.0, c.id))
        .collect())
}

/// Greedy descent from the entry point through layers `top..=floor`, `ef = 1`.
/// Returns the closest node found on layer `floor`.
pub(crate) fn greedy_descent(
    index: &HnswIndex,
    query: &QueryDistance<'_>,
    entry_point: u32,
    top: usize,
    floor: usize,
    visited: &mut VisitedSet,
) -> Result<u32> {
    let mut current = entry_point;
    let any = |_: u32| true;
    for layer in (floor..=top).rev() {
        let results = search_layer(
            index,
            query,
            std::slice::from_ref(&current),
            1,
            layer,
            visited,
            &any,
        )?;
        if let Some(&(_, nearest)) = results.first() {
            current = nearest;
        }
    }
    Ok(current)
}

/// Multi-layer KNN search with a filter predicate applied during layer-0 traversal.
/// Nodes that don't pass the filter are still used for navigation but excluded from results.
/// Uses adaptive ef oversampling: if the initial search yields fewer than k results,
/// retries with progressively larger ef to handle low-selectivity filters.
/// Final candidates are rescored with raw vectors when available, otherwise with
/// decoded codes.
pub(crate) fn knn_search_filtered<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    ef: usize,
    filter_fn: &F,
) -> Result<Vec<(f32, u32)>> {
    let Some(entry_point) = index.entry_point else {
        return Ok(Vec::new());
    };
    let distance = QueryDistance::new(index, query);

    let mut results = with_visited(index.slot_count(), |visited| -> Result<_> {
        let current_ep = if index.max_layer > 0 {
            greedy_descent(index, &distance, entry_point, index.max_layer, 1, visited)?
        } else {
            entry_point
        };

        let slots = index.slot_count();
        let base_ef = ef.max(k).min(slots);
        let max_ef = base_ef
            .saturating_mul(crate::config::FILTER_EF_GROWTH_LIMIT)
            .min(slots);
        let mut ef = base_ef;
        loop {
            let results = search_layer(
                index,
                &distance,
                std::slice::from_ref(&current_ep),
                ef,
                0,
                visited,
                filter_fn,
            )?;
            if results.len() >= k || ef >= max_ef {
                return Ok(results);
            }
            tracing::debug!(ef, found = results.len(), k, "widening filtered search");
            ef = ef.saturating_mul(2).min(max_ef);
        }
    })?;

    rerank(index, query, &distance, &mut results);
    results.truncate(k);
    Ok(results)
}

/// Rescore candidates with the most precise representation available.
fn rerank(index: &HnswIndex, query: &[f32], distance: &QueryDistance<'_>, results: &mut [(f32, u32)]) {
    match distance {
        QueryDistance::Raw { .. } => {}
        QueryDistance::Coded(_) if index.has_raw_vectors() => {
            let query_norm_sq = norm_sq(query);
            for r in results.iter_mut() {
                r.0 = index
                    .metric
                    .distance_prenorm(query, index.raw_vector(r.1), query_norm_sq);
            }
        }
        QueryDistance::Coded(_) => {
            let query_norm_sq = norm_sq(query);
            let mut buf = vec![0.0f32; index.dimensions];
            for r in results.iter_mut() {
                index.vector_into(r.1, &mut buf);
                r.0 = index.metric.distance_prenorm(query, &buf, query_norm_sq);
            }
        }
    }
    sort_by_distance(results);
}

impl HnswIndex {
    /// Returns the `k` nearest live vectors to `query`, best first.
    ///
    /// `options.ef` overrides the configured `ef_search`; `options.filter`
    /// restricts results to nodes whose metadata matches.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_healthy()?;
        if k == 0 {
            return Err(IndexError::InvalidK(k));
        }
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let k = k.min(self.len());

        let ef = options.ef.unwrap_or(self.config.ef_search).max(1);
        let hits = match options.filter {
            Some(ref filter) => knn_search_filtered(self, query, k, ef, &|id: u32| {
                self.is_live(id)
                    && self.metadata[id as usize]
                        .as_ref()
                        .is_some_and(|m| matches(filter, m))
            })?,
            None => knn_search_filtered(self, query, k, ef, &|id: u32| self.is_live(id))?,
        };

        Ok(hits
            .into_iter()
            .map(|(distance, id)| SearchResult {
                id: self.ids[id as usize].clone(),
                score: self.metric.score(distance),
                metadata: self.metadata[id as usize].clone(),
            })
            .collect())
    }

    /// Exact top-k by linear scan over live nodes. Used as ground truth.
    pub fn brute_force_search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        let mut buf = vec![0.0f32; self.dimensions];
        let mut scored: Vec<(f32, u32)> = (0..self.slot_count() as u32)
            .filter(|&id| self.is_live(id))
            .map(|id| (self.distance_to_node(query, id, &mut buf), id))
            .collect();
        sort_by_distance(&mut scored);
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(distance, id)| SearchResult {
                id: self.ids[id as usize].clone(),
                score: self.metric.score(distance),
                metadata: self.metadata[id as usize].clone(),
            })
            .collect())
    }
}
