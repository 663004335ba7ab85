//! HNSW insertion algorithm.
//!
//! Inserts a vector into the HNSW graph with bidirectional connections and
//! heuristic neighbor pruning (Algorithm 4 from the HNSW paper). All validation
//! happens before the first mutation, so a rejected insert leaves the index
//! untouched.

use crate::cancel::CancellationToken;
use crate::error::{IndexError, Result};
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::{greedy_descent, search_layer, QueryDistance};
use crate::hnsw::visited::with_visited;
use crate::metadata::Metadata;
use crate::search::types::InsertRequest;
use std::collections::HashSet;

impl HnswIndex {
    /// Inserts a new vector. Fails with `DuplicateId` if `id` is already live.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        vector: &[f32],
        metadata: Option<Metadata>,
    ) -> Result<()> {
        self.ensure_healthy()?;
        let id = id.into();
        self.validate_vector(&id, vector)?;
        if self.id_map.contains_key(&id) {
            return Err(IndexError::DuplicateId(id));
        }
        self.check_capacity()?;
        self.insert_unchecked(id, vector, metadata)?;
        Ok(())
    }

    /// Inserts or replaces. An existing live node with the same id is
    /// soft-deleted first. Returns `true` when a node was replaced.
    pub fn upsert(
        &mut self,
        id: impl Into<String>,
        vector: &[f32],
        metadata: Option<Metadata>,
    ) -> Result<bool> {
        self.ensure_healthy()?;
        let id = id.into();
        self.validate_vector(&id, vector)?;
        self.check_capacity()?;
        let replaced = match self.id_map.get(&id) {
            Some(&old) => {
                self.mark_soft_deleted(old);
                true
            }
            None => false,
        };
        self.insert_unchecked(id, vector, metadata)?;
        Ok(replaced)
    }

    /// Inserts records in order, polling `token` before each one.
    /// Records inserted before a cancellation or error stay in the index.
    pub fn insert_batch<I>(&mut self, items: I, token: &CancellationToken) -> Result<usize>
    where
        I: IntoIterator<Item = InsertRequest>,
    {
        let mut completed = 0;
        for item in items {
            token.check(completed)?;
            self.insert(item.id, &item.vector, item.metadata)?;
            completed += 1;
        }
        tracing::debug!(completed, "batch insert finished");
        Ok(completed)
    }

    pub(crate) fn check_capacity(&self) -> Result<()> {
        if self.slot_count() >= self.config.max_elements {
            return Err(IndexError::CapacityExceeded {
                max_elements: self.config.max_elements,
            });
        }
        Ok(())
    }

    /// Links a validated vector into the graph. Returns its internal id.
    pub(crate) fn insert_unchecked(
        &mut self,
        id: String,
        vector: &[f32],
        metadata: Option<Metadata>,
    ) -> Result<u32> {
        let level = self.random_level();

        // First node (or every earlier node removed): it becomes the entry point
        let Some(entry_point) = self.entry_point else {
            let node = self.push_node(id, vector, metadata, level);
            self.entry_point = Some(node);
            self.max_layer = level;
            return Ok(node);
        };

        // Phase 1 + 2: descend to the node's level, then beam-search each layer
        // below it and choose neighbors. Nothing is mutated until all succeed.
        let top = level.min(self.max_layer);
        let node_neighbors = {
            let distance = QueryDistance::new(self, vector);
            let mut scratch = vec![0.0f32; self.dimensions];
            with_visited(self.slot_count(), |visited| -> Result<Vec<Vec<u32>>> {
                let current_ep = if self.max_layer > level {
                    greedy_descent(self, &distance, entry_point, self.max_layer, level + 1, visited)?
                } else {
                    entry_point
                };

                let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
                let mut layer_eps = vec![current_ep];
                let any = |_: u32| true;
                for layer in (0..=top).rev() {
                    let mut candidates = search_layer(
                        self,
                        &distance,
                        &layer_eps,
                        self.config.ef_construction,
                        layer,
                        visited,
                        &any,
                    )?;
                    // Coded traversal distances are approximate; pick neighbors on
                    // the same scale the pruning step uses
                    if self.codec.is_some() {
                        for c in candidates.iter_mut() {
                            c.0 = self.distance_to_node(vector, c.1, &mut scratch);
                        }
                    }

                    node_neighbors[layer] = select_neighbors_heuristic(
                        self,
                        &[],
                        &candidates,
                        self.config.max_links(layer),
                    );

                    // Entry points for the next (lower) layer
                    layer_eps.clear();
                    layer_eps.extend(candidates.iter().map(|&(_, id)| id));
                    if layer_eps.is_empty() {
                        layer_eps.push(entry_point);
                    }
                }
                Ok(node_neighbors)
            })?
        };

        let node = self.push_node(id, vector, metadata, level);
        for (layer, links) in node_neighbors.into_iter().enumerate() {
            self.set_links(node, layer, links);
        }

        // Phase 3: bidirectional connections, pruning neighbors over capacity.
        // A node left with no in-edge by the pruning is linked back in.
        for layer in 0..=top {
            let m_max = self.config.max_links(layer);
            let my_neighbors = self.neighbors[node as usize][layer].clone();
            let mut stranded = Vec::new();
            for neighbor_id in my_neighbors {
                self.add_link(neighbor_id, node, layer);
                if self.neighbors[neighbor_id as usize][layer].len() > m_max {
                    stranded.extend(self.prune_links(neighbor_id, layer, &[]));
                }
            }
            for target in stranded {
                if self.in_links(target, layer).is_empty() && self.entry_point != Some(target) {
                    self.relink_orphan(target, layer)?;
                }
            }
        }

        // Update entry point if new node has higher layer
        if level > self.max_layer {
            tracing::debug!(node, level, previous = self.max_layer, "entry point promoted");
            self.max_layer = level;
            self.entry_point = Some(node);
        }
        Ok(node)
    }

    /// Shrinks the out-edges of `node` at `layer` to capacity.
    ///
    /// The heuristic chooses which edge to give up, but an edge is only dropped
    /// while another kept neighbor also links to its target, so every path
    /// through `node` survives. When the heuristic's pick has no such detour the
    /// farthest edge that does is dropped instead. If no edge has one, the pick
    /// is handed to a kept neighbor with a free slot first. `pinned` targets are
    /// never dropped. Returns targets dropped without any detour.
    pub(crate) fn prune_links(&mut self, node: u32, layer: usize, pinned: &[u32]) -> Vec<u32> {
        let m_max = self.config.max_links(layer);
        let mut stranded = Vec::new();
        let mut base = vec![0.0f32; self.dimensions];
        let mut scratch = vec![0.0f32; self.dimensions];
        self.vector_into(node, &mut base);

        while self.neighbors[node as usize][layer].len() > m_max {
            let links = self.neighbors[node as usize][layer].clone();
            let scored: Vec<(f32, u32)> = links
                .iter()
                .map(|&c| (self.distance_to_node(&base, c, &mut scratch), c))
                .collect();
            let preferred = select_neighbors_heuristic(self, pinned, &scored, links.len() - 1);

            // Farthest first, with the heuristic's reject at the front
            let mut order: Vec<(f32, u32)> = scored
                .into_iter()
                .filter(|(_, c)| !pinned.contains(c))
                .collect();
            order.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
            if let Some(pos) = order.iter().position(|(_, c)| !preferred.contains(c)) {
                order[..=pos].rotate_right(1);
            }
            let Some(&(_, first)) = order.first() else {
                break;
            };

            let has_detour = |target: u32| {
                links
                    .iter()
                    .any(|&s| s != target && self.neighbors[s as usize][layer].contains(&target))
            };
            let victim = match order.iter().find(|(_, c)| has_detour(*c)) {
                Some(&(_, c)) => c,
                None => {
                    if !self.hand_off(first, layer, &links) {
                        stranded.push(first);
                    }
                    first
                }
            };
            let kept = links.into_iter().filter(|&c| c != victim).collect();
            self.set_links(node, layer, kept);
        }
        stranded
    }

    /// Links `target` from the closest of `hosts` that has a free slot at `layer`.
    fn hand_off(&mut self, target: u32, layer: usize, hosts: &[u32]) -> bool {
        let m_max = self.config.max_links(layer);
        let mut base = vec![0.0f32; self.dimensions];
        let mut scratch = vec![0.0f32; self.dimensions];
        self.vector_into(target, &mut base);
        let host = hosts
            .iter()
            .copied()
            .filter(|&h| h != target && self.neighbors[h as usize][layer].len() < m_max)
            .map(|h| (self.distance_to_node(&base, h, &mut scratch), h))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        match host {
            Some((_, h)) => {
                self.add_link(h, target, layer);
                true
            }
            None => false,
        }
    }
}

/// Heuristic neighbor selection (Algorithm 4 from the HNSW paper).
///
/// `kept` edges are retained unconditionally; remaining slots up to `m` go to
/// candidates that are closer to the base than to every already-selected
/// neighbor. If that leaves slots free, the closest unused candidates fill
/// them. Candidates are `(distance_to_base, id)`; ties go to the lower id.
pub(crate) fn select_neighbors_heuristic(
    index: &HnswIndex,
    kept: &[u32],
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<u32> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut selected: Vec<u32> = kept.iter().copied().take(m).collect();
    let mut chosen: HashSet<u32> = selected.iter().copied().collect();
    let mut cand_buf = vec![0.0f32; index.dimensions];
    let mut scratch = vec![0.0f32; index.dimensions];

    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        if chosen.contains(&cid) {
            continue;
        }
        index.vector_into(cid, &mut cand_buf);
        let is_diverse = selected
            .iter()
            .all(|&sid| dist_to_base <= index.distance_to_node(&cand_buf, sid, &mut scratch));
        if is_diverse {
            selected.push(cid);
            chosen.insert(cid);
        }
    }

    for &(_, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        if chosen.insert(cid) {
            selected.push(cid);
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::{DistanceMetric, IndexConfig};
    use crate::search::types::SearchOptions;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn vector(i: usize, dim: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(i as u64);
        (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    #[test]
    fn test_self_query_returns_own_id() {
        let mut index = HnswIndex::with_metric(16, DistanceMetric::Euclidean).unwrap();
        for i in 0..300 {
            index.insert(format!("id{i}"), &vector(i, 16), None).unwrap();
        }
        for i in (0..300).step_by(37) {
            let results = index.search(&vector(i, 16), 1, &SearchOptions::default()).unwrap();
            assert_eq!(results[0].id, format!("id{i}"));
            assert!(results[0].score < 1e-3);
        }
    }

    #[test]
    fn test_duplicate_id_rejected_without_mutation() {
        let mut index = HnswIndex::with_metric(4, DistanceMetric::Cosine).unwrap();
        index.insert("a", &[1.0, 0.0, 0.0, 0.0], None).unwrap();
        let err = index.insert("a", &[0.0, 1.0, 0.0, 0.0], None).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateId(ref id) if id == "a"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.slot_count(), 1);
        let (stored, _) = index.get("a").unwrap();
        assert_eq!(stored, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_dimension_and_finite_checks() {
        let mut index = HnswIndex::with_metric(3, DistanceMetric::Cosine).unwrap();
        assert!(matches!(
            index.insert("x", &[1.0, 2.0], None),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            index.insert("x", &[1.0, f32::NAN, 0.0], None),
            Err(IndexError::InvalidVector { position: 1, .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_capacity_exceeded() {
        let cfg = IndexConfig {
            max_elements: 3,
            ..IndexConfig::default()
        };
        let mut index = HnswIndex::new(2, DistanceMetric::Euclidean, cfg).unwrap();
        for i in 0..3 {
            index.insert(format!("{i}"), &[i as f32, 1.0], None).unwrap();
        }
        assert!(matches!(
            index.insert("overflow", &[9.0, 9.0], None),
            Err(IndexError::CapacityExceeded { max_elements: 3 })
        ));
    }

    #[test]
    fn test_upsert_replaces() {
        let mut index = HnswIndex::with_metric(2, DistanceMetric::Euclidean).unwrap();
        assert!(!index.upsert("a", &[0.0, 0.0], None).unwrap());
        index.insert("b", &[5.0, 5.0], None).unwrap();
        assert!(index.upsert("a", &[10.0, 10.0], None).unwrap());
        assert_eq!(index.len(), 2);
        assert_eq!(index.deleted_count(), 1);
        let results = index.search(&[10.0, 10.0], 1, &SearchOptions::default()).unwrap();
        assert_eq!(results[0].id, "a");
        assert!(results[0].score < 1e-6);
    }

    #[test]
    fn test_graph_invariants_after_build() {
        let cfg = IndexConfig {
            m: 4,
            ef_construction: 64,
            ..IndexConfig::default()
        };
        let mut index = HnswIndex::new(8, DistanceMetric::Euclidean, cfg).unwrap();
        for i in 0..500 {
            index.insert(format!("{i}"), &vector(i, 8), None).unwrap();
        }
        index.check_integrity().unwrap();
        let ep = index.entry_point.unwrap();
        assert_eq!(index.layers[ep as usize] as usize, index.max_layer);
        assert!(index.max_layer > 0, "500 nodes with M=4 span several layers");
        assert!(index.is_connected());
    }

    #[test]
    fn test_tight_clusters_stay_reachable_with_small_m() {
        let (dim, clusters, n) = (8, 10, 2_000);
        for seed in 0..3u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let centers: Vec<Vec<f32>> = (0..clusters)
                .map(|_| (0..dim).map(|_| rng.gen_range(-5.0f32..5.0)).collect())
                .collect();
            let points: Vec<Vec<f32>> = (0..n)
                .map(|i| {
                    centers[i % clusters]
                        .iter()
                        .map(|&c| c + rng.gen_range(-0.1f32..0.1))
                        .collect()
                })
                .collect();

            let cfg = IndexConfig {
                m: 4,
                ef_construction: 16,
                seed,
                ..IndexConfig::default()
            };
            let mut index = HnswIndex::new(dim, DistanceMetric::Euclidean, cfg).unwrap();
            for (i, p) in points.iter().enumerate() {
                index.insert(format!("{i}"), p, None).unwrap();
            }
            index.check_integrity().unwrap();
            assert!(index.is_connected(), "seed {seed}: layer 0 split after build");

            let misses = points
                .iter()
                .enumerate()
                .filter(|(i, p)| {
                    let hit = index.search(p, 1, &SearchOptions::default()).unwrap();
                    hit[0].id != i.to_string()
                })
                .count();
            assert!(misses <= n / 50, "seed {seed}: {misses} self-queries missed");
        }
    }

    #[test]
    fn test_reverse_index_tracks_edges_with_tiny_m() {
        let cfg = IndexConfig {
            m: 2,
            ef_construction: 8,
            ..IndexConfig::default()
        };
        let mut index = HnswIndex::new(2, DistanceMetric::Euclidean, cfg).unwrap();
        for i in 0..200 {
            index.insert(format!("{i}"), &vector(i, 2), None).unwrap();
        }
        index.check_integrity().unwrap();
        assert!(index.is_connected());
        for node in 0..index.slot_count() as u32 {
            for layer in 0..=index.layers[node as usize] as usize {
                for &target in &index.neighbors[node as usize][layer] {
                    assert!(index.in_links(target, layer).contains(&node));
                }
            }
        }
    }

    #[test]
    fn test_build_is_deterministic_for_seed() {
        let build = || {
            let mut index = HnswIndex::with_metric(8, DistanceMetric::Euclidean).unwrap();
            for i in 0..100 {
                index.insert(format!("{i}"), &vector(i, 8), None).unwrap();
            }
            index
        };
        let (a, b) = (build(), build());
        assert_eq!(a.layers, b.layers);
        assert_eq!(a.neighbors, b.neighbors);
    }

    #[test]
    fn test_insert_batch_cancellation_keeps_completed() {
        let mut index = HnswIndex::with_metric(4, DistanceMetric::Euclidean).unwrap();
        let token = CancellationToken::new();
        let items = (0..5).map(|i| InsertRequest::new(format!("{i}"), vector(i, 4), None));
        assert_eq!(index.insert_batch(items, &token).unwrap(), 5);

        token.cancel();
        let more = (5..10).map(|i| InsertRequest::new(format!("{i}"), vector(i, 4), None));
        assert!(matches!(
            index.insert_batch(more, &token),
            Err(IndexError::Cancelled { completed: 0 })
        ));
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_heuristic_prefers_diverse_neighbors() {
        let mut index = HnswIndex::with_metric(2, DistanceMetric::Euclidean).unwrap();
        // Two points clustered to the right, one to the left of the origin
        index.insert("r1", &[1.0, 0.0], None).unwrap();
        index.insert("r2", &[1.1, 0.0], None).unwrap();
        index.insert("l", &[-1.5, 0.0], None).unwrap();
        let candidates = [(1.0, 0u32), (1.21, 1), (2.25, 2)];
        let picked = select_neighbors_heuristic(&index, &[], &candidates, 2);
        assert_eq!(picked, vec![0, 2], "r2 is closer to r1 than to the base");

        let filled = select_neighbors_heuristic(&index, &[], &candidates, 3);
        assert_eq!(filled, vec![0, 2, 1]);

        let with_kept = select_neighbors_heuristic(&index, &[1], &candidates, 2);
        assert_eq!(with_kept, vec![1, 2]);
    }
}
