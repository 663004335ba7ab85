//! Deletion and compaction.
//!
//! Soft delete marks a node and drops its external id; the node keeps its edges
//! and still routes traffic. Hard delete unlinks the node from every layer and
//! repairs the neighborhoods it leaves behind. Compaction rebuilds a fresh graph
//! from the live nodes only.

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::hnsw::graph::{HnswIndex, NodeState};
use crate::hnsw::insert::select_neighbors_heuristic;
use crate::hnsw::search::{greedy_descent, search_layer, QueryDistance};
use crate::hnsw::visited::with_visited;
use serde::{Deserialize, Serialize};

/// How [`HnswIndex::delete`] removes a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Mark only. O(1); the slot is reclaimed by [`HnswIndex::compact`].
    #[default]
    Soft,
    /// Unlink from the graph and repair neighbor lists.
    Hard,
}

impl HnswIndex {
    /// Deletes a live vector. Returns `Ok(false)` when `id` is unknown.
    pub fn delete(&mut self, id: &str, mode: DeleteMode) -> Result<bool> {
        self.ensure_healthy()?;
        let Some(&node) = self.id_map.get(id) else {
            return Ok(false);
        };
        match mode {
            DeleteMode::Soft => self.mark_soft_deleted(node),
            DeleteMode::Hard => self.hard_delete(node)?,
        }
        Ok(true)
    }

    /// Deletes `ids` in order, polling `token` before each one.
    /// Returns how many ids were found and deleted.
    pub fn delete_batch<S: AsRef<str>>(
        &mut self,
        ids: &[S],
        mode: DeleteMode,
        token: &CancellationToken,
    ) -> Result<usize> {
        let mut deleted = 0;
        for (completed, id) in ids.iter().enumerate() {
            token.check(completed)?;
            if self.delete(id.as_ref(), mode)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub(crate) fn mark_soft_deleted(&mut self, node: u32) {
        self.states[node as usize] = NodeState::SoftDeleted;
        self.id_map.remove(&self.ids[node as usize]);
    }

    /// Unlinks `node` using the reverse edge index, so the cost depends on the
    /// node's neighborhood rather than on the size of the graph.
    fn hard_delete(&mut self, node: u32) -> Result<()> {
        let level = self.layers[node as usize] as usize;
        let out_edges = std::mem::take(&mut self.neighbors[node as usize]);
        let mut in_edges = std::mem::take(&mut self.reverse[node as usize]);

        for (layer, outs) in out_edges.iter().enumerate() {
            for &v in outs {
                self.drop_reverse(v, layer, node);
            }
        }
        for (layer, sources) in in_edges.iter_mut().enumerate() {
            sources.sort_unstable();
            for &u in sources.iter() {
                let list = &mut self.neighbors[u as usize][layer];
                if let Some(pos) = list.iter().position(|&x| x == node) {
                    list.remove(pos);
                }
            }
        }
        self.id_map.remove(&self.ids[node as usize]);
        self.states[node as usize] = NodeState::Removed;
        if self.entry_point == Some(node) {
            self.reelect_entry_point();
        }

        let mut base = vec![0.0f32; self.dimensions];
        let mut scratch = vec![0.0f32; self.dimensions];
        for (layer, outs) in out_edges.iter().enumerate() {
            let m_max = self.config.max_links(layer);

            // Former in-neighbors keep their edges and fill the freed slot
            // from the deleted node's own neighborhood
            for &u in in_edges.get(layer).into_iter().flatten() {
                let kept = self.neighbors[u as usize][layer].clone();
                let extra: Vec<u32> = outs
                    .iter()
                    .copied()
                    .filter(|&c| c != u && !kept.contains(&c))
                    .collect();
                if extra.is_empty() {
                    continue;
                }
                self.vector_into(u, &mut base);
                let candidates: Vec<(f32, u32)> = extra
                    .iter()
                    .map(|&c| (self.distance_to_node(&base, c, &mut scratch), c))
                    .collect();
                let links = select_neighbors_heuristic(self, &kept, &candidates, m_max);
                self.set_links(u, layer, links);
            }

            // Former out-neighbors left without any in-edge get re-linked
            for &v in outs {
                if self.in_links(v, layer).is_empty() && self.entry_point != Some(v) {
                    self.relink_orphan(v, layer)?;
                }
            }
        }

        tracing::debug!(node, layers = level + 1, "hard delete unlinked node");
        Ok(())
    }

    /// Gives `v` an in-edge at `layer` from its nearest neighbor with spare
    /// capacity (or, failing that, from its nearest neighbor after re-pruning).
    pub(crate) fn relink_orphan(&mut self, v: u32, layer: usize) -> Result<()> {
        let m_max = self.config.max_links(layer);
        let mut base = vec![0.0f32; self.dimensions];
        let mut scratch = vec![0.0f32; self.dimensions];
        self.vector_into(v, &mut base);

        let mut candidates: Vec<(f32, u32)> = self.neighbors[v as usize][layer]
            .iter()
            .map(|&c| (self.distance_to_node(&base, c, &mut scratch), c))
            .collect();

        if candidates.is_empty() {
            // Isolated: find the closest nodes on this layer from the entry point
            let Some(ep) = self.entry_point else {
                return Ok(());
            };
            let found = {
                let distance = QueryDistance::new(self, &base);
                let not_self = |id: u32| id != v;
                with_visited(self.slot_count(), |visited| -> Result<Vec<(f32, u32)>> {
                    let start = if self.max_layer > layer {
                        greedy_descent(self, &distance, ep, self.max_layer, layer + 1, visited)?
                    } else {
                        ep
                    };
                    search_layer(
                        self,
                        &distance,
                        std::slice::from_ref(&start),
                        self.config.ef_construction,
                        layer,
                        visited,
                        &not_self,
                    )
                })?
            };
            candidates = found
                .into_iter()
                .map(|(_, c)| (self.distance_to_node(&base, c, &mut scratch), c))
                .collect();
            let links = select_neighbors_heuristic(self, &[], &candidates, m_max);
            self.set_links(v, layer, links);
        }
        candidates.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let Some(&(_, nearest)) = candidates.first() else {
            return Ok(());
        };
        let host = candidates
            .iter()
            .map(|&(_, c)| c)
            .find(|&c| self.neighbors[c as usize][layer].len() < m_max)
            .unwrap_or(nearest);

        self.add_link(host, v, layer);
        if self.neighbors[host as usize][layer].len() > m_max {
            let stranded = self.prune_links(host, layer, &[v]);
            if !stranded.is_empty() {
                tracing::debug!(host, layer, ?stranded, "re-pruning left nodes without a detour");
            }
        }
        Ok(())
    }

    /// Picks the non-removed node with the highest layer (lowest id on ties).
    fn reelect_entry_point(&mut self) {
        let best = (0..self.slot_count())
            .filter(|&i| self.states[i] != NodeState::Removed)
            .max_by(|&a, &b| self.layers[a].cmp(&self.layers[b]).then(b.cmp(&a)));
        match best {
            Some(ep) => {
                self.entry_point = Some(ep as u32);
                self.max_layer = self.layers[ep] as usize;
            }
            None => {
                self.entry_point = None;
                self.max_layer = 0;
            }
        }
        tracing::debug!(entry_point = ?self.entry_point, max_layer = self.max_layer, "entry point re-elected");
    }

    /// Builds a new index from the live nodes only, reclaiming every deleted slot.
    /// Codes are carried over unchanged. On cancellation `self` is untouched.
    pub fn compact(&self, token: &CancellationToken) -> Result<HnswIndex> {
        self.ensure_healthy()?;
        let mut fresh = HnswIndex::new(self.dimensions, self.metric, self.config.clone())?;
        fresh.codec = self.codec.clone();
        let code_size = self.code_size();
        let mut buf = vec![0.0f32; self.dimensions];
        let mut completed = 0;
        for id in 0..self.slot_count() as u32 {
            if !self.is_live(id) {
                continue;
            }
            token.check(completed)?;
            self.vector_into(id, &mut buf);
            let node = fresh.insert_unchecked(
                self.ids[id as usize].clone(),
                &buf,
                self.metadata[id as usize].clone(),
            )?;
            if code_size > 0 {
                let start = node as usize * code_size;
                fresh.codes[start..start + code_size].copy_from_slice(self.code(id));
            }
            completed += 1;
        }
        tracing::info!(
            live = completed,
            reclaimed = self.slot_count() - completed,
            "compacted index"
        );
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::hnsw::{DistanceMetric, IndexConfig};
    use crate::search::types::SearchOptions;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn build(n: usize, dim: usize) -> HnswIndex {
        let mut rng = StdRng::seed_from_u64(99);
        let mut index = HnswIndex::with_metric(dim, DistanceMetric::Euclidean).unwrap();
        for i in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            index.insert(format!("v{i}"), &v, None).unwrap();
        }
        index
    }

    #[test]
    fn test_unknown_id_returns_false() {
        let mut index = build(3, 4);
        assert!(!index.delete("nope", DeleteMode::Soft).unwrap());
        assert!(!index.delete("nope", DeleteMode::Hard).unwrap());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_soft_delete_excludes_but_keeps_edges() {
        let mut index = build(100, 8);
        let (v, _) = index.get("v10").unwrap();
        let node = index.id_map["v10"];
        let edges_before = index.neighbors[node as usize].clone();
        assert!(index.delete("v10", DeleteMode::Soft).unwrap());
        assert_eq!(index.neighbors[node as usize], edges_before);
        assert!(!index.contains("v10"));
        assert_eq!(index.deleted_count(), 1);
        let results = index.search(&v, 10, &SearchOptions::default()).unwrap();
        assert!(results.iter().all(|r| r.id != "v10"));
        // Deleting again is a no-op
        assert!(!index.delete("v10", DeleteMode::Soft).unwrap());
    }

    #[test]
    fn test_hard_delete_unlinks_and_stays_connected() {
        let mut index = build(400, 8);
        for i in (0..400).step_by(9) {
            assert!(index.delete(&format!("v{i}"), DeleteMode::Hard).unwrap());
        }
        index.check_integrity().unwrap();
        assert!(index.is_connected());
        assert_eq!(index.len(), 400 - 45);
        let query = index.get("v1").unwrap().0;
        let results = index.search(&query, 20, &SearchOptions::default()).unwrap();
        assert_eq!(results[0].id, "v1");
        assert!(results.iter().all(|r| r.id != "v0" && r.id != "v9"));
    }

    #[test]
    fn test_hard_delete_updates_reverse_index() {
        let mut index = build(300, 6);
        let victims: Vec<u32> = (0..300).step_by(3).map(|i| index.id_map[&format!("v{i}")]).collect();
        for &node in &victims {
            let id = index.ids[node as usize].clone();
            index.delete(&id, DeleteMode::Hard).unwrap();
        }
        index.check_integrity().unwrap();
        assert!(index.is_connected());
        for &node in &victims {
            assert!(index.reverse[node as usize].is_empty());
            assert!(index.neighbors[node as usize].is_empty());
        }
        for node in 0..index.slot_count() as u32 {
            if index.is_removed(node) {
                continue;
            }
            for (layer, list) in index.neighbors[node as usize].iter().enumerate() {
                for &target in list {
                    assert!(!victims.contains(&target));
                    assert!(index.in_links(target, layer).contains(&node));
                }
            }
        }
    }

    #[test]
    fn test_hard_delete_entry_point_reelects() {
        let mut index = build(200, 4);
        let ep = index.entry_point.unwrap();
        let ep_id = index.ids[ep as usize].clone();
        index.delete(&ep_id, DeleteMode::Hard).unwrap();
        let new_ep = index.entry_point.unwrap();
        assert_ne!(new_ep, ep);
        assert_eq!(index.layers[new_ep as usize] as usize, index.max_layer);
        index.check_integrity().unwrap();
        assert!(index.is_connected());
    }

    #[test]
    fn test_delete_everything_then_reuse() {
        let mut index = build(20, 4);
        for i in 0..20 {
            index.delete(&format!("v{i}"), DeleteMode::Hard).unwrap();
        }
        assert!(index.is_empty());
        assert!(index.entry_point.is_none());
        assert!(index
            .search(&[0.0; 4], 3, &SearchOptions::default())
            .unwrap()
            .is_empty());
        index.insert("fresh", &[0.1, 0.2, 0.3, 0.4], None).unwrap();
        assert_eq!(index.search(&[0.0; 4], 3, &SearchOptions::default()).unwrap()[0].id, "fresh");
        index.check_integrity().unwrap();
    }

    #[test]
    fn test_compact_reclaims_slots() {
        let mut index = build(150, 8);
        for i in 0..50 {
            let mode = if i % 2 == 0 { DeleteMode::Soft } else { DeleteMode::Hard };
            index.delete(&format!("v{i}"), mode).unwrap();
        }
        let compacted = index.compact(&CancellationToken::new()).unwrap();
        assert_eq!(compacted.len(), 100);
        assert_eq!(compacted.slot_count(), 100);
        assert_eq!(compacted.deleted_count(), 0);
        compacted.check_integrity().unwrap();

        let query = index.get("v120").unwrap().0;
        let a = index.search(&query, 1, &SearchOptions::default()).unwrap();
        let b = compacted.search(&query, 1, &SearchOptions::default()).unwrap();
        assert_eq!(a[0].id, b[0].id);
    }

    #[test]
    fn test_compact_cancellation_leaves_source() {
        let index = build(30, 4);
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            index.compact(&token),
            Err(IndexError::Cancelled { completed: 0 })
        ));
        assert_eq!(index.len(), 30);
    }

    #[test]
    fn test_delete_batch() {
        let mut index = build(10, 4);
        let token = CancellationToken::new();
        let deleted = index
            .delete_batch(&["v1", "v2", "missing"], DeleteMode::Soft, &token)
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(index.len(), 8);
    }

    #[test]
    fn test_capacity_counts_deleted_slots() {
        let cfg = IndexConfig {
            max_elements: 2,
            ..IndexConfig::default()
        };
        let mut index = HnswIndex::new(2, DistanceMetric::Euclidean, cfg).unwrap();
        index.insert("a", &[0.0, 0.0], None).unwrap();
        index.insert("b", &[1.0, 0.0], None).unwrap();
        index.delete("a", DeleteMode::Soft).unwrap();
        assert!(matches!(
            index.insert("c", &[2.0, 0.0], None),
            Err(IndexError::CapacityExceeded { .. })
        ));
        let mut compacted = index.compact(&CancellationToken::new()).unwrap();
        compacted.insert("c", &[2.0, 0.0], None).unwrap();
        assert_eq!(compacted.len(), 2);
    }
}
