//! HNSW graph structure and configuration.
//!
//! [`IndexConfig`] defines tuning parameters (M, ef_construction, ef_search,
//! capacity, quantization). [`HnswIndex`] stores the graph using a
//! Struct-of-Arrays layout keyed by internal `u32` node ids.

use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::distance::DistanceMetric;
use crate::metadata::Metadata;
use crate::quantization::{Codec, QuantizationConfig, VectorCodec};
use crate::search::types::IndexStats;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// Configuration parameters for an HNSW index. Immutable after construction.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of bidirectional links per node above layer 0 (layer 0 uses `2 * m`).
    pub m: usize,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Default candidate list size during search (higher = better recall, slower).
    pub ef_search: usize,
    /// Maximum number of node slots, including deleted nodes awaiting compaction.
    pub max_elements: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    /// Codec applied to stored vectors once trained.
    pub quantization: QuantizationConfig,
    /// Keep raw f32 vectors next to codes for exact reranking.
    pub store_raw_vectors: bool,
    /// Seed for level assignment and codebook training.
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: config::DEFAULT_M,
            ef_construction: config::DEFAULT_EF_CONSTRUCTION,
            ef_search: config::DEFAULT_EF_SEARCH,
            max_elements: config::DEFAULT_MAX_ELEMENTS,
            max_layers: config::DEFAULT_MAX_LAYERS,
            quantization: QuantizationConfig::None,
            store_raw_vectors: false,
            seed: config::DEFAULT_SEED,
        }
    }
}

impl IndexConfig {
    /// Maximum links per node at layer 0.
    #[inline]
    pub fn m_max0(&self) -> usize {
        self.m * 2
    }

    /// Maximum links per node at `layer`.
    #[inline]
    pub fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0()
        } else {
            self.m
        }
    }

    /// Checks the parameters against `dimensions` before an index is built.
    pub fn validate(&self, dimensions: usize) -> Result<()> {
        if dimensions == 0 || dimensions > config::MAX_DIMENSION {
            return Err(IndexError::InvalidDimensions(dimensions));
        }
        if self.m < 2 {
            return Err(IndexError::InvalidConfig(format!("m must be >= 2, got {}", self.m)));
        }
        if self.ef_construction < self.m {
            return Err(IndexError::InvalidConfig(format!(
                "ef_construction ({}) must be >= m ({})",
                self.ef_construction, self.m
            )));
        }
        if self.ef_search == 0 {
            return Err(IndexError::InvalidConfig("ef_search must be > 0".into()));
        }
        if self.max_elements == 0 || self.max_elements > u32::MAX as usize {
            return Err(IndexError::InvalidConfig(format!(
                "max_elements must be in 1..={}, got {}",
                u32::MAX,
                self.max_elements
            )));
        }
        if self.max_layers == 0 || self.max_layers > u8::MAX as usize {
            return Err(IndexError::InvalidConfig(format!(
                "max_layers must be in 1..=255, got {}",
                self.max_layers
            )));
        }
        self.quantization.validate(dimensions)
    }
}

/// Lifecycle state of a node slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Live,
    /// Excluded from results, still used for navigation.
    SoftDeleted,
    /// Unlinked from the graph; the slot is kept until compaction.
    Removed,
}

/// HNSW index using Struct-of-Arrays (SoA) layout.
///
/// Raw f32 vectors are kept while no codec is trained, or always when
/// `store_raw_vectors` is set. Once a codec is trained every slot has a code.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) config: IndexConfig,
    pub(crate) metric: DistanceMetric,
    pub(crate) dimensions: usize,
    // SoA: external identity
    pub(crate) ids: Vec<String>,
    pub(crate) id_map: HashMap<String, u32>,
    // SoA: vector storage
    pub(crate) raw_vectors: Vec<f32>,
    pub(crate) codes: Vec<u8>,
    pub(crate) codec: Option<Codec>,
    pub(crate) metadata: Vec<Option<Metadata>>,
    // SoA: graph structure
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>, // [node_id][layer][neighbor_ids]
    // Derived from `neighbors`, never persisted
    pub(crate) reverse: Vec<Vec<Vec<u32>>>, // [node_id][layer][in_neighbor_ids]
    pub(crate) layers: Vec<u8>,
    pub(crate) states: Vec<NodeState>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
    rng: StdRng,
    poisoned: AtomicBool,
}

impl HnswIndex {
    /// Creates an empty index. Fails on invalid dimensions or config.
    pub fn new(dimensions: usize, metric: DistanceMetric, config: IndexConfig) -> Result<Self> {
        config.validate(dimensions)?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            metric,
            dimensions,
            ids: Vec::new(),
            id_map: HashMap::new(),
            raw_vectors: Vec::new(),
            codes: Vec::new(),
            codec: None,
            metadata: Vec::new(),
            neighbors: Vec::new(),
            reverse: Vec::new(),
            layers: Vec::new(),
            states: Vec::new(),
            entry_point: None,
            max_layer: 0,
            rng,
            poisoned: AtomicBool::new(false),
        })
    }

    /// Creates an empty index with default config (M=16, ef_c=200, no quantization).
    pub fn with_metric(dimensions: usize, metric: DistanceMetric) -> Result<Self> {
        Self::new(dimensions, metric, IndexConfig::default())
    }

    /// Reassembles an index from persisted parts. The level RNG is reseeded from
    /// the config seed mixed with the slot count and the reverse edge index is
    /// rebuilt; edges to missing nodes are left for `verify_structure` to report.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: IndexConfig,
        metric: DistanceMetric,
        dimensions: usize,
        ids: Vec<String>,
        states: Vec<NodeState>,
        raw_vectors: Vec<f32>,
        codes: Vec<u8>,
        codec: Option<Codec>,
        metadata: Vec<Option<Metadata>>,
        neighbors: Vec<Vec<Vec<u32>>>,
        layers: Vec<u8>,
        entry_point: Option<u32>,
        max_layer: usize,
    ) -> Self {
        let id_map = ids
            .iter()
            .zip(&states)
            .enumerate()
            .filter(|(_, (_, &s))| s == NodeState::Live)
            .map(|(i, (id, _))| (id.clone(), i as u32))
            .collect();
        let rng = StdRng::seed_from_u64(config.seed ^ ids.len() as u64);
        let mut reverse: Vec<Vec<Vec<u32>>> = neighbors
            .iter()
            .map(|layers| vec![Vec::new(); layers.len()])
            .collect();
        for (node, layers) in neighbors.iter().enumerate() {
            for (layer, list) in layers.iter().enumerate() {
                for &nb in list {
                    if let Some(sources) = reverse.get_mut(nb as usize).and_then(|l| l.get_mut(layer)) {
                        sources.push(node as u32);
                    }
                }
            }
        }
        Self {
            config,
            metric,
            dimensions,
            ids,
            id_map,
            raw_vectors,
            codes,
            codec,
            metadata,
            neighbors,
            reverse,
            layers,
            states,
            entry_point,
            max_layer,
            rng,
            poisoned: AtomicBool::new(false),
        }
    }

    /// Parameters the index was built with.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Distance metric used for every comparison.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Length every stored and query vector must have.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Trained quantizer, if any.
    pub fn codec(&self) -> Option<&Codec> {
        self.codec.as_ref()
    }

    /// Number of live (searchable) vectors.
    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    /// Whether no live vectors remain.
    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }

    /// Number of soft-deleted or removed slots awaiting compaction.
    pub fn deleted_count(&self) -> usize {
        self.states.len() - self.id_map.len()
    }

    /// Total allocated node slots (live + deleted).
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_map.contains_key(id)
    }

    /// Returns the stored vector (raw, or decoded from its code) and metadata.
    pub fn get(&self, id: &str) -> Option<(Vec<f32>, Option<&Metadata>)> {
        let &node = self.id_map.get(id)?;
        let mut vector = vec![0.0f32; self.dimensions];
        self.vector_into(node, &mut vector);
        Some((vector, self.metadata[node as usize].as_ref()))
    }

    /// Generate a random layer for a new node: `floor(-ln(U) / ln(M))`.
    pub(crate) fn random_level(&mut self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        // 1 - U lies in (0, 1], so ln never sees zero
        let r: f64 = 1.0 - self.rng.gen::<f64>();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    #[inline]
    pub(crate) fn is_live(&self, id: u32) -> bool {
        self.states[id as usize] == NodeState::Live
    }

    #[inline]
    pub(crate) fn is_removed(&self, id: u32) -> bool {
        self.states[id as usize] == NodeState::Removed
    }

    /// Raw vectors exist while no codec is trained or when explicitly kept.
    #[inline]
    pub(crate) fn has_raw_vectors(&self) -> bool {
        self.codec.is_none() || self.config.store_raw_vectors
    }

    #[inline]
    pub(crate) fn raw_vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimensions;
        &self.raw_vectors[start..start + self.dimensions]
    }

    /// Code bytes of a node. Only valid while a codec is trained.
    #[inline]
    pub(crate) fn code(&self, id: u32) -> &[u8] {
        let size = self.code_size();
        let start = id as usize * size;
        &self.codes[start..start + size]
    }

    #[inline]
    pub(crate) fn code_size(&self) -> usize {
        self.codec.as_ref().map_or(0, |c| c.as_codec().code_size())
    }

    /// Writes the most precise available representation of a node into `buf`.
    pub(crate) fn vector_into(&self, id: u32, buf: &mut [f32]) {
        if self.has_raw_vectors() {
            buf.copy_from_slice(self.raw_vector(id));
        } else if let Some(ref codec) = self.codec {
            codec.as_codec().decode_into(self.code(id), buf);
        }
    }

    /// Distance from an f32 vector to a stored node using its most precise representation.
    /// `scratch` must hold `dimensions` floats; it is only used for coded nodes.
    #[inline]
    pub(crate) fn distance_to_node(&self, vector: &[f32], id: u32, scratch: &mut [f32]) -> f32 {
        if self.has_raw_vectors() {
            self.metric.distance(vector, self.raw_vector(id))
        } else {
            self.vector_into(id, scratch);
            self.metric.distance(vector, scratch)
        }
    }

    /// Appends a node's storage fields. Neighbor lists are filled by the caller.
    pub(crate) fn push_node(
        &mut self,
        id: String,
        vector: &[f32],
        metadata: Option<Metadata>,
        level: usize,
    ) -> u32 {
        let internal_id = self.ids.len() as u32;
        if self.has_raw_vectors() {
            self.raw_vectors.extend_from_slice(vector);
        }
        if let Some(ref codec) = self.codec {
            codec.as_codec().encode_into(vector, &mut self.codes);
        }
        self.id_map.insert(id.clone(), internal_id);
        self.ids.push(id);
        self.metadata.push(metadata);
        self.neighbors.push(vec![Vec::new(); level + 1]);
        self.reverse.push(vec![Vec::new(); level + 1]);
        self.layers.push(level as u8);
        self.states.push(NodeState::Live);
        internal_id
    }

    /// Appends the edge `from -> to` at `layer`.
    pub(crate) fn add_link(&mut self, from: u32, to: u32, layer: usize) {
        self.neighbors[from as usize][layer].push(to);
        self.reverse[to as usize][layer].push(from);
    }

    /// Replaces the out-edges of `node` at `layer`, keeping the reverse index in step.
    pub(crate) fn set_links(&mut self, node: u32, layer: usize, links: Vec<u32>) {
        let old = std::mem::replace(&mut self.neighbors[node as usize][layer], links);
        for &target in &old {
            if !self.neighbors[node as usize][layer].contains(&target) {
                self.drop_reverse(target, layer, node);
            }
        }
        for i in 0..self.neighbors[node as usize][layer].len() {
            let target = self.neighbors[node as usize][layer][i];
            if !old.contains(&target) {
                self.reverse[target as usize][layer].push(node);
            }
        }
    }

    /// Forgets that `source` links to `target` at `layer`. Only the reverse side changes.
    pub(crate) fn drop_reverse(&mut self, target: u32, layer: usize, source: u32) {
        if let Some(sources) = self.reverse[target as usize].get_mut(layer) {
            if let Some(pos) = sources.iter().position(|&s| s == source) {
                sources.swap_remove(pos);
            }
        }
    }

    /// Nodes with an edge to `node` at `layer`.
    #[inline]
    pub(crate) fn in_links(&self, node: u32, layer: usize) -> &[u32] {
        self.reverse[node as usize]
            .get(layer)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Rejects vectors with the wrong length or non-finite components.
    pub(crate) fn validate_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
            return Err(IndexError::InvalidVector {
                id: id.to_string(),
                position,
            });
        }
        Ok(())
    }

    /// Fails fast once the index has detected corruption.
    #[inline]
    pub(crate) fn ensure_healthy(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(IndexError::IndexCorruption(
                "index was poisoned by an earlier corruption error; reload it".into(),
            ));
        }
        Ok(())
    }

    /// Marks the index unusable and returns the corruption error to propagate.
    pub(crate) fn poison(&self, reason: String) -> IndexError {
        tracing::warn!(%reason, "index corruption detected");
        self.poisoned.store(true, Ordering::Release);
        IndexError::IndexCorruption(reason)
    }

    /// Whether a corruption error has disabled the index.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Trains the configured codec on `sample` (`n * dimensions` floats) and
    /// re-encodes every stored vector. Raw vectors are freed afterwards unless
    /// `store_raw_vectors` is set.
    pub fn train_quantizer(&mut self, sample: &[f32]) -> Result<()> {
        self.ensure_healthy()?;
        if !self.config.quantization.is_enabled() {
            return Err(IndexError::InvalidConfig(
                "quantization is disabled for this index".into(),
            ));
        }
        let codec = Codec::train(
            &self.config.quantization,
            self.dimensions,
            sample,
            self.config.seed,
        )?
        .ok_or_else(|| IndexError::InvalidConfig("quantization is disabled".into()))?;

        let n = self.slot_count();
        let mut codes = Vec::with_capacity(n * codec.as_codec().code_size());
        let mut buf = vec![0.0f32; self.dimensions];
        for id in 0..n as u32 {
            self.vector_into(id, &mut buf);
            codec.as_codec().encode_into(&buf, &mut codes);
        }

        tracing::info!(
            codec = codec.name(),
            nodes = n,
            ratio = codec.as_codec().compression_ratio(),
            "trained quantizer"
        );
        self.codes = codes;
        self.codec = Some(codec);
        if !self.config.store_raw_vectors {
            self.raw_vectors = Vec::new();
        }
        Ok(())
    }

    /// Trains the codec on the vectors currently stored in the index.
    pub fn train_quantizer_from_index(&mut self) -> Result<()> {
        let live: Vec<u32> = (0..self.slot_count() as u32)
            .filter(|&id| self.is_live(id))
            .collect();
        let mut sample = vec![0.0f32; live.len() * self.dimensions];
        for (chunk, &id) in sample.chunks_exact_mut(self.dimensions).zip(&live) {
            self.vector_into(id, chunk);
        }
        self.train_quantizer(&sample)
    }

    /// Rough memory estimate in bytes.
    pub fn estimate_memory_bytes(&self) -> usize {
        let ids: usize = self.ids.iter().map(|s| s.len() + 24).sum();
        let id_map = self.id_map.len() * (24 + 4 + 8);
        let graph: usize = self
            .neighbors
            .iter()
            .chain(&self.reverse)
            .map(|layers| 24 + layers.iter().map(|l| 24 + l.len() * 4).sum::<usize>())
            .sum();
        let meta: usize = self
            .metadata
            .iter()
            .flatten()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| k.len() + 48 + v.heap_bytes())
                    .sum::<usize>()
            })
            .sum();
        ids + id_map
            + self.raw_vectors.len() * 4
            + self.codes.len()
            + graph
            + meta
            + self.layers.len()
            + self.states.len()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            node_count: self.len(),
            deleted_count: self.deleted_count(),
            layer_count: if self.entry_point.is_some() {
                self.max_layer + 1
            } else {
                0
            },
            dimensions: self.dimensions,
            metric: self.metric,
            quantization: self.config.quantization,
            quantizer_trained: self.codec.is_some(),
            memory_estimate_bytes: self.estimate_memory_bytes(),
            compression_ratio: self
                .codec
                .as_ref()
                .map_or(1.0, |c| c.as_codec().compression_ratio()),
        }
    }

    /// Verifies structural invariants. A failure poisons the index.
    pub fn check_integrity(&self) -> Result<()> {
        self.ensure_healthy()?;
        self.verify_structure().map_err(|reason| self.poison(reason))
    }

    /// Structural checks shared by [`check_integrity`](Self::check_integrity) and loading.
    pub(crate) fn verify_structure(&self) -> std::result::Result<(), String> {
        let n = self.slot_count();
        if self.layers.len() != n
            || self.states.len() != n
            || self.neighbors.len() != n
            || self.metadata.len() != n
        {
            return Err(format!("node arrays disagree on length (expected {n})"));
        }
        if self.has_raw_vectors() && self.raw_vectors.len() != n * self.dimensions {
            return Err(format!(
                "raw vector arena holds {} floats, expected {}",
                self.raw_vectors.len(),
                n * self.dimensions
            ));
        }
        if let Some(ref codec) = self.codec {
            codec
                .check_dimensions(self.dimensions)
                .map_err(|e| e.to_string())?;
            if self.codes.len() != n * codec.as_codec().code_size() {
                return Err(format!(
                    "code arena holds {} bytes, expected {}",
                    self.codes.len(),
                    n * codec.as_codec().code_size()
                ));
            }
        }
        for (id, &node) in &self.id_map {
            if node as usize >= n || self.ids[node as usize] != *id || !self.is_live(node) {
                return Err(format!("id map entry {id} -> {node} is stale"));
            }
        }
        let live = self.states.iter().filter(|&&s| s == NodeState::Live).count();
        if live != self.id_map.len() {
            return Err(format!(
                "{live} live nodes but {} mapped ids",
                self.id_map.len()
            ));
        }
        for node in 0..n {
            let removed = self.states[node] == NodeState::Removed;
            let layers = &self.neighbors[node];
            if !removed && layers.len() != self.layers[node] as usize + 1 {
                return Err(format!("node {node} has {} neighbor layers", layers.len()));
            }
            for (layer, list) in layers.iter().enumerate() {
                if removed && !list.is_empty() {
                    return Err(format!("removed node {node} still has edges"));
                }
                if list.len() > self.config.max_links(layer) {
                    return Err(format!("node {node} exceeds link capacity at layer {layer}"));
                }
                for &nb in list {
                    if nb as usize >= n {
                        return Err(format!("node {node} links to missing node {nb}"));
                    }
                    if self.states[nb as usize] == NodeState::Removed {
                        return Err(format!("node {node} links to removed node {nb}"));
                    }
                    if (self.layers[nb as usize] as usize) < layer {
                        return Err(format!("node {node} links to {nb} above its top layer"));
                    }
                }
            }
        }
        let forward: usize = self.neighbors.iter().flatten().map(Vec::len).sum();
        let backward: usize = self.reverse.iter().flatten().map(Vec::len).sum();
        if self.reverse.len() != n || forward != backward {
            return Err(format!(
                "reverse index holds {backward} edges, graph holds {forward}"
            ));
        }
        match self.entry_point {
            Some(ep) if ep as usize >= n || self.is_removed(ep) => {
                Err(format!("entry point {ep} is not a valid node"))
            }
            Some(ep) if self.layers[ep as usize] as usize != self.max_layer => {
                Err(format!("entry point {ep} is not on the top layer"))
            }
            None if self.states.iter().any(|&s| s != NodeState::Removed) => {
                Err("graph has nodes but no entry point".into())
            }
            _ => Ok(()),
        }
    }

    /// Whether every live node is reachable from the entry point at layer 0.
    pub fn is_connected(&self) -> bool {
        let Some(ep) = self.entry_point else {
            return self.is_empty();
        };
        let mut seen = vec![false; self.slot_count()];
        let mut queue = VecDeque::from([ep]);
        seen[ep as usize] = true;
        while let Some(node) = queue.pop_front() {
            for &nb in self.neighbors[node as usize].first().into_iter().flatten() {
                if !seen[nb as usize] {
                    seen[nb as usize] = true;
                    queue.push_back(nb);
                }
            }
        }
        (0..self.slot_count()).all(|i| seen[i] || self.states[i] != NodeState::Live)
    }
}
