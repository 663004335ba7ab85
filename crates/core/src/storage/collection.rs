//! Shared index handles and the named index registry.
//!
//! A [`SharedIndex`] wraps an [`HnswIndex`] in `Arc<RwLock<_>>` so that many
//! readers search concurrently while a single writer mutates. It also runs the
//! [`InterceptorChain`] around inserts and searches.
//! [`IndexRegistry`] manages named handles.

use crate::cancel::CancellationToken;
use crate::error::{IndexError, Result};
use crate::hnsw::{DeleteMode, DistanceMetric, HnswIndex, IndexConfig};
use crate::metadata::Metadata;
use crate::middleware::{Interceptor, InterceptorChain};
use crate::search::types::{IndexStats, InsertRequest, SearchOptions, SearchRequest, SearchResult};
use crate::storage::persistence;
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

/// A thread-safe handle to one index.
///
/// Cloning a `SharedIndex` produces a new handle to the same index and the
/// same interceptor chain.
#[derive(Debug, Clone)]
pub struct SharedIndex {
    index: Arc<RwLock<HnswIndex>>,
    interceptors: Arc<InterceptorChain>,
}

impl SharedIndex {
    pub fn new(index: HnswIndex) -> Self {
        Self {
            index: Arc::new(RwLock::new(index)),
            interceptors: Arc::new(InterceptorChain::new()),
        }
    }

    /// Appends an interceptor. Handles cloned before this call keep the old chain.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        Arc::make_mut(&mut self.interceptors).push(interceptor);
        self
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    /// Inserts through the interceptor chain. Returns `false` when an
    /// interceptor skipped the insert.
    pub fn insert(
        &self,
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<bool> {
        let mut request = InsertRequest::new(id, vector, metadata);
        if self.interceptors.before_insert(&mut request).is_break() {
            tracing::debug!(id = %request.id, "insert skipped by interceptor");
            return Ok(false);
        }
        self.index
            .write()
            .insert(request.id, &request.vector, request.metadata)?;
        Ok(true)
    }

    /// Inserts or replaces through the interceptor chain. Returns `None` when
    /// skipped, otherwise whether an existing node was replaced.
    pub fn upsert(
        &self,
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<Option<bool>> {
        let mut request = InsertRequest::new(id, vector, metadata);
        if self.interceptors.before_insert(&mut request).is_break() {
            return Ok(None);
        }
        let replaced = self
            .index
            .write()
            .upsert(request.id, &request.vector, request.metadata)?;
        Ok(Some(replaced))
    }

    /// Inserts records one at a time, releasing the write lock between them
    /// so searches are not starved. Skipped records do not count as completed.
    pub fn insert_batch<I>(&self, items: I, token: &CancellationToken) -> Result<usize>
    where
        I: IntoIterator<Item = InsertRequest>,
    {
        let mut completed = 0;
        for mut request in items {
            token.check(completed)?;
            if self.interceptors.before_insert(&mut request).is_break() {
                continue;
            }
            self.index
                .write()
                .insert(request.id, &request.vector, request.metadata)?;
            completed += 1;
        }
        Ok(completed)
    }

    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let mut request = SearchRequest {
            query: query.to_vec(),
            k,
            options: options.clone(),
        };
        if let ControlFlow::Break(results) = self.interceptors.before_search(&mut request) {
            return Ok(results);
        }
        let mut results = self
            .index
            .read()
            .search(&request.query, request.k, &request.options)?;
        self.interceptors.after_search(&request, &mut results);
        Ok(results)
    }

    pub fn delete(&self, id: &str, mode: DeleteMode) -> Result<bool> {
        self.index.write().delete(id, mode)
    }

    /// Rebuilds the index without deleted slots and swaps it in.
    ///
    /// Holds an upgradable read lock while rebuilding: searches continue, other
    /// writers wait until the swap.
    pub fn compact(&self, token: &CancellationToken) -> Result<()> {
        let guard = self.index.upgradable_read();
        let compacted = guard.compact(token)?;
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = compacted;
        Ok(())
    }

    pub fn train_quantizer(&self, sample: &[f32]) -> Result<()> {
        self.index.write().train_quantizer(sample)
    }

    pub fn stats(&self) -> IndexStats {
        self.index.read().stats()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn estimate_memory_bytes(&self) -> usize {
        self.index.read().estimate_memory_bytes()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HnswIndex> {
        self.index.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HnswIndex> {
        self.index.write()
    }

    pub fn save(&self) -> Result<Vec<u8>> {
        persistence::save(&self.index.read())
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        persistence::save_to_path(&self.index.read(), path)
    }

    pub fn load(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(persistence::load(bytes)?))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(persistence::load_from_path(path)?))
    }
}

impl From<HnswIndex> for SharedIndex {
    fn from(index: HnswIndex) -> Self {
        Self::new(index)
    }
}

/// Named index handles.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    indexes: Arc<RwLock<HashMap<String, SharedIndex>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty index under `name`. Fails if the name is taken or
    /// the configuration is invalid.
    pub fn create(
        &self,
        name: impl Into<String>,
        dimensions: usize,
        metric: DistanceMetric,
        config: IndexConfig,
    ) -> Result<SharedIndex> {
        let name = name.into();
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&name) {
            return Err(IndexError::InvalidConfig(format!(
                "index '{name}' already exists"
            )));
        }
        let handle = SharedIndex::new(HnswIndex::new(dimensions, metric, config)?);
        indexes.insert(name.clone(), handle.clone());
        tracing::info!(%name, dimensions, %metric, "created index");
        Ok(handle)
    }

    /// Registers an existing handle, e.g. one loaded from disk.
    pub fn register(&self, name: impl Into<String>, handle: SharedIndex) -> Result<()> {
        let name = name.into();
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&name) {
            return Err(IndexError::InvalidConfig(format!(
                "index '{name}' already exists"
            )));
        }
        indexes.insert(name, handle);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedIndex> {
        self.indexes.read().get(name).cloned()
    }

    /// Removes a handle. Returns `true` if it existed. Clones held elsewhere
    /// stay usable.
    pub fn remove(&self, name: &str) -> bool {
        self.indexes.write().remove(name).is_some()
    }

    /// Index names in ascending order.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn total_memory_bytes(&self) -> usize {
        self.indexes
            .read()
            .values()
            .map(|h| h.estimate_memory_bytes())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_types::FilterExpr;
    use crate::metadata::{metadata_from, MetadataValue};
    use std::thread;

    fn handle() -> SharedIndex {
        let index = HnswIndex::new(4, DistanceMetric::Euclidean, IndexConfig::default()).unwrap();
        SharedIndex::new(index)
    }

    fn unit(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 4];
        v[i % 4] = 1.0 + (i / 4) as f32;
        v
    }

    struct RejectPrefix(&'static str);

    impl Interceptor for RejectPrefix {
        fn before_insert(&self, request: &mut InsertRequest) -> ControlFlow<()> {
            if request.id.starts_with(self.0) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    struct Cached;

    impl Interceptor for Cached {
        fn before_search(&self, request: &mut SearchRequest) -> ControlFlow<Vec<SearchResult>> {
            if request.k == 7 {
                ControlFlow::Break(vec![SearchResult {
                    id: "cached".into(),
                    score: 0.0,
                    metadata: None,
                }])
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    struct TagSource;

    impl Interceptor for TagSource {
        fn before_insert(&self, request: &mut InsertRequest) -> ControlFlow<()> {
            request
                .metadata
                .get_or_insert_with(Metadata::new)
                .insert("source".into(), MetadataValue::from("interceptor"));
            ControlFlow::Continue(())
        }

        fn after_search(&self, _request: &SearchRequest, results: &mut Vec<SearchResult>) {
            results.truncate(1);
        }
    }

    #[test]
    fn test_insert_and_search() {
        let h = handle();
        for i in 0..8 {
            assert!(h.insert(format!("v{i}"), unit(i), None).unwrap());
        }
        assert_eq!(h.len(), 8);
        let hits = h.search(&unit(5), 1, &SearchOptions::default()).unwrap();
        assert_eq!(hits[0].id, "v5");
    }

    #[test]
    fn test_interceptor_skips_insert() {
        let h = handle().with_interceptor(Arc::new(RejectPrefix("tmp-")));
        assert!(!h.insert("tmp-1", unit(0), None).unwrap());
        assert!(h.insert("keep", unit(1), None).unwrap());
        assert_eq!(h.len(), 1);
        assert_eq!(h.upsert("tmp-2", unit(2), None).unwrap(), None);
        assert_eq!(h.upsert("keep", unit(2), None).unwrap(), Some(true));
    }

    #[test]
    fn test_interceptor_short_circuits_search() {
        let h = handle().with_interceptor(Arc::new(Cached));
        h.insert("a", unit(0), None).unwrap();
        let hits = h.search(&unit(0), 7, &SearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "cached");
        let hits = h.search(&unit(0), 1, &SearchOptions::default()).unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn test_interceptor_rewrites_request_and_results() {
        let h = handle().with_interceptor(Arc::new(TagSource));
        for i in 0..4 {
            h.insert(format!("v{i}"), unit(i), None).unwrap();
        }
        let opts = SearchOptions::default().with_filter(FilterExpr::eq("source", "interceptor"));
        let hits = h.search(&unit(0), 4, &opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "v0");
    }

    #[test]
    fn test_batch_counts_only_inserted() {
        let h = handle().with_interceptor(Arc::new(RejectPrefix("skip")));
        let items = vec![
            InsertRequest::new("a", unit(0), None),
            InsertRequest::new("skip-b", unit(1), None),
            InsertRequest::new("c", unit(2), Some(metadata_from([("k", 1i64)]))),
        ];
        let n = h.insert_batch(items, &CancellationToken::new()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_compact_swaps_in_place() {
        let h = handle();
        for i in 0..12 {
            h.insert(format!("v{i}"), unit(i), None).unwrap();
        }
        for i in 0..4 {
            assert!(h.delete(&format!("v{i}"), DeleteMode::Soft).unwrap());
        }
        assert_eq!(h.stats().deleted_count, 4);
        h.compact(&CancellationToken::new()).unwrap();
        let stats = h.stats();
        assert_eq!(stats.deleted_count, 0);
        assert_eq!(stats.node_count, 8);
        assert_eq!(h.read().slot_count(), 8);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let h = handle();
        for i in 0..16 {
            h.insert(format!("v{i}"), unit(i), None).unwrap();
        }
        let writer = {
            let h = h.clone();
            thread::spawn(move || {
                for i in 16..64 {
                    h.insert(format!("v{i}"), unit(i), None).unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let h = h.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let hits = h.search(&unit(i), 3, &SearchOptions::default()).unwrap();
                        assert!(!hits.is_empty());
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(h.len(), 64);
        assert!(h.read().check_integrity().is_ok());
    }

    #[test]
    fn test_save_and_load_handle() {
        let h = handle();
        for i in 0..8 {
            h.insert(format!("v{i}"), unit(i), None).unwrap();
        }
        let bytes = h.save().unwrap();
        let loaded = SharedIndex::load(&bytes).unwrap();
        assert_eq!(loaded.len(), 8);
        let a = h.search(&unit(3), 3, &SearchOptions::default()).unwrap();
        let b = loaded.search(&unit(3), 3, &SearchOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    // ── Registry ──────────────────────────────────────────────────────

    #[test]
    fn test_registry_create_and_get() {
        let reg = IndexRegistry::new();
        reg.create("a", 4, DistanceMetric::Cosine, IndexConfig::default())
            .unwrap();
        assert!(reg.get("a").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn test_registry_duplicate_name() {
        let reg = IndexRegistry::new();
        reg.create("dup", 4, DistanceMetric::Cosine, IndexConfig::default())
            .unwrap();
        let err = reg
            .create("dup", 4, DistanceMetric::Cosine, IndexConfig::default())
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(_)));
        assert!(reg.register("dup", handle()).is_err());
    }

    #[test]
    fn test_registry_invalid_config_not_registered() {
        let reg = IndexRegistry::new();
        assert!(reg
            .create("bad", 0, DistanceMetric::Cosine, IndexConfig::default())
            .is_err());
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_registry_remove_and_list() {
        let reg = IndexRegistry::new();
        reg.register("b", handle()).unwrap();
        reg.register("a", handle()).unwrap();
        assert_eq!(reg.list(), vec!["a".to_string(), "b".to_string()]);
        let kept = reg.get("a").unwrap();
        assert!(reg.remove("a"));
        assert!(!reg.remove("a"));
        kept.insert("still", unit(0), None).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_registry_total_memory_bytes() {
        let reg = IndexRegistry::new();
        let h = reg
            .create("m", 4, DistanceMetric::Cosine, IndexConfig::default())
            .unwrap();
        let empty = reg.total_memory_bytes();
        h.insert("x", vec![1.0, 0.0, 0.0, 0.0], None).unwrap();
        assert!(reg.total_memory_bytes() > empty);
    }
}
