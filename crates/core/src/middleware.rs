//! Interceptors around index calls.
//!
//! An [`InterceptorChain`] is an ordered list of [`Interceptor`]s that
//! [`SharedIndex`](crate::storage::SharedIndex) runs synchronously around each
//! insert and search. Interceptors may rewrite requests, post-process results,
//! or short-circuit with `ControlFlow::Break`: a broken insert is skipped and a
//! broken search returns the supplied results without touching the index.

use crate::search::types::{InsertRequest, SearchRequest, SearchResult};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

pub trait Interceptor: Send + Sync {
    /// Name shown in debug output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn before_insert(&self, _request: &mut InsertRequest) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn before_search(&self, _request: &mut SearchRequest) -> ControlFlow<Vec<SearchResult>> {
        ControlFlow::Continue(())
    }

    fn after_search(&self, _request: &SearchRequest, _results: &mut Vec<SearchResult>) {}
}

/// Ordered interceptors. `before_*` hooks run front to back and stop at the
/// first `Break`; `after_search` runs for every interceptor.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn before_insert(&self, request: &mut InsertRequest) -> ControlFlow<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.before_insert(request))
    }

    pub fn before_search(&self, request: &mut SearchRequest) -> ControlFlow<Vec<SearchResult>> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.before_search(request))
    }

    pub fn after_search(&self, request: &SearchRequest, results: &mut Vec<SearchResult>) {
        for i in &self.interceptors {
            i.after_search(request, results);
        }
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}
