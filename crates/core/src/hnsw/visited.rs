//! Generation-based visited set for graph traversal.
//!
//! Marks are `u16` generations instead of booleans: starting a new traversal
//! bumps the generation instead of zeroing the array. A full reset happens only
//! when the counter wraps.

use std::cell::RefCell;

thread_local! {
    /// Per-thread pool so concurrent searches never share or reallocate a set.
    static VISITED_POOL: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Runs `f` with this thread's pooled visited set, reset for `capacity` nodes.
pub(crate) fn with_visited<R>(capacity: usize, f: impl FnOnce(&mut VisitedSet) -> R) -> R {
    VISITED_POOL.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.reset(capacity);
        f(&mut visited)
    })
}

#[derive(Debug)]
pub struct VisitedSet {
    marks: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0u16; capacity],
            generation: 1,
        }
    }

    /// Starts a new traversal over `capacity` nodes. O(1) amortized.
    pub fn reset(&mut self, capacity: usize) {
        if capacity > self.marks.len() {
            self.marks.resize(capacity, 0);
        }
        if self.generation == u16::MAX {
            self.marks.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Marks `id`. Returns `true` if it was not yet visited in this traversal.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.marks[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.marks
            .get(id as usize)
            .is_some_and(|&g| g == self.generation)
    }
}
