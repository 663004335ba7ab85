//! Cooperative cancellation for long-running bulk operations.
//!
//! Bulk insert, bulk delete, and compaction poll the token between
//! node-level steps. Work completed before cancellation is kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag. All clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled { completed })` once cancellation was requested.
    #[inline]
    pub(crate) fn check(&self, completed: usize) -> crate::error::Result<()> {
        if self.is_cancelled() {
            tracing::warn!(completed, "bulk operation cancelled");
            Err(crate::error::IndexError::Cancelled { completed })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        assert!(token.check(0).is_ok());
        token.cancel();
        assert!(other.is_cancelled());
        assert!(matches!(
            other.check(7),
            Err(crate::error::IndexError::Cancelled { completed: 7 })
        ));
    }
}
