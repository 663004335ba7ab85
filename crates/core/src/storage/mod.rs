//! Storage layer: shared index handles, the named registry, and snapshots.
//!
//! Indexes live in memory behind [`SharedIndex`] handles grouped by an
//! [`IndexRegistry`]. Durability is a checksummed bincode snapshot written
//! atomically (temp file + rename).

/// Shared index handles and the named registry.
pub mod collection;
/// Snapshot save/load with header, version and CRC32 footer.
pub mod persistence;

pub use collection::{IndexRegistry, SharedIndex};
pub use persistence::{load, load_from_path, save, save_to_path};
