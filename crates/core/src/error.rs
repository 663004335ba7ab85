//! Error type shared by every index operation.
//!
//! Variants fall into four families: validation errors (rejected before any
//! state is touched), capacity errors, corruption errors (fatal for the index
//! instance), and persistence errors. [`IndexError::is_validation`] and
//! [`IndexError::is_corruption`] let callers branch on the family.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid dimensions {0}: must be between 1 and {max}", max = crate::config::MAX_DIMENSION)]
    InvalidDimensions(usize),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("invalid k {0}: must be at least 1")]
    InvalidK(usize),

    #[error("invalid vector for id {id}: component {position} is not finite")]
    InvalidVector { id: String, position: usize },

    #[error("dimension {dimensions} is not divisible into {subvectors} sub-vectors")]
    InvalidSubvectorCount { dimensions: usize, subvectors: usize },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("quantizer training requires at least one vector")]
    EmptyTrainingSample,

    #[error("capacity exceeded: index holds at most {max_elements} nodes")]
    CapacityExceeded { max_elements: usize },

    #[error("index corruption: {0}")]
    IndexCorruption(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unsupported format version {found} (supported: {supported})")]
    UnsupportedFormatVersion { found: u16, supported: u16 },

    #[error("truncated stream: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("operation cancelled after {completed} items")]
    Cancelled { completed: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Returns `true` for errors raised by input validation. These never mutate state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IndexError::InvalidDimensions(_)
                | IndexError::InvalidConfig(_)
                | IndexError::DimensionMismatch { .. }
                | IndexError::DuplicateId(_)
                | IndexError::InvalidK(_)
                | IndexError::InvalidVector { .. }
                | IndexError::InvalidSubvectorCount { .. }
                | IndexError::InvalidFilter(_)
                | IndexError::EmptyTrainingSample
        )
    }

    /// Returns `true` when the in-memory index or a persisted blob is damaged.
    ///
    /// `InvalidFormat` and `UnsupportedFormatVersion` are not corruption: the
    /// bytes are simply not a stream this build can read.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            IndexError::IndexCorruption(_)
                | IndexError::Truncated { .. }
                | IndexError::ChecksumMismatch { .. }
                | IndexError::CorruptedData(_)
        )
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::CorruptedData(err.to_string())
    }
}
