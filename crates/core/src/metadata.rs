//! Metadata attached to indexed vectors.
//!
//! `MetadataValue` supports boolean, integer, float, and string values for use
//! in filtered search queries. Values are copied into the index on insert.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key-value metadata owned by a single index node.
pub type Metadata = HashMap<String, MetadataValue>;

/// A typed metadata value attached to a vector.
///
/// Serialized untagged so that JSON documents read naturally
/// (`{"category": "A", "score": 0.5}`); bincode snapshots go through
/// [`StoredValue`](crate::storage::persistence) instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean value (`true` / `false`).
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

impl MetadataValue {
    /// Numeric view used by range comparisons. Strings and booleans have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Integer(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Equality with integer/float cross-comparison (`Integer(10) == Float(10.0)`).
    pub fn loose_eq(&self, other: &MetadataValue) -> bool {
        match (self, other) {
            (MetadataValue::Boolean(a), MetadataValue::Boolean(b)) => a == b,
            (MetadataValue::String(a), MetadataValue::String(b)) => a == b,
            (MetadataValue::Integer(a), MetadataValue::Integer(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
                _ => false,
            },
        }
    }

    /// Rough heap footprint, used by memory estimates.
    pub(crate) fn heap_bytes(&self) -> usize {
        match self {
            MetadataValue::String(s) => s.len(),
            _ => 0,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Boolean(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

/// Builds a [`Metadata`] map from `(key, value)` pairs.
pub fn metadata_from<K, V, I>(pairs: I) -> Metadata
where
    K: Into<String>,
    V: Into<MetadataValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
