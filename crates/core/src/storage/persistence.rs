//! Binary persistence for indexes using bincode serialization.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! [magic "QANN"][u16 version][u16 flags][u64 payload length][bincode payload][u32 CRC32]
//! ```
//!
//! The version is checked before the payload is touched, so streams from a
//! newer format fail with `UnsupportedFormatVersion` instead of a decode error.
//! File writes use atomic temp-file + rename to prevent corruption on crash.

use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::graph::{HnswIndex, IndexConfig, NodeState};
use crate::metadata::{Metadata, MetadataValue};
use crate::quantization::Codec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tagged twin of [`MetadataValue`]; bincode cannot read untagged enums.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoredValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<&MetadataValue> for StoredValue {
    fn from(v: &MetadataValue) -> Self {
        match v {
            MetadataValue::Boolean(b) => StoredValue::Boolean(*b),
            MetadataValue::Integer(i) => StoredValue::Integer(*i),
            MetadataValue::Float(f) => StoredValue::Float(*f),
            MetadataValue::String(s) => StoredValue::String(s.clone()),
        }
    }
}

impl From<StoredValue> for MetadataValue {
    fn from(v: StoredValue) -> Self {
        match v {
            StoredValue::Boolean(b) => MetadataValue::Boolean(b),
            StoredValue::Integer(i) => MetadataValue::Integer(i),
            StoredValue::Float(f) => MetadataValue::Float(f),
            StoredValue::String(s) => MetadataValue::String(s),
        }
    }
}

type StoredMetadata = Vec<(String, StoredValue)>;

/// Sorted by key so identical indexes serialize to identical bytes.
fn to_stored(metadata: &Metadata) -> StoredMetadata {
    let mut pairs: StoredMetadata = metadata
        .iter()
        .map(|(k, v)| (k.clone(), StoredValue::from(v)))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

/// Borrowed view written by [`save`]. Field order must match [`Snapshot`].
#[derive(Serialize)]
struct SnapshotRef<'a> {
    config: &'a IndexConfig,
    metric: DistanceMetric,
    dimensions: u64,
    ids: &'a [String],
    states: &'a [NodeState],
    raw_vectors: &'a [f32],
    codes: &'a [u8],
    codec: Option<&'a Codec>,
    metadata: Vec<Option<StoredMetadata>>,
    neighbors: &'a [Vec<Vec<u32>>],
    layers: &'a [u8],
    entry_point: Option<u32>,
    max_layer: u64,
}

#[derive(Deserialize)]
struct Snapshot {
    config: IndexConfig,
    metric: DistanceMetric,
    dimensions: u64,
    ids: Vec<String>,
    states: Vec<NodeState>,
    raw_vectors: Vec<f32>,
    codes: Vec<u8>,
    codec: Option<Codec>,
    metadata: Vec<Option<StoredMetadata>>,
    neighbors: Vec<Vec<Vec<u32>>>,
    layers: Vec<u8>,
    entry_point: Option<u32>,
    max_layer: u64,
}

/// Serializes the full index state.
pub fn save(index: &HnswIndex) -> Result<Vec<u8>> {
    index.ensure_healthy()?;
    let snapshot = SnapshotRef {
        config: &index.config,
        metric: index.metric,
        dimensions: index.dimensions as u64,
        ids: &index.ids,
        states: &index.states,
        raw_vectors: &index.raw_vectors,
        codes: &index.codes,
        codec: index.codec.as_ref(),
        metadata: index
            .metadata
            .iter()
            .map(|m| m.as_ref().map(to_stored))
            .collect(),
        neighbors: &index.neighbors,
        layers: &index.layers,
        entry_point: index.entry_point,
        max_layer: index.max_layer as u64,
    };
    let payload = bincode::serialize(&snapshot)?;
    let crc = crc32fast::hash(&payload);

    let mut out =
        Vec::with_capacity(config::FORMAT_HEADER_LEN + payload.len() + config::FORMAT_FOOTER_LEN);
    out.extend_from_slice(config::FORMAT_MAGIC);
    out.extend_from_slice(&config::FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc.to_le_bytes());

    tracing::info!(
        nodes = index.len(),
        bytes = out.len(),
        crc = format_args!("{crc:#010x}"),
        "saved index"
    );
    Ok(out)
}

/// Restores an index from bytes produced by [`save`].
pub fn load(bytes: &[u8]) -> Result<HnswIndex> {
    let header_len = config::FORMAT_HEADER_LEN;
    let magic_len = config::FORMAT_MAGIC.len();
    let prefix = &bytes[..bytes.len().min(magic_len)];
    if prefix != &config::FORMAT_MAGIC[..prefix.len()] {
        return Err(IndexError::InvalidFormat("bad magic bytes".into()));
    }
    if bytes.len() < header_len {
        return Err(IndexError::Truncated {
            expected: header_len,
            actual: bytes.len(),
        });
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != config::FORMAT_VERSION {
        return Err(IndexError::UnsupportedFormatVersion {
            found: version,
            supported: config::FORMAT_VERSION,
        });
    }
    let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
    if flags != 0 {
        return Err(IndexError::InvalidFormat(format!("unknown flags {flags:#06x}")));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[8..16]);
    let payload_len = usize::try_from(u64::from_le_bytes(len_bytes))
        .map_err(|_| IndexError::CorruptedData("payload length overflows usize".into()))?;
    let expected = header_len
        .checked_add(payload_len)
        .and_then(|n| n.checked_add(config::FORMAT_FOOTER_LEN))
        .ok_or_else(|| IndexError::CorruptedData("payload length overflows usize".into()))?;
    if bytes.len() < expected {
        return Err(IndexError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(IndexError::CorruptedData(format!(
            "{} trailing bytes after checksum",
            bytes.len() - expected
        )));
    }

    let payload = &bytes[header_len..header_len + payload_len];
    let footer = &bytes[header_len + payload_len..];
    let stored = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        tracing::warn!(
            stored = format_args!("{stored:#010x}"),
            computed = format_args!("{computed:#010x}"),
            "index checksum mismatch"
        );
        return Err(IndexError::ChecksumMismatch { stored, computed });
    }
    tracing::debug!(crc = format_args!("{stored:#010x}"), "index checksum verified");

    let snapshot: Snapshot = bincode::deserialize(payload)?;
    let index = from_snapshot(snapshot)?;
    tracing::info!(
        nodes = index.len(),
        deleted = index.deleted_count(),
        "loaded index"
    );
    Ok(index)
}

fn from_snapshot(s: Snapshot) -> Result<HnswIndex> {
    let dimensions = usize::try_from(s.dimensions)
        .map_err(|_| IndexError::CorruptedData("dimension overflows usize".into()))?;
    s.config
        .validate(dimensions)
        .map_err(|e| IndexError::CorruptedData(format!("stored config is invalid: {e}")))?;
    if s.ids.len() != s.states.len() {
        return Err(IndexError::CorruptedData(
            "id and state arrays disagree on length".into(),
        ));
    }
    let metadata = s
        .metadata
        .into_iter()
        .map(|m| m.map(|pairs| pairs.into_iter().map(|(k, v)| (k, v.into())).collect()))
        .collect();
    let index = HnswIndex::from_parts(
        s.config,
        s.metric,
        dimensions,
        s.ids,
        s.states,
        s.raw_vectors,
        s.codes,
        s.codec,
        metadata,
        s.neighbors,
        s.layers,
        s.entry_point,
        s.max_layer as usize,
    );
    index.verify_structure().map_err(IndexError::CorruptedData)?;
    Ok(index)
}

/// Saves to `path` atomically: write a sibling temp file, then rename over the target.
pub fn save_to_path(index: &HnswIndex, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = save(index)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    fs::write(tmp_path, &bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(tmp_path, path)?;
    tracing::debug!(path = %path.display(), "index written");
    Ok(())
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<HnswIndex> {
    load(&fs::read(path.as_ref())?)
}
