//! Content-addressed report serialization.
//!
//! A report splits into a compact header (the report with its unit list
//! emptied) and one blob per unit. Unit blobs are keyed by the BLAKE3 hash of
//! their raw encoding, so identical units share a single stored copy across
//! commits. The encoding is deterministic: prost emits fields in tag order
//! and the schema has no maps, so logically equal units always produce
//! byte-identical blobs.

use prost::Message;
use thiserror::Error;

use super::{Report, ReportUnit};

/// 256-bit content address of an encoded unit.
pub type UnitKey = [u8; 32];

/// First four bytes of every zstd frame.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// zstd "fastest" level; unit blobs are written once and read often, so
/// compression speed wins over ratio.
const ZSTD_LEVEL: i32 = 1;

#[derive(Debug, Error)]
pub enum SerializeError {
    /// A decoded unit's hash does not match its stored key. The stored blob
    /// is corrupt.
    #[error("unit key mismatch at index {index}")]
    KeyMismatch { index: usize },
    #[error("failed to decode report data")]
    Decode(#[from] prost::DecodeError),
    #[error("failed to decompress unit data")]
    Decompress(#[from] std::io::Error),
}

/// A report ready for storage: header blob plus ordered unit blobs.
#[derive(Debug, Clone)]
pub struct SerializedReport {
    /// The report with `units` emptied, binary-encoded.
    pub data: Vec<u8>,
    /// One entry per unit, in the report's original order.
    pub units: Vec<SerializedUnit>,
}

#[derive(Debug, Clone)]
pub struct SerializedUnit {
    pub key: UnitKey,
    /// zstd-compressed unit encoding.
    pub data: Vec<u8>,
}

impl Report {
    /// Split into a header blob and per-unit blobs, hashing and compressing
    /// each unit.
    pub fn serialize(&self) -> std::io::Result<SerializedReport> {
        let sparse = Report { measures: self.measures, units: vec![] };
        let mut units = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            let encoded = unit.encode_to_vec();
            let key: UnitKey = blake3::hash(&encoded).into();
            let data = zstd::stream::encode_all(encoded.as_slice(), ZSTD_LEVEL)?;
            units.push(SerializedUnit { key, data });
        }
        Ok(SerializedReport { data: sparse.encode_to_vec(), units })
    }
}

impl SerializedReport {
    /// Reassemble the report, validating every unit against its key.
    pub fn deserialize(&self) -> Result<Report, SerializeError> {
        let mut report = Report::decode(self.data.as_slice())?;
        report.units.reserve(self.units.len());
        for (index, unit) in self.units.iter().enumerate() {
            let bytes = maybe_decompress(&unit.data)?;
            let hash: UnitKey = blake3::hash(&bytes).into();
            if hash != unit.key {
                return Err(SerializeError::KeyMismatch { index });
            }
            report.units.push(ReportUnit::decode(bytes.as_ref())?);
        }
        Ok(report)
    }
}

/// Decompress a stored blob, passing through blobs that predate compression.
fn maybe_decompress(data: &[u8]) -> std::io::Result<std::borrow::Cow<'_, [u8]>> {
    if data.len() >= 4 && data[..4] == ZSTD_MAGIC {
        Ok(std::borrow::Cow::Owned(zstd::stream::decode_all(data)?))
    } else {
        Ok(std::borrow::Cow::Borrowed(data))
    }
}
