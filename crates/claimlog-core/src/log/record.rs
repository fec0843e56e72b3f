//! Record type stored in constraint streams.

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

/// One event in a constraint stream.
///
/// The payload is opaque to the log; `payload_type` tells readers how to
/// decode it.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the stream, assigned on append.
    pub sequence: u64,

    /// Aggregate type the event is filed under (e.g. `ConstraintEmail`).
    pub aggregate_type: String,

    /// Discriminator for the payload encoding.
    pub payload_type: String,

    /// Encoded event body.
    pub payload: Vec<u8>,

    /// Creation timestamp in microseconds since Unix epoch.
    pub created_at: u64,
}

impl LogRecord {
    /// Create a record with the current timestamp. The sequence is set by the log.
    pub fn new(
        aggregate_type: impl Into<String>,
        payload_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sequence: 0,
            aggregate_type: aggregate_type.into(),
            payload_type: payload_type.into(),
            payload,
            created_at: current_timestamp(),
        }
    }

    /// Serialize the record to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // Archived data must be aligned; sled values make no such promise.
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
