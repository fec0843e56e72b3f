//! Constraint events.
//!
//! A constraint stream only ever contains two kinds of events. The last one
//! decides the current state of the value:
//! - [`ConstraintClaimed`]: the value belongs to `owner`.
//! - [`ConstraintReleased`]: the value is free.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::log::LogRecord;

/// Payload type of [`ConstraintClaimed`] records.
pub const CLAIMED_PAYLOAD_TYPE: &str = "ConstraintClaimed";

/// Payload type of [`ConstraintReleased`] records.
pub const RELEASED_PAYLOAD_TYPE: &str = "ConstraintReleased";

/// A value was claimed by an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintClaimed {
    /// Constraint name.
    pub constraint_name: String,
    /// The claimed value.
    pub key: String,
    /// Identifier of the owning entity.
    pub owner: String,
}

/// A value was released and is free to claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintReleased {
    /// Constraint name.
    pub constraint_name: String,
    /// The released value.
    pub key: String,
}

/// Event stored in a constraint stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConstraintEvent {
    /// See [`ConstraintClaimed`].
    Claimed(ConstraintClaimed),
    /// See [`ConstraintReleased`].
    Released(ConstraintReleased),
}

impl ConstraintEvent {
    /// Build a claimed event.
    pub fn claimed(
        constraint_name: impl Into<String>,
        key: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        ConstraintEvent::Claimed(ConstraintClaimed {
            constraint_name: constraint_name.into(),
            key: key.into(),
            owner: owner.into(),
        })
    }

    /// Build a released event.
    pub fn released(constraint_name: impl Into<String>, key: impl Into<String>) -> Self {
        ConstraintEvent::Released(ConstraintReleased {
            constraint_name: constraint_name.into(),
            key: key.into(),
        })
    }

    /// Constraint name carried by the event.
    pub fn constraint_name(&self) -> &str {
        match self {
            ConstraintEvent::Claimed(e) => &e.constraint_name,
            ConstraintEvent::Released(e) => &e.constraint_name,
        }
    }

    /// Constrained value carried by the event.
    pub fn key(&self) -> &str {
        match self {
            ConstraintEvent::Claimed(e) => &e.key,
            ConstraintEvent::Released(e) => &e.key,
        }
    }

    /// The owner, if this is a claim.
    pub fn owner(&self) -> Option<&str> {
        match self {
            ConstraintEvent::Claimed(e) => Some(&e.owner),
            ConstraintEvent::Released(_) => None,
        }
    }

    /// Discriminator written to [`LogRecord::payload_type`].
    pub fn payload_type(&self) -> &'static str {
        match self {
            ConstraintEvent::Claimed(_) => CLAIMED_PAYLOAD_TYPE,
            ConstraintEvent::Released(_) => RELEASED_PAYLOAD_TYPE,
        }
    }

    /// Encode into a log record filed under `aggregate_type`.
    pub fn to_record(&self, aggregate_type: impl Into<String>) -> Result<LogRecord> {
        let payload = match self {
            ConstraintEvent::Claimed(e) => serde_json::to_vec(e),
            ConstraintEvent::Released(e) => serde_json::to_vec(e),
        }
        .map_err(|e| Error::Serialization(e.to_string()))?;

        Ok(LogRecord::new(aggregate_type, self.payload_type(), payload))
    }

    /// Decode a log record.
    ///
    /// Records of any other payload type are a protocol error: guessing a
    /// state for them could hand out a value twice.
    pub fn from_record(record: &LogRecord) -> Result<Self> {
        match record.payload_type.as_str() {
            CLAIMED_PAYLOAD_TYPE => serde_json::from_slice(&record.payload)
                .map(ConstraintEvent::Claimed)
                .map_err(|e| decode_error(record, e)),
            RELEASED_PAYLOAD_TYPE => serde_json::from_slice(&record.payload)
                .map(ConstraintEvent::Released)
                .map_err(|e| decode_error(record, e)),
            other => Err(Error::Protocol(format!(
                "unknown event of type '{}' at sequence {}, cannot process unique constraints",
                other, record.sequence
            ))),
        }
    }
}

fn decode_error(record: &LogRecord, err: serde_json::Error) -> Error {
    Error::Protocol(format!(
        "malformed '{}' payload at sequence {}: {}",
        record.payload_type, record.sequence, err
    ))
}
