//! Append-only constraint log.
//!
//! A constraint log is a set of independent streams. Each stream is a totally
//! ordered sequence of [`LogRecord`]s numbered from 0. Appends are optimistic:
//! an append at sequence `n` is only accepted when the stream's last sequence
//! is `n - 1` (or the stream is empty and `n == 0`).
//!
//! Two implementations are provided:
//! - [`MemoryLog`] keeps streams in memory.
//! - [`SledLog`] persists streams in a sled database.

mod config;
mod memory;
mod record;
mod sled_log;

use std::sync::Arc;

pub use config::LogConfig;
pub use memory::MemoryLog;
pub use record::{current_timestamp, LogRecord};
pub use sled_log::{SledLog, EVENTS_TREE, HEADS_TREE};

use crate::error::{Error, Result};
use crate::key::StreamId;

/// An append waiting to be written to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAppend {
    /// Target stream.
    pub stream: StreamId,
    /// Sequence the record must land at.
    pub sequence: u64,
    /// The record to append.
    pub record: LogRecord,
}

impl PendingAppend {
    /// Create a pending append.
    pub fn new(stream: StreamId, sequence: u64, record: LogRecord) -> Self {
        Self {
            stream,
            sequence,
            record,
        }
    }
}

/// Storage boundary for constraint streams.
pub trait ConstraintLog: Send + Sync {
    /// Last sequence number written to `stream`, or `None` for a fresh stream.
    fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>>;

    /// Read the record at `sequence` in `stream`.
    fn read_event(&self, stream: &StreamId, sequence: u64) -> Result<Option<LogRecord>>;

    /// Append all records atomically.
    ///
    /// Every append is checked against the stream head (including earlier
    /// appends of the same batch). If any check fails nothing is written and
    /// [`Error::ConcurrencyConflict`] is returned.
    fn append_batch(&self, appends: Vec<PendingAppend>) -> Result<()>;

    /// Append a single record at `sequence`.
    fn append(&self, stream: &StreamId, sequence: u64, record: LogRecord) -> Result<()> {
        self.append_batch(vec![PendingAppend::new(stream.clone(), sequence, record)])
    }
}

impl<T: ConstraintLog + ?Sized> ConstraintLog for Arc<T> {
    fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>> {
        (**self).last_sequence(stream)
    }

    fn read_event(&self, stream: &StreamId, sequence: u64) -> Result<Option<LogRecord>> {
        (**self).read_event(stream, sequence)
    }

    fn append_batch(&self, appends: Vec<PendingAppend>) -> Result<()> {
        (**self).append_batch(appends)
    }
}

impl<T: ConstraintLog + ?Sized> ConstraintLog for &T {
    fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>> {
        (**self).last_sequence(stream)
    }

    fn read_event(&self, stream: &StreamId, sequence: u64) -> Result<Option<LogRecord>> {
        (**self).read_event(stream, sequence)
    }

    fn append_batch(&self, appends: Vec<PendingAppend>) -> Result<()> {
        (**self).append_batch(appends)
    }
}

/// The sequence the next append to a stream must use.
pub fn next_sequence(last: Option<u64>) -> u64 {
    last.map_or(0, |seq| seq + 1)
}

/// Check an append against the current head of its stream.
pub(crate) fn check_head(stream: &StreamId, sequence: u64, head: Option<u64>) -> Result<()> {
    if sequence == next_sequence(head) {
        Ok(())
    } else {
        Err(Error::ConcurrencyConflict {
            stream: stream.clone(),
            expected: sequence,
            actual: head,
        })
    }
}
