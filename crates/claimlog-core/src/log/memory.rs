//! In-memory constraint log.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{check_head, ConstraintLog, LogRecord, PendingAppend};
use crate::error::Result;
use crate::key::StreamId;

/// Constraint log held entirely in memory.
///
/// Suitable for tests and for embedders that rebuild claim state elsewhere.
/// A single lock guards all streams, so batches are atomic.
#[derive(Debug, Default)]
pub struct MemoryLog {
    streams: RwLock<HashMap<StreamId, Vec<LogRecord>>>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of a stream, oldest first.
    pub fn history(&self, stream: &StreamId) -> Vec<LogRecord> {
        self.streams
            .read()
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of records in a stream.
    pub fn stream_len(&self, stream: &StreamId) -> usize {
        self.streams.read().get(stream).map_or(0, Vec::len)
    }

    /// Number of streams that hold at least one record.
    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Total number of records across all streams.
    pub fn total_records(&self) -> usize {
        self.streams.read().values().map(Vec::len).sum()
    }
}

impl ConstraintLog for MemoryLog {
    fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>> {
        Ok(self
            .streams
            .read()
            .get(stream)
            .and_then(|records| records.last())
            .map(|record| record.sequence))
    }

    fn read_event(&self, stream: &StreamId, sequence: u64) -> Result<Option<LogRecord>> {
        Ok(self
            .streams
            .read()
            .get(stream)
            .and_then(|records| records.get(sequence as usize))
            .cloned())
    }

    fn append_batch(&self, appends: Vec<PendingAppend>) -> Result<()> {
        let mut streams = self.streams.write();

        // Validate the whole batch before touching any stream
        let mut heads: HashMap<&StreamId, Option<u64>> = HashMap::new();
        for append in &appends {
            let head = heads.entry(&append.stream).or_insert_with(|| {
                streams
                    .get(&append.stream)
                    .and_then(|records| records.last())
                    .map(|record| record.sequence)
            });
            check_head(&append.stream, append.sequence, *head)?;
            *head = Some(append.sequence);
        }
        drop(heads);

        for PendingAppend {
            stream,
            sequence,
            mut record,
        } in appends
        {
            record.sequence = sequence;
            streams.entry(stream).or_default().push(record);
        }

        Ok(())
    }
}
