//! Durable constraint log backed by sled.
//!
//! ## Layout
//!
//! ```text
//! constraint:events   stream_id 0x00 sequence(u64 BE)  ->  LogRecord (rkyv)
//! constraint:heads    stream_id                        ->  last sequence (u64 BE)
//! ```
//!
//! Big-endian sequences keep a stream's events in order under a prefix scan.
//! Appends run in a transaction over both trees so that the head check and
//! the write are atomic.

use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use tracing::debug;

use super::{check_head, ConstraintLog, LogConfig, LogRecord, PendingAppend};
use crate::error::{Error, Result};
use crate::key::StreamId;

/// Tree name for constraint events.
pub const EVENTS_TREE: &str = "constraint:events";

/// Tree name for stream heads (last sequence per stream).
pub const HEADS_TREE: &str = "constraint:heads";

/// Constraint log persisted in sled.
pub struct SledLog {
    db: Db,
    events: Tree,
    heads: Tree,
}

/// An append encoded and ready for the transaction.
struct EncodedAppend {
    stream: StreamId,
    sequence: u64,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl SledLog {
    /// Open or create a log with the given configuration.
    pub fn open(config: LogConfig) -> Result<Self> {
        let db = config.to_sled_config().open()?;
        Self::from_db(db)
    }

    /// Use the constraint trees of an already opened database.
    pub fn from_db(db: Db) -> Result<Self> {
        let events = db.open_tree(EVENTS_TREE)?;
        let heads = db.open_tree(HEADS_TREE)?;
        Ok(Self { db, events, heads })
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// All records of a stream, oldest first.
    pub fn history(&self, stream: &StreamId) -> Result<Vec<LogRecord>> {
        let prefix = stream_prefix(stream);
        self.events
            .scan_prefix(&prefix)
            .map(|result| {
                let (_, value) = result?;
                LogRecord::from_bytes(&value)
            })
            .collect()
    }

    /// Number of streams that hold at least one record.
    pub fn stream_count(&self) -> usize {
        self.heads.len()
    }

    /// Flush the log to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn read_head(
        tree: &TransactionalTree,
        stream: &StreamId,
    ) -> std::result::Result<Option<u64>, ConflictableTransactionError<Error>> {
        match tree.get(stream.as_bytes())? {
            Some(bytes) => decode_sequence(&bytes)
                .map(Some)
                .map_err(ConflictableTransactionError::Abort),
            None => Ok(None),
        }
    }
}

impl ConstraintLog for SledLog {
    fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>> {
        match self.heads.get(stream.as_bytes())? {
            Some(bytes) => decode_sequence(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn read_event(&self, stream: &StreamId, sequence: u64) -> Result<Option<LogRecord>> {
        match self.events.get(event_key(stream, sequence))? {
            Some(bytes) => LogRecord::from_bytes(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn append_batch(&self, appends: Vec<PendingAppend>) -> Result<()> {
        if appends.is_empty() {
            return Ok(());
        }

        let encoded = appends
            .into_iter()
            .map(|PendingAppend { stream, sequence, mut record }| {
                record.sequence = sequence;
                Ok(EncodedAppend {
                    key: event_key(&stream, sequence),
                    value: record.to_bytes()?,
                    stream,
                    sequence,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let result: std::result::Result<(), TransactionError<Error>> =
            (&self.events, &self.heads).transaction(|(events_tx, heads_tx)| {
                for append in &encoded {
                    let head = Self::read_head(heads_tx, &append.stream)?;
                    check_head(&append.stream, append.sequence, head)
                        .map_err(ConflictableTransactionError::Abort)?;

                    events_tx.insert(append.key.as_slice(), append.value.as_slice())?;
                    heads_tx.insert(
                        append.stream.as_bytes(),
                        &append.sequence.to_be_bytes()[..],
                    )?;
                }
                Ok(())
            });

        match result {
            Ok(()) => {
                debug!(appends = encoded.len(), "appended constraint records");
                Ok(())
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }
}

/// Prefix shared by every event key of a stream.
fn stream_prefix(stream: &StreamId) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(stream.as_bytes().len() + 1);
    prefix.extend_from_slice(stream.as_bytes());
    prefix.push(0);
    prefix
}

/// Build the event key: `stream_id 0x00 sequence(BE)`.
fn event_key(stream: &StreamId, sequence: u64) -> Vec<u8> {
    let mut key = stream_prefix(stream);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn decode_sequence(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("invalid sequence length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}
