//! Deferred claim transactions.
//!
//! Claims and releases are evaluated when queued, but nothing is appended
//! until [`ClaimTransaction::commit`]. Dropping a transaction discards it.
//! This lets a caller veto the whole batch after the fact, for example when
//! its own unit of work fails to commit.

use std::fmt;

use tracing::{debug, instrument, warn};

use super::store::{ClaimOp, ClaimState, ClaimStore};
use crate::error::{Error, Result};
use crate::event::ConstraintEvent;
use crate::key::{StreamId, StreamKeyDeriver};
use crate::log::{ConstraintLog, PendingAppend};

/// A batch of claims and releases committed atomically.
pub struct ClaimTransaction<'s, L, K> {
    store: &'s ClaimStore<L, K>,
    /// Every requested operation, in request order (no-ops included).
    ops: Vec<ClaimOp>,
    /// Appends to perform on commit.
    appends: Vec<PendingAppend>,
}

impl<'s, L: ConstraintLog, K: StreamKeyDeriver> ClaimTransaction<'s, L, K> {
    /// Create a new transaction.
    pub(crate) fn new(store: &'s ClaimStore<L, K>) -> Self {
        Self {
            store,
            ops: Vec::new(),
            appends: Vec::new(),
        }
    }

    /// Queue a claim of `value` for `owner`.
    ///
    /// Fails right away if another owner holds the value.
    pub fn claim(&mut self, constraint_name: &str, value: &str, owner: &str) -> Result<&mut Self> {
        self.queue(ClaimOp::claim(constraint_name, value, owner))
    }

    /// Queue a release of `owner`'s claim on `value`.
    ///
    /// Fails right away if another owner holds the value.
    pub fn release(
        &mut self,
        constraint_name: &str,
        value: &str,
        owner: &str,
    ) -> Result<&mut Self> {
        self.queue(ClaimOp::release(constraint_name, value, owner))
    }

    /// Queue an operation.
    pub fn queue(&mut self, op: ClaimOp) -> Result<&mut Self> {
        let stream = self.store.stream_id(op.constraint_name(), op.value());
        let state = self.state_of(&stream, &op)?;
        if let Some(append) = self.store.plan(&op, &stream, state)? {
            self.appends.push(append);
        }
        self.ops.push(op);
        Ok(self)
    }

    /// Requested operations, in request order.
    pub fn operations(&self) -> &[ClaimOp] {
        &self.ops
    }

    /// Appends that commit will perform.
    pub fn pending_appends(&self) -> &[PendingAppend] {
        &self.appends
    }

    /// Whether committing would write nothing.
    pub fn is_empty(&self) -> bool {
        self.appends.is_empty()
    }

    /// Hand the appends to a caller that commits them together with its own
    /// records through [`ConstraintLog::append_batch`].
    pub fn into_pending_appends(self) -> Vec<PendingAppend> {
        self.appends
    }

    /// Discard the transaction without appending anything.
    pub fn abort(self) {
        debug!(ops = self.ops.len(), "claim transaction aborted");
    }

    /// Append every planned record atomically.
    ///
    /// If the log reports a concurrency conflict, all operations are
    /// re-evaluated against fresh reads and the batch is retried, up to
    /// `max_conflict_retries` times. A re-evaluation that finds another owner
    /// fails with the claim error; exhausting the retries surfaces the
    /// conflict.
    #[instrument(skip(self), fields(ops = self.ops.len()))]
    pub fn commit(self) -> Result<()> {
        let max_retries = self.store.config().max_conflict_retries;
        let mut appends = self.appends;
        let mut attempt = 0;

        loop {
            if appends.is_empty() {
                return Ok(());
            }

            let count = appends.len();
            match self.store.log().append_batch(appends) {
                Ok(()) => {
                    debug!(appends = count, attempt, "claim transaction committed");
                    return Ok(());
                }
                Err(Error::ConcurrencyConflict {
                    stream,
                    expected,
                    actual,
                }) if attempt < max_retries => {
                    warn!(
                        stream = %stream,
                        expected,
                        actual = ?actual,
                        attempt,
                        "lost append race, re-evaluating claims"
                    );
                    attempt += 1;
                    appends = Self::replan(self.store, &self.ops)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Evaluate `ops` again against fresh reads.
    fn replan(store: &'s ClaimStore<L, K>, ops: &[ClaimOp]) -> Result<Vec<PendingAppend>> {
        let mut fresh = ClaimTransaction::new(store);
        for op in ops {
            fresh.queue(op.clone())?;
        }
        Ok(fresh.appends)
    }

    /// State of a stream, taking this transaction's own pending appends into
    /// account.
    fn state_of(&self, stream: &StreamId, op: &ClaimOp) -> Result<ClaimState> {
        match self.appends.iter().rev().find(|a| &a.stream == stream) {
            Some(pending) => {
                let event = ConstraintEvent::from_record(&pending.record)?;
                ClaimState::from_stream_event(
                    stream,
                    pending.sequence,
                    event,
                    op.constraint_name(),
                    op.value(),
                )
            }
            None => self
                .store
                .read_state(stream, op.constraint_name(), op.value()),
        }
    }
}

impl<L, K> fmt::Debug for ClaimTransaction<'_, L, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimTransaction")
            .field("ops", &self.ops)
            .field("appends", &self.appends)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::config::ClaimStoreConfig;
    use crate::error::ClaimError;
    use crate::log::{LogRecord, MemoryLog};

    #[test]
    fn test_nothing_appended_before_commit() {
        let store = ClaimStore::new(MemoryLog::new());
        let mut tx = store.begin();
        tx.claim("Email", "a@b.com", "AGG-1").unwrap();
        tx.claim("Username", "alice", "AGG-1").unwrap();

        assert_eq!(tx.pending_appends().len(), 2);
        assert_eq!(store.log().total_records(), 0);

        tx.commit().unwrap();
        assert_eq!(store.log().total_records(), 2);
    }

    #[test]
    fn test_dropped_transaction_appends_nothing() {
        let store = ClaimStore::new(MemoryLog::new());
        {
            let mut tx = store.begin();
            tx.claim("Email", "a@b.com", "AGG-1").unwrap();
        }
        let mut tx = store.begin();
        tx.claim("Email", "b@b.com", "AGG-1").unwrap();
        tx.abort();

        assert_eq!(store.log().total_records(), 0);
        assert!(!store.current_claim("Email", "a@b.com").unwrap().is_claimed());
    }

    #[test]
    fn test_failed_queue_leaves_earlier_ops_uncommitted() {
        let store = ClaimStore::new(MemoryLog::new());
        store.claim("Username", "alice", "AGG-2").unwrap();

        let mut tx = store.begin();
        tx.claim("Email", "a@b.com", "AGG-1").unwrap();
        let err = tx.claim("Username", "alice", "AGG-1").unwrap_err();
        assert!(err.is_claim_conflict());
        drop(tx);

        assert!(!store.current_claim("Email", "a@b.com").unwrap().is_claimed());
    }

    #[test]
    fn test_release_then_claim_same_value_in_one_transaction() {
        let store = ClaimStore::new(MemoryLog::new());
        store.claim("Email", "a@b.com", "AGG-1").unwrap();

        let mut tx = store.begin();
        tx.release("Email", "a@b.com", "AGG-1").unwrap();
        tx.claim("Email", "a@b.com", "AGG-2").unwrap();
        let sequences: Vec<u64> = tx.pending_appends().iter().map(|a| a.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        tx.commit().unwrap();

        assert_eq!(
            store.current_claim("Email", "a@b.com").unwrap().owner.as_deref(),
            Some("AGG-2")
        );
    }

    #[test]
    fn test_noops_are_recorded_but_not_appended() {
        let store = ClaimStore::new(MemoryLog::new());
        let mut tx = store.begin();
        tx.release("Email", "a@b.com", "AGG-1").unwrap();

        assert_eq!(tx.operations().len(), 1);
        assert!(tx.is_empty());
    }

    /// Log that lets another writer slip in one record right before the first
    /// batch append, simulating a concurrent claimant.
    struct RacingLog {
        inner: MemoryLog,
        intruder: Option<(StreamId, LogRecord)>,
        raced: AtomicBool,
    }

    impl ConstraintLog for RacingLog {
        fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>> {
            self.inner.last_sequence(stream)
        }

        fn read_event(&self, stream: &StreamId, sequence: u64) -> Result<Option<LogRecord>> {
            self.inner.read_event(stream, sequence)
        }

        fn append_batch(&self, appends: Vec<PendingAppend>) -> Result<()> {
            if let Some((stream, record)) = &self.intruder {
                if !self.raced.swap(true, Ordering::SeqCst) {
                    self.inner.append(stream, 0, record.clone())?;
                }
            }
            self.inner.append_batch(appends)
        }
    }

    fn racing_store(intruder_owner: &str) -> ClaimStore<Arc<RacingLog>> {
        let stream = crate::key::Sha256KeyDeriver.derive("Email", "a@b.com");
        let record = ConstraintEvent::claimed("Email", "a@b.com", intruder_owner)
            .to_record("ConstraintEmail")
            .unwrap();
        ClaimStore::new(Arc::new(RacingLog {
            inner: MemoryLog::new(),
            intruder: Some((stream, record)),
            raced: AtomicBool::new(false),
        }))
    }

    #[test]
    fn test_lost_race_to_other_owner_is_claim_error() {
        let store = racing_store("AGG-2");
        let err = store.claim("Email", "a@b.com", "AGG-1").unwrap_err();

        match err {
            Error::Claim(ClaimError::AlreadyClaimed { owner, claimant, .. }) => {
                assert_eq!(owner, "AGG-2");
                assert_eq!(claimant, "AGG-1");
            }
            other => panic!("expected AlreadyClaimed, got {:?}", other),
        }
    }

    #[test]
    fn test_lost_race_to_same_owner_succeeds() {
        let store = racing_store("AGG-1");
        store.claim("Email", "a@b.com", "AGG-1").unwrap();
        assert_eq!(store.log().inner.total_records(), 1);
    }

    #[test]
    fn test_conflict_surfaces_without_retries() {
        let store = racing_store("AGG-2")
            .with_config(ClaimStoreConfig::new().with_max_conflict_retries(0));
        let err = store.claim("Email", "a@b.com", "AGG-1").unwrap_err();
        assert!(err.is_concurrency_conflict());
    }
}
