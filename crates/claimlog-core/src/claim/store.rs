//! Claim/release state machine over a constraint log.
//!
//! The state of a `(constraint, value)` pair is the last event of its stream:
//!
//! | last event          | claim by `o`      | release by `o`    |
//! |---------------------|-------------------|-------------------|
//! | none                | append Claimed@0  | no-op             |
//! | Released @ n        | append Claimed@n+1| no-op             |
//! | Claimed(o) @ n      | no-op             | append Released@n+1 |
//! | Claimed(other) @ n  | AlreadyClaimed    | NotOwner          |
//!
//! Only the last event is read, so the cost does not grow with history.

use tracing::{debug, warn};

use super::transaction::ClaimTransaction;
use crate::config::ClaimStoreConfig;
use crate::error::{ClaimError, Error, Result};
use crate::event::ConstraintEvent;
use crate::key::{Sha256KeyDeriver, StreamId, StreamKeyDeriver};
use crate::log::{next_sequence, ConstraintLog, PendingAppend};

/// A requested claim or release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOp {
    /// Claim `value` for `owner`.
    Claim {
        /// Constraint name.
        constraint_name: String,
        /// Constrained value.
        value: String,
        /// Claiming entity.
        owner: String,
    },
    /// Release `owner`'s claim on `value`.
    Release {
        /// Constraint name.
        constraint_name: String,
        /// Constrained value.
        value: String,
        /// Releasing entity.
        owner: String,
    },
}

impl ClaimOp {
    /// Build a claim operation.
    pub fn claim(
        constraint_name: impl Into<String>,
        value: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        ClaimOp::Claim {
            constraint_name: constraint_name.into(),
            value: value.into(),
            owner: owner.into(),
        }
    }

    /// Build a release operation.
    pub fn release(
        constraint_name: impl Into<String>,
        value: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        ClaimOp::Release {
            constraint_name: constraint_name.into(),
            value: value.into(),
            owner: owner.into(),
        }
    }

    /// Constraint name.
    pub fn constraint_name(&self) -> &str {
        match self {
            ClaimOp::Claim {
                constraint_name, ..
            }
            | ClaimOp::Release {
                constraint_name, ..
            } => constraint_name,
        }
    }

    /// Constrained value.
    pub fn value(&self) -> &str {
        match self {
            ClaimOp::Claim { value, .. } | ClaimOp::Release { value, .. } => value,
        }
    }

    /// Requesting owner.
    pub fn owner(&self) -> &str {
        match self {
            ClaimOp::Claim { owner, .. } | ClaimOp::Release { owner, .. } => owner,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.constraint_name().is_empty() {
            return Err(Error::InvalidInput("constraint name must not be empty".into()));
        }
        if self.owner().is_empty() {
            return Err(Error::InvalidInput(format!(
                "owner for constraint '{}' must not be empty",
                self.constraint_name()
            )));
        }
        Ok(())
    }
}

/// State of a stream as seen from its last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClaimState {
    /// Never claimed, or last event is a release.
    Unclaimed { last_sequence: Option<u64> },
    /// Last event is a claim.
    Claimed { sequence: u64, owner: String },
}

impl ClaimState {
    pub(crate) fn from_event(sequence: u64, event: ConstraintEvent) -> Self {
        match event {
            ConstraintEvent::Claimed(claimed) => ClaimState::Claimed {
                sequence,
                owner: claimed.owner,
            },
            ConstraintEvent::Released(_) => ClaimState::Unclaimed {
                last_sequence: Some(sequence),
            },
        }
    }

    /// State from the event at `sequence` of `stream`, which must record
    /// `value` under `constraint_name`.
    pub(crate) fn from_stream_event(
        stream: &StreamId,
        sequence: u64,
        event: ConstraintEvent,
        constraint_name: &str,
        value: &str,
    ) -> Result<Self> {
        if event.constraint_name() != constraint_name || event.key() != value {
            return Err(Error::Protocol(format!(
                "constraint stream {} at sequence {} records '{}' = '{}', expected '{}' = '{}'",
                stream,
                sequence,
                event.constraint_name(),
                event.key(),
                constraint_name,
                value
            )));
        }
        Ok(Self::from_event(sequence, event))
    }
}

/// Current ownership of a constrained value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintClaim {
    /// Constraint name.
    pub constraint_name: String,
    /// Constrained value.
    pub key: String,
    /// Current owner, `None` when unclaimed.
    pub owner: Option<String>,
    /// Sequence of the event that decided the state, `None` for a fresh stream.
    pub sequence: Option<u64>,
}

impl ConstraintClaim {
    /// Whether someone holds the value.
    pub fn is_claimed(&self) -> bool {
        self.owner.is_some()
    }
}

/// Claim store over a constraint log.
///
/// The store owns only the claim streams. Share one instance (by reference or
/// `Arc`) between every validator that enforces the same constraints.
pub struct ClaimStore<L, K = Sha256KeyDeriver> {
    log: L,
    deriver: K,
    config: ClaimStoreConfig,
}

impl<L: ConstraintLog> ClaimStore<L> {
    /// Create a store using SHA-256 stream keys.
    pub fn new(log: L) -> Self {
        Self::with_deriver(log, Sha256KeyDeriver)
    }
}

impl<L: ConstraintLog, K: StreamKeyDeriver> ClaimStore<L, K> {
    /// Create a store with a custom stream key deriver.
    pub fn with_deriver(log: L, deriver: K) -> Self {
        Self {
            log,
            deriver,
            config: ClaimStoreConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ClaimStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// The underlying log.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// The active configuration.
    pub fn config(&self) -> &ClaimStoreConfig {
        &self.config
    }

    /// Stream holding the claims of `value` under `constraint_name`.
    pub fn stream_id(&self, constraint_name: &str, value: &str) -> StreamId {
        self.deriver.derive(constraint_name, value)
    }

    /// Start a transaction whose appends are deferred until commit.
    pub fn begin(&self) -> ClaimTransaction<'_, L, K> {
        ClaimTransaction::new(self)
    }

    /// Claim `value` for `owner` and append immediately.
    ///
    /// Succeeds without appending if `owner` already holds the claim.
    pub fn claim(&self, constraint_name: &str, value: &str, owner: &str) -> Result<()> {
        let mut tx = self.begin();
        tx.claim(constraint_name, value, owner)?;
        tx.commit()
    }

    /// Release `owner`'s claim on `value` and append immediately.
    ///
    /// Succeeds without appending if the value is not claimed at all.
    pub fn release(&self, constraint_name: &str, value: &str, owner: &str) -> Result<()> {
        let mut tx = self.begin();
        tx.release(constraint_name, value, owner)?;
        tx.commit()
    }

    /// Current ownership of `value`, derived from the last event.
    pub fn current_claim(&self, constraint_name: &str, value: &str) -> Result<ConstraintClaim> {
        let stream = self.stream_id(constraint_name, value);
        let (owner, sequence) = match self.read_state(&stream, constraint_name, value)? {
            ClaimState::Unclaimed { last_sequence } => (None, last_sequence),
            ClaimState::Claimed { sequence, owner } => (Some(owner), Some(sequence)),
        };
        Ok(ConstraintClaim {
            constraint_name: constraint_name.to_string(),
            key: value.to_string(),
            owner,
            sequence,
        })
    }

    /// Read the state of `value` under `constraint_name` from the last event
    /// of its stream.
    pub(crate) fn read_state(
        &self,
        stream: &StreamId,
        constraint_name: &str,
        value: &str,
    ) -> Result<ClaimState> {
        let Some(last) = self.log.last_sequence(stream)? else {
            return Ok(ClaimState::Unclaimed {
                last_sequence: None,
            });
        };

        let record = self.log.read_event(stream, last)?.ok_or_else(|| {
            Error::Protocol(format!(
                "unable to fetch event for constraint stream {} at sequence {}",
                stream, last
            ))
        })?;

        let event = ConstraintEvent::from_record(&record)?;
        ClaimState::from_stream_event(stream, last, event, constraint_name, value)
    }

    /// Decide what `op` does against `state`.
    ///
    /// Returns the append to perform, `None` for a no-op, or the ownership
    /// conflict.
    pub(crate) fn plan(
        &self,
        op: &ClaimOp,
        stream: &StreamId,
        state: ClaimState,
    ) -> Result<Option<PendingAppend>> {
        op.validate()?;
        let aggregate_type = self.config.aggregate_type(op.constraint_name());

        match (op, state) {
            (ClaimOp::Claim { .. }, ClaimState::Unclaimed { last_sequence }) => {
                let event = ConstraintEvent::claimed(op.constraint_name(), op.value(), op.owner());
                let sequence = next_sequence(last_sequence);
                debug!(
                    constraint = op.constraint_name(),
                    stream = %stream,
                    sequence,
                    owner = op.owner(),
                    "planning claim"
                );
                Ok(Some(PendingAppend::new(
                    stream.clone(),
                    sequence,
                    event.to_record(aggregate_type)?,
                )))
            }
            (ClaimOp::Claim { .. }, ClaimState::Claimed { owner, .. }) if owner == op.owner() => {
                debug!(
                    constraint = op.constraint_name(),
                    stream = %stream,
                    owner = %owner,
                    "value already claimed by owner"
                );
                Ok(None)
            }
            (ClaimOp::Claim { .. }, ClaimState::Claimed { owner, .. }) => {
                warn!(
                    constraint = op.constraint_name(),
                    stream = %stream,
                    owner = %owner,
                    claimant = op.owner(),
                    "claim rejected, value owned by another entity"
                );
                Err(ClaimError::AlreadyClaimed {
                    constraint: op.constraint_name().to_string(),
                    value: op.value().to_string(),
                    owner,
                    claimant: op.owner().to_string(),
                }
                .into())
            }
            (ClaimOp::Release { .. }, ClaimState::Unclaimed { .. }) => {
                debug!(
                    constraint = op.constraint_name(),
                    stream = %stream,
                    "nothing to release"
                );
                Ok(None)
            }
            (ClaimOp::Release { .. }, ClaimState::Claimed { sequence, owner })
                if owner == op.owner() =>
            {
                let event = ConstraintEvent::released(op.constraint_name(), op.value());
                debug!(
                    constraint = op.constraint_name(),
                    stream = %stream,
                    sequence = sequence + 1,
                    owner = %owner,
                    "planning release"
                );
                Ok(Some(PendingAppend::new(
                    stream.clone(),
                    sequence + 1,
                    event.to_record(aggregate_type)?,
                )))
            }
            (ClaimOp::Release { .. }, ClaimState::Claimed { owner, .. }) => {
                warn!(
                    constraint = op.constraint_name(),
                    stream = %stream,
                    owner = %owner,
                    requester = op.owner(),
                    "release rejected, value owned by another entity"
                );
                Err(ClaimError::NotOwner {
                    constraint: op.constraint_name().to_string(),
                    value: op.value().to_string(),
                    owner,
                    requester: op.owner().to_string(),
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::{CLAIMED_PAYLOAD_TYPE, RELEASED_PAYLOAD_TYPE};
    use crate::log::{LogRecord, MemoryLog};

    fn transparent(name: &str, value: &str) -> StreamId {
        StreamId::new(format!("{name}:{value}"))
    }

    type TestStore = ClaimStore<Arc<MemoryLog>, fn(&str, &str) -> StreamId>;

    fn test_store() -> TestStore {
        ClaimStore::with_deriver(Arc::new(MemoryLog::new()), transparent as fn(&str, &str) -> StreamId)
    }

    fn last_record(store: &TestStore, stream: &str) -> LogRecord {
        let history = store.log().history(&StreamId::new(stream));
        history.last().cloned().expect("stream has records")
    }

    #[test]
    fn test_claim_on_fresh_stream() {
        let store = test_store();
        store.claim("MyConstraint", "MyConstraintValue", "AGG_ID_12").unwrap();

        let record = last_record(&store, "MyConstraint:MyConstraintValue");
        assert_eq!(record.sequence, 0);
        assert_eq!(record.aggregate_type, "ConstraintMyConstraint");
        assert_eq!(
            ConstraintEvent::from_record(&record).unwrap(),
            ConstraintEvent::claimed("MyConstraint", "MyConstraintValue", "AGG_ID_12")
        );
    }

    #[test]
    fn test_claim_after_release_appends_next_sequence() {
        let store = test_store();
        store.claim("MyConstraint", "v", "AGG_11").unwrap();
        store.release("MyConstraint", "v", "AGG_11").unwrap();
        store.claim("MyConstraint", "v", "AGG_ID_12").unwrap();

        let history = store.log().history(&StreamId::new("MyConstraint:v"));
        let types: Vec<_> = history.iter().map(|r| r.payload_type.as_str()).collect();
        assert_eq!(
            types,
            vec![CLAIMED_PAYLOAD_TYPE, RELEASED_PAYLOAD_TYPE, CLAIMED_PAYLOAD_TYPE]
        );
        assert_eq!(history[2].sequence, 2);
    }

    #[test]
    fn test_reclaim_by_same_owner_is_noop() {
        let store = test_store();
        store.claim("Email", "a@b.com", "AGG-1").unwrap();
        store.claim("Email", "a@b.com", "AGG-1").unwrap();

        assert_eq!(store.log().stream_len(&StreamId::new("Email:a@b.com")), 1);
    }

    #[test]
    fn test_claim_owned_by_other_is_rejected() {
        let store = test_store();
        store.claim("MyConstraint", "v", "AGG_11").unwrap();

        let err = store.claim("MyConstraint", "v", "AGG_ID_12").unwrap_err();
        match err {
            Error::Claim(ClaimError::AlreadyClaimed {
                constraint,
                value,
                owner,
                claimant,
            }) => {
                assert_eq!(constraint, "MyConstraint");
                assert_eq!(value, "v");
                assert_eq!(owner, "AGG_11");
                assert_eq!(claimant, "AGG_ID_12");
            }
            other => panic!("expected AlreadyClaimed, got {:?}", other),
        }
        assert_eq!(store.log().stream_len(&StreamId::new("MyConstraint:v")), 1);
    }

    #[test]
    fn test_release_owned_by_other_is_rejected() {
        let store = test_store();
        store.claim("MyConstraint", "v", "AGG_11").unwrap();

        let err = store.release("MyConstraint", "v", "AGG_ID_12").unwrap_err();
        assert!(matches!(err, Error::Claim(ClaimError::NotOwner { .. })));
        assert_eq!(
            store.current_claim("MyConstraint", "v").unwrap().owner.as_deref(),
            Some("AGG_11")
        );
    }

    #[test]
    fn test_release_by_owner_appends_released() {
        let store = test_store();
        store.claim("MyConstraint", "v", "AGG_ID_12").unwrap();
        store.release("MyConstraint", "v", "AGG_ID_12").unwrap();

        let record = last_record(&store, "MyConstraint:v");
        assert_eq!(record.sequence, 1);
        assert_eq!(
            ConstraintEvent::from_record(&record).unwrap(),
            ConstraintEvent::released("MyConstraint", "v")
        );
    }

    #[test]
    fn test_release_of_unclaimed_is_noop() {
        let store = test_store();
        store.release("Email", "nobody@b.com", "AGG-1").unwrap();
        assert_eq!(store.log().total_records(), 0);

        store.claim("Email", "x", "AGG-1").unwrap();
        store.release("Email", "x", "AGG-1").unwrap();
        store.release("Email", "x", "AGG-2").unwrap();
        assert_eq!(store.log().stream_len(&StreamId::new("Email:x")), 2);
    }

    #[test]
    fn test_unknown_last_event_fails_loudly() {
        let store = test_store();
        let stream = StreamId::new("Email:x");
        let record = LogRecord::new("ConstraintEmail", "ConstraintFrozen", b"{}".to_vec());
        store.log().append(&stream, 0, record).unwrap();

        assert!(matches!(store.claim("Email", "x", "AGG-1"), Err(Error::Protocol(_))));
        assert!(matches!(store.release("Email", "x", "AGG-1"), Err(Error::Protocol(_))));
        assert!(matches!(store.current_claim("Email", "x"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_owner_comparison_is_exact() {
        let store = test_store();
        store.claim("Email", "x", "agg-1").unwrap();
        assert!(store.claim("Email", "x", "AGG-1").is_err());
        assert!(store.claim("Email", "x", "agg-1 ").is_err());
    }

    #[test]
    fn test_empty_owner_is_invalid() {
        let store = test_store();
        assert!(matches!(
            store.claim("Email", "x", ""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.claim("", "x", "AGG-1"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_current_claim() {
        let store = test_store();
        let claim = store.current_claim("Email", "a@b.com").unwrap();
        assert!(!claim.is_claimed());
        assert_eq!(claim.sequence, None);

        store.claim("Email", "a@b.com", "AGG-1").unwrap();
        let claim = store.current_claim("Email", "a@b.com").unwrap();
        assert_eq!(claim.owner.as_deref(), Some("AGG-1"));
        assert_eq!(claim.sequence, Some(0));
    }

    /// Log whose head claims one more record than it can return.
    struct HoleLog {
        inner: MemoryLog,
    }

    impl ConstraintLog for HoleLog {
        fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>> {
            Ok(Some(next_sequence(self.inner.last_sequence(stream)?)))
        }

        fn read_event(&self, stream: &StreamId, sequence: u64) -> Result<Option<LogRecord>> {
            self.inner.read_event(stream, sequence)
        }

        fn append_batch(&self, appends: Vec<PendingAppend>) -> Result<()> {
            self.inner.append_batch(appends)
        }
    }

    #[test]
    fn test_unreadable_head_event_is_protocol_error() {
        let log = HoleLog {
            inner: MemoryLog::new(),
        };
        let stream = Sha256KeyDeriver.derive("Email", "x");
        let record = ConstraintEvent::claimed("Email", "x", "AGG-1")
            .to_record("ConstraintEmail")
            .unwrap();
        log.inner.append(&stream, 0, record).unwrap();
        let store = ClaimStore::new(log);

        let err = store.claim("Email", "x", "AGG-1").unwrap_err();
        assert!(matches!(&err, Error::Protocol(msg) if msg.contains("sequence 1")));
        assert!(matches!(store.release("Email", "x", "AGG-1"), Err(Error::Protocol(_))));
        assert!(matches!(store.current_claim("Email", "x"), Err(Error::Protocol(_))));

        // A fresh stream reports head 0 with nothing behind it.
        assert!(matches!(store.claim("Email", "y", "AGG-1"), Err(Error::Protocol(_))));
        assert_eq!(store.log().inner.total_records(), 1);
    }

    #[test]
    fn test_event_for_other_pair_is_protocol_error() {
        let shared = |_: &str, _: &str| StreamId::new("shared");
        let store = ClaimStore::with_deriver(MemoryLog::new(), shared);
        store.claim("User", "Email__x@b.com", "AGG-1").unwrap();

        let err = store.claim("User__Email", "x@b.com", "AGG-2").unwrap_err();
        assert!(matches!(&err, Error::Protocol(msg) if msg.contains("User__Email")));
        assert!(matches!(
            store.current_claim("User__Email", "x@b.com"),
            Err(Error::Protocol(_))
        ));
        assert_eq!(
            store.current_claim("User", "Email__x@b.com").unwrap().owner.as_deref(),
            Some("AGG-1")
        );
        assert_eq!(store.log().total_records(), 1);
    }

    #[test]
    fn test_separator_in_names_keeps_constraints_apart() {
        let store = ClaimStore::new(MemoryLog::new());
        store.claim("User", "Email__x@b.com", "AGG-1").unwrap();
        store.claim("User__Email", "x@b.com", "AGG-2").unwrap();

        assert_eq!(store.log().stream_count(), 2);
        assert_eq!(
            store.current_claim("User__Email", "x@b.com").unwrap().owner.as_deref(),
            Some("AGG-2")
        );
    }

    #[test]
    fn test_default_store_uses_sha256_streams() {
        let store = ClaimStore::new(MemoryLog::new());
        store.claim("Email", "a@b.com", "AGG-1").unwrap();

        let stream = Sha256KeyDeriver.derive("Email", "a@b.com");
        assert_eq!(store.stream_id("Email", "a@b.com"), stream);
        assert_eq!(store.log().stream_len(&stream), 1);
    }
}
