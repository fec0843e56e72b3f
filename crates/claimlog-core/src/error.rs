//! Core error types.

use thiserror::Error;

use crate::key::StreamId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Core claim log errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A claim or release was rejected because another owner holds the value.
    #[error("claim rejected: {0}")]
    Claim(#[from] ClaimError),

    /// An append lost an optimistic concurrency race on a stream.
    #[error(
        "concurrency conflict on stream {stream}: appended at sequence {expected}, last sequence is {actual:?}"
    )]
    ConcurrencyConflict {
        /// Stream the append targeted.
        stream: StreamId,
        /// Sequence number the append was submitted with.
        expected: u64,
        /// Last sequence number actually stored in the stream.
        actual: Option<u64>,
    },

    /// A constraint stream holds an event this version cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error is a business-level claim conflict.
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, Error::Claim(_))
    }

    /// Whether this error is a lost append race.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }
}

/// Ownership conflicts on a unique constraint value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// The value is currently claimed by a different owner.
    #[error(
        "unique constraint '{constraint}' value '{value}' is already claimed by '{owner}', cannot claim it for '{claimant}'"
    )]
    AlreadyClaimed {
        /// Constraint name.
        constraint: String,
        /// The constrained value.
        value: String,
        /// Current owner of the claim.
        owner: String,
        /// Owner that attempted the claim.
        claimant: String,
    },

    /// A release was attempted by someone who does not hold the claim.
    #[error(
        "unique constraint '{constraint}' value '{value}' is claimed by '{owner}', '{requester}' cannot release it"
    )]
    NotOwner {
        /// Constraint name.
        constraint: String,
        /// The constrained value.
        value: String,
        /// Current owner of the claim.
        owner: String,
        /// Owner that attempted the release.
        requester: String,
    },
}

impl ClaimError {
    /// Name of the constraint involved.
    pub fn constraint(&self) -> &str {
        match self {
            ClaimError::AlreadyClaimed { constraint, .. } | ClaimError::NotOwner { constraint, .. } => {
                constraint
            }
        }
    }

    /// The contested value.
    pub fn value(&self) -> &str {
        match self {
            ClaimError::AlreadyClaimed { value, .. } | ClaimError::NotOwner { value, .. } => value,
        }
    }

    /// Owner currently holding the claim.
    pub fn owner(&self) -> &str {
        match self {
            ClaimError::AlreadyClaimed { owner, .. } | ClaimError::NotOwner { owner, .. } => owner,
        }
    }

    /// Owner whose request was rejected.
    pub fn requester(&self) -> &str {
        match self {
            ClaimError::AlreadyClaimed { claimant, .. } => claimant,
            ClaimError::NotOwner { requester, .. } => requester,
        }
    }
}
