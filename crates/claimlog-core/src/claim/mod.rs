//! Unique constraint claims.
//!
//! - [`ClaimStore`]: claim/release state machine over a [`ConstraintLog`](crate::log::ConstraintLog).
//! - [`ClaimTransaction`]: batches of claims appended atomically on commit.
//! - [`ConstraintValidator`]: diffs an entity's constraint values around a unit of work.

mod store;
mod transaction;
mod validator;

pub use store::{ClaimOp, ClaimStore, ConstraintClaim};
pub use transaction::ClaimTransaction;
pub use validator::{ConstraintValidator, PreparedCommit};
