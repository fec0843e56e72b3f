//! Claimlog Core - Unique constraint claims on an append-only event log.
//!
//! Each `(constraint name, value)` pair owns its own stream in a
//! [`ConstraintLog`]. The last event of the stream says who holds the value:
//! a [`ConstraintEvent::Claimed`] names the owner, a
//! [`ConstraintEvent::Released`] frees it. Appends are optimistic, so two
//! claimants racing for the same value cannot both win.
//!
//! ```no_run
//! use claimlog_core::{ClaimStore, ConstraintValidator, LogConfig, SledLog};
//!
//! struct User {
//!     id: String,
//!     email: String,
//! }
//!
//! # fn main() -> claimlog_core::Result<()> {
//! let store = ClaimStore::new(SledLog::open(LogConfig::new("./claims"))?);
//! let validator = ConstraintValidator::new(&store, |u: &User| u.id.clone())
//!     .with_constraint("Email", |u: &User| Some(u.email.clone()));
//!
//! let mut user = User { id: "AGG-1".into(), email: "a@b.com".into() };
//! let prepared = validator.check_around(&mut user, |u| {
//!     u.email = "new@b.com".into();
//!     Ok::<_, claimlog_core::Error>(())
//! })?;
//! prepared.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod claim;
pub mod config;
pub mod error;
pub mod event;
pub mod key;
pub mod log;

pub use claim::{
    ClaimOp, ClaimStore, ClaimTransaction, ConstraintClaim, ConstraintValidator, PreparedCommit,
};
pub use config::ClaimStoreConfig;
pub use error::{ClaimError, Error, Result};
pub use event::{ConstraintClaimed, ConstraintEvent, ConstraintReleased};
pub use key::{Sha256KeyDeriver, StreamId, StreamKeyDeriver};
pub use log::{ConstraintLog, LogConfig, LogRecord, MemoryLog, PendingAppend, SledLog};
