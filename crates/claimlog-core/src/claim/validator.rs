//! Constraint validation around a unit of work.
//!
//! A [`ConstraintValidator`] knows how to read each named constraint value and
//! the owner identifier from an entity. It samples the values before and
//! after the caller's unit of work, diffs them and turns every change into a
//! release of the old value and a claim of the new one.
//!
//! Claims are checked right away, but the appends are deferred: the validator
//! returns a [`PreparedCommit`] which the caller commits once its own work is
//! durable. Dropping the prepared commit appends nothing.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use super::store::{ClaimOp, ClaimStore};
use super::transaction::ClaimTransaction;
use crate::error::{Error, Result};
use crate::key::{Sha256KeyDeriver, StreamKeyDeriver};
use crate::log::{ConstraintLog, PendingAppend};

type OwnerAccessor<E> = Box<dyn Fn(&E) -> String + Send + Sync>;
type ValueAccessor<E> = Box<dyn Fn(&E) -> Option<String> + Send + Sync>;

/// Enforces named unique constraints for entities of type `E`.
///
/// Constraints are evaluated in lexicographic name order.
pub struct ConstraintValidator<'s, E, L, K = Sha256KeyDeriver> {
    store: &'s ClaimStore<L, K>,
    owner_of: OwnerAccessor<E>,
    constraints: BTreeMap<String, ValueAccessor<E>>,
}

impl<'s, E, L, K> ConstraintValidator<'s, E, L, K>
where
    L: ConstraintLog,
    K: StreamKeyDeriver,
{
    /// Create a validator that claims on behalf of `owner_of(entity)`.
    pub fn new<F>(store: &'s ClaimStore<L, K>, owner_of: F) -> Self
    where
        F: Fn(&E) -> String + Send + Sync + 'static,
    {
        Self {
            store,
            owner_of: Box::new(owner_of),
            constraints: BTreeMap::new(),
        }
    }

    /// Register a named constraint. A second registration under the same name
    /// replaces the accessor.
    pub fn register<F>(&mut self, constraint_name: impl Into<String>, accessor: F) -> &mut Self
    where
        F: Fn(&E) -> Option<String> + Send + Sync + 'static,
    {
        self.constraints
            .insert(constraint_name.into(), Box::new(accessor));
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_constraint<F>(mut self, constraint_name: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&E) -> Option<String> + Send + Sync + 'static,
    {
        self.register(constraint_name, accessor);
        self
    }

    /// Registered constraint names, in evaluation order.
    pub fn constraint_names(&self) -> impl Iterator<Item = &str> {
        self.constraints.keys().map(String::as_str)
    }

    /// The claim store used by this validator.
    pub fn store(&self) -> &'s ClaimStore<L, K> {
        self.store
    }

    /// Run `unit_of_work` on `entity` and prepare the claims its changes need.
    ///
    /// If the unit of work fails, its error is returned unchanged and no claim
    /// work happens. If a claim or release is rejected, the error is returned
    /// and nothing is appended; the caller must not commit its own work.
    ///
    /// The owner is read from the entity after the unit of work. A unit of
    /// work that changes the owner identifier releases the old values under
    /// the new identifier, which fails with [`ClaimError::NotOwner`](crate::error::ClaimError::NotOwner).
    pub fn check_around<T, W, F>(
        &self,
        entity: &mut E,
        unit_of_work: F,
    ) -> std::result::Result<PreparedCommit<'s, T, L, K>, W>
    where
        F: FnOnce(&mut E) -> std::result::Result<T, W>,
        W: From<Error>,
    {
        let before = self.sample(entity);
        let value = unit_of_work(&mut *entity)?;
        let after = self.sample(entity);

        let owner = (self.owner_of)(entity);
        let transaction = self.prepare(&owner, before, after)?;
        Ok(PreparedCommit { value, transaction })
    }

    /// Prepare claims for every current value, as if none were held before.
    pub fn check_now(&self, entity: &E) -> Result<PreparedCommit<'s, (), L, K>> {
        let before = self.constraints.keys().map(|name| (name.clone(), None)).collect();
        let after = self.sample(entity);

        let owner = (self.owner_of)(entity);
        let transaction = self.prepare(&owner, before, after)?;
        Ok(PreparedCommit {
            value: (),
            transaction,
        })
    }

    fn sample(&self, entity: &E) -> BTreeMap<String, Option<String>> {
        self.constraints
            .iter()
            .map(|(name, accessor)| (name.clone(), accessor(entity)))
            .collect()
    }

    fn prepare(
        &self,
        owner: &str,
        mut before: BTreeMap<String, Option<String>>,
        after: BTreeMap<String, Option<String>>,
    ) -> Result<ClaimTransaction<'s, L, K>> {
        let mut tx = self.store.begin();

        for (name, new) in after {
            let old = before.remove(&name).flatten();
            if old == new {
                continue;
            }

            debug!(
                constraint = %name,
                owner,
                old = ?old,
                new = ?new,
                "constraint value changed"
            );

            if let Some(old) = old {
                tx.release(&name, &old, owner)?;
            }
            if let Some(new) = new {
                tx.claim(&name, &new, owner)?;
            }
        }

        Ok(tx)
    }
}

/// Result of a successful check, holding the appends to perform on commit.
#[must_use = "claims are not recorded until the prepared commit is committed"]
pub struct PreparedCommit<'s, T, L, K> {
    value: T,
    transaction: ClaimTransaction<'s, L, K>,
}

impl<'s, T, L, K> PreparedCommit<'s, T, L, K>
where
    L: ConstraintLog,
    K: StreamKeyDeriver,
{
    /// Result of the unit of work.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Requested claims and releases, in evaluation order.
    pub fn operations(&self) -> &[ClaimOp] {
        self.transaction.operations()
    }

    /// Appends that commit will perform.
    pub fn pending_appends(&self) -> &[PendingAppend] {
        self.transaction.pending_appends()
    }

    /// Append the claims and return the unit of work's result.
    pub fn commit(self) -> Result<T> {
        self.transaction.commit()?;
        Ok(self.value)
    }

    /// Split into the result and the uncommitted transaction.
    pub fn into_parts(self) -> (T, ClaimTransaction<'s, L, K>) {
        (self.value, self.transaction)
    }
}

impl<T: fmt::Debug, L, K> fmt::Debug for PreparedCommit<'_, T, L, K>
where
    L: ConstraintLog,
    K: StreamKeyDeriver,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCommit")
            .field("value", &self.value)
            .field("operations", &self.transaction.operations())
            .finish()
    }
}
