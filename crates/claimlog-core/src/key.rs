//! Stream key derivation for constraint values.
//!
//! Every `(constraint name, value)` pair maps to its own event stream. The
//! stream identifier is a one-way digest of the pair, so raw values such as
//! email addresses never appear in stream keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator placed between the constraint name and the value before hashing.
pub const KEY_SEPARATOR: &str = "__";

/// Opaque identifier of a constraint event stream.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Wrap an already derived identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier as bytes, used for storage keys.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamId").field(&self.0).finish()
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Maps a constraint name and value to the stream holding its claims.
///
/// Implementations must be pure: the same pair always yields the same
/// identifier, and distinct pairs must not collide.
pub trait StreamKeyDeriver: Send + Sync {
    /// Derive the stream identifier for `value` under `constraint_name`.
    fn derive(&self, constraint_name: &str, value: &str) -> StreamId;
}

impl<F> StreamKeyDeriver for F
where
    F: Fn(&str, &str) -> StreamId + Send + Sync,
{
    fn derive(&self, constraint_name: &str, value: &str) -> StreamId {
        self(constraint_name, value)
    }
}

/// Default deriver: uppercase hex SHA-256 of `len(name) name__value`.
///
/// The name length is hashed first as a big-endian `u64`, so a separator
/// inside the name or the value cannot shift the boundary between them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyDeriver;

impl StreamKeyDeriver for Sha256KeyDeriver {
    fn derive(&self, constraint_name: &str, value: &str) -> StreamId {
        let mut hasher = Sha256::new();
        hasher.update((constraint_name.len() as u64).to_be_bytes());
        hasher.update(constraint_name.as_bytes());
        hasher.update(KEY_SEPARATOR.as_bytes());
        hasher.update(value.as_bytes());
        StreamId(hex::encode_upper(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_stable() {
        let deriver = Sha256KeyDeriver;
        let first = deriver.derive("MyConstraint", "Value1");
        let second = deriver.derive("MyConstraint", "Value1");
        assert_eq!(first, second);
    }

    #[test]
    fn test_constraint_name_separates_streams() {
        let deriver = Sha256KeyDeriver;
        assert_ne!(
            deriver.derive("MyConstraint", "Value1"),
            deriver.derive("MyConstraint2", "Value1")
        );
    }

    #[test]
    fn test_value_separates_streams() {
        let deriver = Sha256KeyDeriver;
        assert_ne!(
            deriver.derive("MyConstraint", "Value1"),
            deriver.derive("MyConstraint", "Value2")
        );
    }

    #[test]
    fn test_known_digest() {
        let expected = {
            let mut input = 5u64.to_be_bytes().to_vec();
            input.extend_from_slice(b"Email__a@b.com");
            hex::encode_upper(Sha256::digest(&input))
        };
        assert_eq!(Sha256KeyDeriver.derive("Email", "a@b.com").as_str(), expected);
    }

    #[test]
    fn test_separator_in_name_or_value_does_not_collide() {
        let deriver = Sha256KeyDeriver;
        assert_ne!(
            deriver.derive("User", "Email__x@b.com"),
            deriver.derive("User__Email", "x@b.com")
        );
        assert_ne!(deriver.derive("A", "__x"), deriver.derive("A_", "_x"));
        assert_ne!(deriver.derive("", "x"), deriver.derive("x", ""));
    }

    #[test]
    fn test_identifier_hides_value() {
        let id = Sha256KeyDeriver.derive("Email", "alice@example.com");
        assert_eq!(id.as_str().len(), 64);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        assert!(!id.as_str().to_lowercase().contains("alice"));
    }

    #[test]
    fn test_closure_deriver() {
        let deriver = |name: &str, value: &str| StreamId::new(format!("{name}/{value}"));
        assert_eq!(deriver.derive("Email", "x").as_str(), "Email/x");
    }
}
