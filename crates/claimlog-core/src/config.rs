//! Claim store configuration.

/// Default prefix for the aggregate type of constraint records.
pub const DEFAULT_AGGREGATE_TYPE_PREFIX: &str = "Constraint";

/// Default number of re-evaluations after a lost append race.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 1;

/// Configuration for [`ClaimStore`](crate::claim::ClaimStore).
#[derive(Debug, Clone)]
pub struct ClaimStoreConfig {
    /// How often a commit re-reads and re-evaluates its claims after losing an
    /// append race before surfacing the conflict. Zero surfaces it immediately.
    pub max_conflict_retries: u32,

    /// Records are filed under `prefix + constraint name`.
    pub aggregate_type_prefix: String,
}

impl Default for ClaimStoreConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            aggregate_type_prefix: DEFAULT_AGGREGATE_TYPE_PREFIX.to_string(),
        }
    }
}

impl ClaimStoreConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of conflict re-evaluations.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Set the aggregate type prefix.
    pub fn with_aggregate_type_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.aggregate_type_prefix = prefix.into();
        self
    }

    /// Aggregate type for records of `constraint_name`.
    pub fn aggregate_type(&self, constraint_name: &str) -> String {
        format!("{}{}", self.aggregate_type_prefix, constraint_name)
    }
}
