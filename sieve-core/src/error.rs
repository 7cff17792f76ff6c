//! Error types for Sieve guard cache operations

use crate::{PolicyId, QuerierId};
use thiserror::Error;

/// Cache structure errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid capacity {capacity} for {structure}: capacity must be at least 1")]
    InvalidCapacity {
        structure: &'static str,
        capacity: usize,
    },

    #[error("{structure} lock poisoned")]
    LockPoisoned { structure: &'static str },
}

/// Guard builder errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuilderError {
    #[error("Guard build failed for querier {querier}: {reason}")]
    BuildFailed { querier: QuerierId, reason: String },

    #[error("Guard merge failed for querier {querier}: {reason}")]
    MergeFailed { querier: QuerierId, reason: String },

    #[error("Range mergeability check failed on {attribute}: {reason}")]
    RangeCheckFailed { attribute: String, reason: String },
}

/// Policy store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Policy retrieval failed for querier {querier}: {reason}")]
    RetrievalFailed { querier: QuerierId, reason: String },

    #[error("Policy insert failed: {reason}")]
    InsertFailed { reason: String },

    #[error("Policy delete failed for querier {querier}: {reason}")]
    DeleteFailed { querier: QuerierId, reason: String },

    #[error("Unknown policy {policy_id} for querier {querier}")]
    UnknownPolicy {
        querier: QuerierId,
        policy_id: PolicyId,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Guarded query execution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Query execution failed for querier {querier}: {reason}")]
    Failed { querier: QuerierId, reason: String },
}

/// Master error type for all Sieve errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SieveError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

/// Result type alias for Sieve operations.
pub type SieveResult<T> = Result<T, SieveError>;

// =============================================================================
// TESTS
// =============================================================================
