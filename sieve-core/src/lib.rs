//! Sieve Core - Entity Types
//!
//! Pure data structures shared by the guard cache and its collaborators.
//! This crate contains the data model, the error taxonomy, configuration and
//! the collaborator traits - no cache logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod collaborators;
pub mod config;
pub mod error;
pub mod guard;
pub mod policy;
pub mod report;

pub use collaborators::{GuardBuilder, PolicyFilter, PolicyStore, Query, QueryExecutor, ReportSink};
pub use config::GuardCacheConfig;
pub use error::{
    BuilderError, CacheError, ConfigError, ExecutionError, SieveError, SieveResult, StoreError,
};
pub use guard::{GuardArtifact, GuardPart};
pub use policy::{
    Action, BooleanPredicate, ObjectCondition, Operator, Policy, RangeBound, ValueRange,
};
pub use report::{AccessOutcome, AccessReport, AccessTimings};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identity of the querier a guard is compiled for.
///
/// Opaque to the cache: two queriers are the same exactly when their keys
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuerierId(String);

impl QuerierId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QuerierId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QuerierId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Policy identifier using UUIDv7 for timestamp-sortable IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(Uuid);

impl PolicyId {
    /// Generate a new timestamp-sortable policy id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PolicyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
