//! Collaborator traits consumed by the guard cache.
//!
//! The cache never compiles guards, stores policies or runs queries itself.
//! These traits are the seams where the policy store, the guard builder, the
//! query executor and the report consumer plug in.

use crate::{
    AccessReport, GuardArtifact, GuardPart, ObjectCondition, Policy, PolicyId, QuerierId,
    SieveResult, Timestamp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Filter applied when retrieving a querier's allow-policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolicyFilter {
    /// Only policies inserted strictly after this instant.
    pub inserted_after: Option<Timestamp>,
}

impl PolicyFilter {
    /// Every allow-policy of the querier.
    pub fn all() -> Self {
        Self::default()
    }

    /// Allow-policies inserted strictly after `since`.
    pub fn inserted_after(since: Timestamp) -> Self {
        Self {
            inserted_after: Some(since),
        }
    }

    pub fn matches(&self, policy: &Policy) -> bool {
        self.inserted_after
            .map_or(true, |since| policy.is_newer_than(since))
    }
}

/// Source of raw policies.
///
/// `inserted_at` timestamps are assigned by the store and must be monotonic
/// per querier: they are the only signal driving staleness detection.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Retrieve the querier's allow-policies matching `filter`.
    ///
    /// `Ok(None)` means the store produced no result set at all; callers
    /// treat it exactly like an empty list.
    async fn retrieve_allow_policies(
        &self,
        querier: &QuerierId,
        filter: &PolicyFilter,
    ) -> SieveResult<Option<Vec<Policy>>>;

    /// Commit policies, returning them as stored (with `inserted_at` set).
    async fn insert_policies(&self, policies: Vec<Policy>) -> SieveResult<Vec<Policy>>;

    /// Remove policies of one querier, returning the time of the change.
    async fn delete_policies(
        &self,
        querier: &QuerierId,
        policy_ids: &[PolicyId],
    ) -> SieveResult<Timestamp>;
}

/// Compiles policies into guards.
#[async_trait]
pub trait GuardBuilder: Send + Sync {
    /// Full build from the querier's complete allow-policy set.
    async fn build(&self, querier: &QuerierId, policies: &[Policy]) -> SieveResult<GuardArtifact>;

    /// Guard parts for just `policies`, to be appended to an existing guard.
    async fn merge_parts(
        &self,
        querier: &QuerierId,
        policies: &[Policy],
    ) -> SieveResult<Vec<GuardPart>>;

    /// Whether a range-typed condition is already covered by or overlaps an
    /// existing guard condition on the same attribute.
    fn is_range_mergeable(
        &self,
        candidate: &ObjectCondition,
        existing: &ObjectCondition,
    ) -> SieveResult<bool>;
}

/// A query issued by a querier, rewritten by the guard before execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub statement: String,
}

impl Query {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
        }
    }

    /// Statement restricted by `guard`, or by `FALSE` when there is none.
    pub fn guarded_with(&self, guard: Option<&GuardArtifact>) -> String {
        let predicate = guard.map_or_else(|| "FALSE".to_string(), GuardArtifact::to_sql);
        format!(
            "WITH guarded AS (SELECT * FROM ({}) AS q WHERE {}) SELECT * FROM guarded",
            self.statement, predicate
        )
    }
}

/// Runs a query against the data store under a guard.
///
/// `guard` is `None` when the querier has no allow-policies; whether that
/// means "deny everything" or "run unguarded" is the executor's decision.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    type Output: Send;

    async fn execute(
        &self,
        querier: &QuerierId,
        query: &Query,
        guard: Option<&GuardArtifact>,
    ) -> SieveResult<Self::Output>;
}

/// Consumer of per-access reports.
pub trait ReportSink: Send + Sync {
    fn record(&self, report: &AccessReport);
}
