//! Sieve Test Utilities
//!
//! Shared test infrastructure for the Sieve workspace:
//! - Instrumented collaborators (counting, failing and slow guard builders,
//!   a recording query executor)
//! - Proptest generators for policies and conditions
//! - Policy fixtures for common scenarios
//! - Custom assertions on `SieveResult`

pub use sieve_core::{
    BuilderError, CacheError, GuardArtifact, GuardBuilder, GuardPart, ObjectCondition, Policy,
    PolicyId, Query, QuerierId, QueryExecutor, SieveError, SieveResult, StoreError, Timestamp,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// INSTRUMENTED COLLABORATORS
// ============================================================================

/// Guard builder wrapper counting full builds and incremental merges.
#[derive(Debug, Default)]
pub struct CountingGuardBuilder<B> {
    inner: B,
    builds: AtomicUsize,
    merges: AtomicUsize,
}

impl<B> CountingGuardBuilder<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            builds: AtomicUsize::new(0),
            merges: AtomicUsize::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn merges(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<B: GuardBuilder> GuardBuilder for CountingGuardBuilder<B> {
    async fn build(&self, querier: &QuerierId, policies: &[Policy]) -> SieveResult<GuardArtifact> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.inner.build(querier, policies).await
    }

    async fn merge_parts(
        &self,
        querier: &QuerierId,
        policies: &[Policy],
    ) -> SieveResult<Vec<GuardPart>> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        self.inner.merge_parts(querier, policies).await
    }

    fn is_range_mergeable(
        &self,
        candidate: &ObjectCondition,
        existing: &ObjectCondition,
    ) -> SieveResult<bool> {
        self.inner.is_range_mergeable(candidate, existing)
    }
}

/// Guard builder wrapper that fails builds and merges while switched on.
#[derive(Debug, Default)]
pub struct FailingGuardBuilder<B> {
    inner: B,
    failing: AtomicBool,
}

impl<B> FailingGuardBuilder<B> {
    /// Wrapper that starts out passing calls through.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<B: GuardBuilder> GuardBuilder for FailingGuardBuilder<B> {
    async fn build(&self, querier: &QuerierId, policies: &[Policy]) -> SieveResult<GuardArtifact> {
        if self.is_failing() {
            return Err(BuilderError::BuildFailed {
                querier: querier.clone(),
                reason: "injected build failure".to_string(),
            }
            .into());
        }
        self.inner.build(querier, policies).await
    }

    async fn merge_parts(
        &self,
        querier: &QuerierId,
        policies: &[Policy],
    ) -> SieveResult<Vec<GuardPart>> {
        if self.is_failing() {
            return Err(BuilderError::MergeFailed {
                querier: querier.clone(),
                reason: "injected merge failure".to_string(),
            }
            .into());
        }
        self.inner.merge_parts(querier, policies).await
    }

    fn is_range_mergeable(
        &self,
        candidate: &ObjectCondition,
        existing: &ObjectCondition,
    ) -> SieveResult<bool> {
        self.inner.is_range_mergeable(candidate, existing)
    }
}

/// Guard builder wrapper that sleeps before every build, widening race windows.
#[derive(Debug)]
pub struct SlowGuardBuilder<B> {
    inner: B,
    delay: Duration,
}

impl<B> SlowGuardBuilder<B> {
    pub fn new(inner: B, delay: Duration) -> Self {
        Self { inner, delay }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: GuardBuilder> GuardBuilder for SlowGuardBuilder<B> {
    async fn build(&self, querier: &QuerierId, policies: &[Policy]) -> SieveResult<GuardArtifact> {
        tokio::time::sleep(self.delay).await;
        self.inner.build(querier, policies).await
    }

    async fn merge_parts(
        &self,
        querier: &QuerierId,
        policies: &[Policy],
    ) -> SieveResult<Vec<GuardPart>> {
        tokio::time::sleep(self.delay).await;
        self.inner.merge_parts(querier, policies).await
    }

    fn is_range_mergeable(
        &self,
        candidate: &ObjectCondition,
        existing: &ObjectCondition,
    ) -> SieveResult<bool> {
        self.inner.is_range_mergeable(candidate, existing)
    }
}

/// One call observed by [`RecordingQueryExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExecution {
    pub querier: QuerierId,
    pub statement: String,
    /// Guard the query ran under, if any.
    pub guard: Option<GuardArtifact>,
}

/// Query executor that records every call and returns the guarded SQL.
#[derive(Debug, Default)]
pub struct RecordingQueryExecutor {
    calls: Mutex<Vec<RecordedExecution>>,
}

impl RecordingQueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecordedExecution> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingQueryExecutor {
    type Output = String;

    async fn execute(
        &self,
        querier: &QuerierId,
        query: &Query,
        guard: Option<&GuardArtifact>,
    ) -> SieveResult<String> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedExecution {
                querier: querier.clone(),
                statement: query.statement.clone(),
                guard: guard.cloned(),
            });
        Ok(query.guarded_with(guard))
    }
}

use chrono::Utc;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Sieve data types.

    use super::*;
    use proptest::prelude::*;

    /// Attributes the default merge strategy table knows about.
    pub const EQUALITY_ATTRIBUTES: [&str; 4] =
        ["user_id", "user_group", "user_profile", "location_id"];

    /// Generate a QuerierId from a small pool, so keys collide.
    pub fn arb_querier_id() -> impl Strategy<Value = QuerierId> {
        (0u8..16).prop_map(|n| QuerierId::new(format!("querier-{n}")))
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Generate timestamps within a reasonable range (2020-2030)
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Generate an equality condition over one of the known attributes.
    pub fn arb_equality_condition() -> impl Strategy<Value = ObjectCondition> {
        (prop::sample::select(EQUALITY_ATTRIBUTES.to_vec()), 0u16..50)
            .prop_map(|(attribute, value)| ObjectCondition::equals(attribute, value.to_string()))
    }

    /// Generate a closed `start_date` interval within 2018.
    pub fn arb_date_range_condition() -> impl Strategy<Value = ObjectCondition> {
        (1u32..=12, 1u32..=28, 0u32..60).prop_map(|(month, day, span)| {
            let start = chrono::NaiveDate::from_ymd_opt(2018, month, day)
                .unwrap_or(chrono::NaiveDate::MIN);
            let end = start + chrono::Duration::days(i64::from(span));
            ObjectCondition::between("start_date", start.to_string(), end.to_string())
        })
    }

    pub fn arb_condition() -> impl Strategy<Value = ObjectCondition> {
        prop_oneof![
            3 => arb_equality_condition(),
            1 => arb_date_range_condition(),
        ]
    }

    /// Generate an allow-policy for `querier`.
    pub fn arb_policy(querier: QuerierId) -> impl Strategy<Value = Policy> {
        (prop::collection::vec(arb_condition(), 1..4), arb_timestamp()).prop_map(
            move |(conditions, inserted_at)| Policy::allow(querier.clone(), conditions, inserted_at),
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built policies for common scenarios.

    use super::*;

    /// Allow-policy `attribute = value` for `querier`, inserted at `at`.
    pub fn policy_at(querier: &str, attribute: &str, value: &str, at: Timestamp) -> Policy {
        Policy::allow(querier, vec![ObjectCondition::equals(attribute, value)], at)
    }

    /// Allow-policy over a `start_date` interval.
    pub fn date_range_policy_at(querier: &str, from: &str, to: &str, at: Timestamp) -> Policy {
        Policy::allow(querier, vec![ObjectCondition::between("start_date", from, to)], at)
    }

    /// Five location policies for `querier`, all inserted at `at`.
    ///
    /// Locations are `3100`..`3104`, so each policy is its own guard part.
    pub fn five_location_policies(querier: &str, at: Timestamp) -> Vec<Policy> {
        (0..5)
            .map(|i| policy_at(querier, "location_id", &(3100 + i).to_string(), at))
            .collect()
    }

    /// A fixed instant, for tests that compare timestamps exactly.
    pub fn t0() -> Timestamp {
        chrono::DateTime::from_timestamp(1_514_764_800, 0).unwrap_or_else(Utc::now)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for Sieve-specific validation.

    use super::*;

    /// Assert that a SieveResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &SieveResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a SieveResult is a Builder error.
    #[track_caller]
    pub fn assert_builder_error<T: std::fmt::Debug>(result: &SieveResult<T>) {
        match result {
            Err(SieveError::Builder(_)) => {}
            other => panic!("Expected Builder error, got: {:?}", other),
        }
    }

    /// Assert that a SieveResult is a Cache error.
    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &SieveResult<T>) {
        match result {
            Err(SieveError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    /// Assert that a SieveResult is an UnknownPolicy store error.
    #[track_caller]
    pub fn assert_unknown_policy<T: std::fmt::Debug>(result: &SieveResult<T>, policy_id: PolicyId) {
        match result {
            Err(SieveError::Store(StoreError::UnknownPolicy { policy_id: id, .. })) => {
                assert_eq!(*id, policy_id, "Wrong policy id in UnknownPolicy error");
            }
            other => panic!("Expected UnknownPolicy error for {}, got: {:?}", policy_id, other),
        }
    }
}
