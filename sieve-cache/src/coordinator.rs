//! Access path: lookup, staleness check, merge-or-rebuild, write-back.
//!
//! Per access the coordinator consults the guard cache, then the timestamp
//! directory. An artifact is stale exactly when the directory holds a
//! policy-change time strictly after the artifact's `last_updated`; the cost
//! model then picks between an incremental merge and a rebuild.
//!
//! The decide, build and write-back steps for one querier run under that
//! querier's async lock, so concurrent stale detections for the same querier
//! rebuild once; the others then find a fresh artifact. The cache-wide locks
//! are only held inside individual cache operations.
//!
//! The directory is always read before policies are retrieved. A commit that
//! lands between the two reads is then either part of the retrieved set or
//! stamps the directory after the artifact's `last_updated`, so it is never
//! lost.

use crate::cost_model::{MergeCostModel, MergeDecision};
use crate::guard_cache::{CacheStats, GuardCache, GuardWrite};
use crate::report::TracingReportSink;
use crate::timestamp_directory::TimestampDirectory;
use chrono::Utc;
use dashmap::DashMap;
use sieve_core::{
    AccessOutcome, AccessReport, AccessTimings, GuardArtifact, GuardBuilder, GuardCacheConfig,
    Policy, PolicyFilter, PolicyId, PolicyStore, Query, QuerierId, QueryExecutor, ReportSink,
    SieveResult, Timestamp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Outcome of one guarded access.
#[derive(Debug, Clone)]
pub struct AccessResult<T> {
    pub outcome: AccessOutcome,
    /// Artifact the query ran against; `None` when the querier has no policies.
    pub artifact: Option<Arc<GuardArtifact>>,
    /// What the query executor returned.
    pub output: T,
    pub report: AccessReport,
}

/// Per-outcome access counts plus guard cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub misses: u64,
    pub hits: u64,
    pub soft_hits: u64,
    pub regenerations: u64,
    pub cache: CacheStats,
    pub directory_entries: u64,
}

impl CoordinatorStats {
    pub fn total_accesses(&self) -> u64 {
        self.misses + self.hits + self.soft_hits + self.regenerations
    }
}

#[derive(Debug, Default)]
struct OutcomeCounters {
    misses: AtomicU64,
    hits: AtomicU64,
    soft_hits: AtomicU64,
    regenerations: AtomicU64,
}

impl OutcomeCounters {
    fn record(&self, outcome: AccessOutcome) {
        let counter = match outcome {
            AccessOutcome::Miss => &self.misses,
            AccessOutcome::Hit => &self.hits,
            AccessOutcome::SoftHit => &self.soft_hits,
            AccessOutcome::Regenerate => &self.regenerations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Guard resolved for one access, before execution.
struct Resolved {
    outcome: AccessOutcome,
    artifact: Option<Arc<GuardArtifact>>,
    policy_count: usize,
    policy_retrieval: Duration,
    guard_generation: Duration,
}

impl Resolved {
    fn hit(artifact: Arc<GuardArtifact>) -> Self {
        Self {
            outcome: AccessOutcome::Hit,
            artifact: Some(artifact),
            policy_count: 0,
            policy_retrieval: Duration::ZERO,
            guard_generation: Duration::ZERO,
        }
    }
}

/// Orchestrates the guard cache, the timestamp directory and the cost model
/// over a policy store, a guard builder and a query executor.
pub struct CacheCoordinator<S, B, E> {
    store: S,
    builder: B,
    executor: E,
    guards: GuardCache,
    directory: TimestampDirectory,
    cost_model: MergeCostModel,
    sink: Arc<dyn ReportSink>,
    querier_locks: DashMap<QuerierId, Arc<AsyncMutex<()>>>,
    counters: OutcomeCounters,
}

impl<S, B, E> CacheCoordinator<S, B, E>
where
    S: PolicyStore,
    B: GuardBuilder,
    E: QueryExecutor,
{
    /// Create a coordinator with empty caches.
    ///
    /// Reports go to a [`TracingReportSink`] until replaced with
    /// [`with_report_sink`](Self::with_report_sink).
    pub fn new(config: &GuardCacheConfig, store: S, builder: B, executor: E) -> SieveResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            builder,
            executor,
            guards: GuardCache::new(config.guard_capacity)?,
            directory: TimestampDirectory::new(config.timestamp_capacity)?,
            cost_model: MergeCostModel::new(config.max_chained_merges),
            sink: Arc::new(TracingReportSink),
            querier_locks: DashMap::new(),
            counters: OutcomeCounters::default(),
        })
    }

    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the cost model, e.g. to register strategies for more attributes.
    pub fn with_cost_model(mut self, cost_model: MergeCostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn guard_cache(&self) -> &GuardCache {
        &self.guards
    }

    pub fn timestamp_directory(&self) -> &TimestampDirectory {
        &self.directory
    }

    /// Serve `query` for `querier` under an up-to-date guard.
    ///
    /// Errors from the store, the builder or the executor abort the access;
    /// nothing is written to the cache when guard construction fails, and no
    /// report is emitted for an aborted access.
    pub async fn access(
        &self,
        querier: &QuerierId,
        query: &Query,
    ) -> SieveResult<AccessResult<E::Output>> {
        let lock = self.querier_lock(querier);
        let resolved = {
            let _held = lock.lock().await;
            self.resolve(querier).await
        };
        drop(lock);
        self.release_querier_lock(querier);
        let resolved = resolved?;

        let started = Instant::now();
        let output = self
            .executor
            .execute(querier, query, resolved.artifact.as_deref())
            .await?;
        let execution = started.elapsed();

        let report = AccessReport {
            querier: querier.clone(),
            outcome: resolved.outcome,
            policy_count: resolved.policy_count,
            guard_parts: resolved.artifact.as_ref().map_or(0, |a| a.part_count()),
            timings: AccessTimings {
                policy_retrieval: resolved.policy_retrieval,
                guard_generation: resolved.guard_generation,
                execution,
            },
            recorded_at: Utc::now(),
        };
        self.counters.record(resolved.outcome);
        self.sink.record(&report);

        Ok(AccessResult {
            outcome: resolved.outcome,
            artifact: resolved.artifact,
            output,
            report,
        })
    }

    fn querier_lock(&self, querier: &QuerierId) -> Arc<AsyncMutex<()>> {
        self.querier_locks
            .entry(querier.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the querier's lock entry once nobody else holds or waits on it.
    fn release_querier_lock(&self, querier: &QuerierId) {
        self.querier_locks
            .remove_if(querier, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn resolve(&self, querier: &QuerierId) -> SieveResult<Resolved> {
        let Some(cached) = self.guards.get(querier)? else {
            return self.resolve_miss(querier).await;
        };

        match self.directory.get(querier)? {
            Some(changed_at) if changed_at > cached.last_updated => {
                self.resolve_stale(querier, cached, changed_at).await
            }
            _ => {
                tracing::debug!(querier = %querier, "Guard hit");
                Ok(Resolved::hit(cached))
            }
        }
    }

    async fn resolve_miss(&self, querier: &QuerierId) -> SieveResult<Resolved> {
        let observed = self.directory.get(querier)?;

        let started = Instant::now();
        let policies = self.retrieve(querier, PolicyFilter::all()).await?;
        let policy_retrieval = started.elapsed();

        if policies.is_empty() {
            tracing::debug!(querier = %querier, "No allow-policies; serving without guard");
            return Ok(Resolved {
                outcome: AccessOutcome::Miss,
                artifact: None,
                policy_count: 0,
                policy_retrieval,
                guard_generation: Duration::ZERO,
            });
        }

        let started = Instant::now();
        let artifact = self.rebuild(querier, &policies, observed).await?;
        let guard_generation = started.elapsed();

        tracing::debug!(
            querier = %querier,
            policies = policies.len(),
            parts = artifact.part_count(),
            "Guard miss; built guard"
        );
        Ok(Resolved {
            outcome: AccessOutcome::Miss,
            artifact: Some(self.write_back(artifact)?),
            policy_count: policies.len(),
            policy_retrieval,
            guard_generation,
        })
    }

    async fn resolve_stale(
        &self,
        querier: &QuerierId,
        cached: Arc<GuardArtifact>,
        observed: Timestamp,
    ) -> SieveResult<Resolved> {
        let started = Instant::now();
        let new_policies = self
            .retrieve(querier, PolicyFilter::inserted_after(cached.last_updated))
            .await?;
        let mut policy_retrieval = started.elapsed();

        let started = Instant::now();
        let assessment = self
            .cost_model
            .assess(&cached, &new_policies, &self.builder)?;
        let mut guard_generation = started.elapsed();

        tracing::debug!(
            querier = %querier,
            mergeable = assessment.mergeable_count,
            total_new = assessment.total_new,
            update_count = assessment.update_count,
            decision = ?assessment.decision,
            "Stale guard"
        );

        let (outcome, artifact, policy_count) = match assessment.decision {
            MergeDecision::Regenerate(reason) => {
                let started = Instant::now();
                let policies = self.retrieve(querier, PolicyFilter::all()).await?;
                policy_retrieval += started.elapsed();

                let started = Instant::now();
                let artifact = if policies.is_empty() {
                    // Everything was revoked: an empty guard admits nothing.
                    GuardArtifact::new(querier.clone(), Vec::new(), observed)
                } else {
                    self.rebuild(querier, &policies, Some(observed)).await?
                };
                guard_generation += started.elapsed();

                tracing::info!(
                    querier = %querier,
                    reason = ?reason,
                    policies = policies.len(),
                    parts = artifact.part_count(),
                    "Regenerated guard"
                );
                (AccessOutcome::Regenerate, artifact, policies.len())
            }
            MergeDecision::Merge => {
                let snapshot = GuardArtifact::snapshot_of(&new_policies)
                    .map_or(observed, |newest| newest.max(observed));

                let started = Instant::now();
                let merged = self
                    .cost_model
                    .merge(querier, &cached, &new_policies, snapshot, &self.builder)
                    .await?;
                guard_generation += started.elapsed();

                tracing::debug!(
                    querier = %querier,
                    new_policies = new_policies.len(),
                    parts = merged.part_count(),
                    update_count = merged.update_count,
                    "Merged guard"
                );
                (AccessOutcome::SoftHit, merged, new_policies.len())
            }
        };

        Ok(Resolved {
            outcome,
            artifact: Some(self.write_back(artifact)?),
            policy_count,
            policy_retrieval,
            guard_generation,
        })
    }

    /// Allow-policies matching `filter`; a missing result set is empty.
    async fn retrieve(&self, querier: &QuerierId, filter: PolicyFilter) -> SieveResult<Vec<Policy>> {
        Ok(self
            .store
            .retrieve_allow_policies(querier, &filter)
            .await?
            .unwrap_or_default())
    }

    /// Full build, stamped with the newest policy or observed change time.
    async fn rebuild(
        &self,
        querier: &QuerierId,
        policies: &[Policy],
        observed: Option<Timestamp>,
    ) -> SieveResult<GuardArtifact> {
        let mut artifact = self.builder.build(querier, policies).await?;
        if let Some(stamp) = GuardArtifact::snapshot_of(policies).into_iter().chain(observed).max() {
            artifact.last_updated = stamp;
        }
        artifact.update_count = 0;
        Ok(artifact)
    }

    /// Store `artifact`; if a newer one is already cached, serve that instead.
    fn write_back(&self, artifact: GuardArtifact) -> SieveResult<Arc<GuardArtifact>> {
        let artifact = Arc::new(artifact);
        match self.guards.put(Arc::clone(&artifact))? {
            GuardWrite::RejectedStale { .. } => {
                Ok(self.guards.peek(&artifact.querier)?.unwrap_or(artifact))
            }
            _ => Ok(artifact),
        }
    }

    /// Commit policies and mark each affected querier as changed.
    pub async fn commit_policies(&self, policies: Vec<Policy>) -> SieveResult<Vec<Policy>> {
        let stored = self.store.insert_policies(policies).await?;

        let mut newest: HashMap<&QuerierId, Timestamp> = HashMap::new();
        for policy in &stored {
            newest
                .entry(&policy.querier)
                .and_modify(|ts| *ts = (*ts).max(policy.inserted_at))
                .or_insert(policy.inserted_at);
        }
        for (querier, changed_at) in newest {
            self.directory.put(querier.clone(), changed_at)?;
            tracing::info!(querier = %querier, changed_at = %changed_at, "Committed policies");
        }
        Ok(stored)
    }

    /// Delete policies of `querier` and mark it as changed.
    ///
    /// The next access finds no new policies and therefore rebuilds.
    pub async fn revoke_policies(
        &self,
        querier: &QuerierId,
        policy_ids: &[PolicyId],
    ) -> SieveResult<Timestamp> {
        let revoked_at = self.store.delete_policies(querier, policy_ids).await?;
        self.directory.put(querier.clone(), revoked_at)?;
        tracing::info!(
            querier = %querier,
            count = policy_ids.len(),
            revoked_at = %revoked_at,
            "Revoked policies"
        );
        Ok(revoked_at)
    }

    pub fn stats(&self) -> SieveResult<CoordinatorStats> {
        Ok(CoordinatorStats {
            misses: self.counters.misses.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            soft_hits: self.counters.soft_hits.load(Ordering::Relaxed),
            regenerations: self.counters.regenerations.load(Ordering::Relaxed),
            cache: self.guards.stats()?,
            directory_entries: self.directory.len()? as u64,
        })
    }
}
