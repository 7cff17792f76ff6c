//! In-memory policy store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sieve_core::{
    Policy, PolicyFilter, PolicyId, PolicyStore, QuerierId, SieveResult, StoreError, Timestamp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct QuerierPolicies {
    policies: Vec<Policy>,
    /// Last timestamp handed out for this querier.
    clock: Option<Timestamp>,
}

impl QuerierPolicies {
    /// Wall-clock time, bumped past the previous stamp if needed.
    fn stamp(&mut self) -> Timestamp {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn observe(&mut self, at: Timestamp) {
        if self.clock.map_or(true, |last| at > last) {
            self.clock = Some(at);
        }
    }
}

/// Policy store backed by a map of per-querier policy lists.
///
/// `inserted_at` is stamped from a per-querier clock that only moves forward,
/// so two commits for the same querier never share a timestamp. A querier the
/// store has never seen yields no result set (`Ok(None)`).
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    queriers: RwLock<HashMap<QuerierId, QuerierPolicies>>,
    retrievals: AtomicU64,
}

impl InMemoryPolicyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert policies keeping their own `inserted_at`.
    ///
    /// Deterministic alternative to [`PolicyStore::insert_policies`] for
    /// replaying recorded workloads and tests.
    pub fn insert_at(&self, policies: Vec<Policy>) -> SieveResult<Vec<Policy>> {
        let mut queriers = self.queriers.write().map_err(|_| StoreError::InsertFailed {
            reason: "policy store lock poisoned".to_string(),
        })?;
        for policy in &policies {
            let entry = queriers.entry(policy.querier.clone()).or_default();
            entry.observe(policy.inserted_at);
            entry.policies.push(policy.clone());
        }
        Ok(policies)
    }

    /// Number of policies held for `querier`.
    pub fn policy_count(&self, querier: &QuerierId) -> usize {
        self.queriers
            .read()
            .map(|queriers| queriers.get(querier).map_or(0, |q| q.policies.len()))
            .unwrap_or(0)
    }

    /// Number of retrievals served so far.
    pub fn retrieval_count(&self) -> u64 {
        self.retrievals.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn retrieve_allow_policies(
        &self,
        querier: &QuerierId,
        filter: &PolicyFilter,
    ) -> SieveResult<Option<Vec<Policy>>> {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
        let queriers = self.queriers.read().map_err(|_| StoreError::RetrievalFailed {
            querier: querier.clone(),
            reason: "policy store lock poisoned".to_string(),
        })?;
        Ok(queriers.get(querier).map(|entry| {
            entry
                .policies
                .iter()
                .filter(|p| p.is_allow() && filter.matches(p))
                .cloned()
                .collect()
        }))
    }

    async fn insert_policies(&self, policies: Vec<Policy>) -> SieveResult<Vec<Policy>> {
        let mut queriers = self.queriers.write().map_err(|_| StoreError::InsertFailed {
            reason: "policy store lock poisoned".to_string(),
        })?;
        let mut stored = Vec::with_capacity(policies.len());
        for mut policy in policies {
            let entry = queriers.entry(policy.querier.clone()).or_default();
            policy.inserted_at = entry.stamp();
            entry.policies.push(policy.clone());
            stored.push(policy);
        }
        tracing::debug!(count = stored.len(), "Inserted policies");
        Ok(stored)
    }

    async fn delete_policies(
        &self,
        querier: &QuerierId,
        policy_ids: &[PolicyId],
    ) -> SieveResult<Timestamp> {
        let mut queriers = self.queriers.write().map_err(|_| StoreError::DeleteFailed {
            querier: querier.clone(),
            reason: "policy store lock poisoned".to_string(),
        })?;
        let entry = queriers
            .get_mut(querier)
            .ok_or_else(|| StoreError::DeleteFailed {
                querier: querier.clone(),
                reason: "querier has no policies".to_string(),
            })?;

        if let Some(missing) = policy_ids
            .iter()
            .find(|id| !entry.policies.iter().any(|p| p.id == **id))
        {
            return Err(StoreError::UnknownPolicy {
                querier: querier.clone(),
                policy_id: *missing,
            }
            .into());
        }

        entry.policies.retain(|p| !policy_ids.contains(&p.id));
        let deleted_at = entry.stamp();
        tracing::debug!(
            querier = %querier,
            count = policy_ids.len(),
            "Deleted policies"
        );
        Ok(deleted_at)
    }
}
