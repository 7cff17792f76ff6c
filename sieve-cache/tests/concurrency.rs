//! Concurrent accesses against one coordinator.

use chrono::Duration as ChronoDuration;
use sieve_cache::{CacheCoordinator, GroupingGuardBuilder, InMemoryPolicyStore};
use sieve_core::{AccessOutcome, GuardCacheConfig, Query, QuerierId};
use sieve_test_utils::fixtures::{five_location_policies, policy_at, t0};
use sieve_test_utils::{CountingGuardBuilder, RecordingQueryExecutor, SlowGuardBuilder};
use std::sync::Arc;
use std::time::Duration;

type Coordinator = CacheCoordinator<
    InMemoryPolicyStore,
    SlowGuardBuilder<CountingGuardBuilder<GroupingGuardBuilder>>,
    RecordingQueryExecutor,
>;

fn coordinator() -> Arc<Coordinator> {
    Arc::new(
        CacheCoordinator::new(
            &GuardCacheConfig::default(),
            InMemoryPolicyStore::new(),
            SlowGuardBuilder::new(
                CountingGuardBuilder::new(GroupingGuardBuilder::new()),
                Duration::from_millis(50),
            ),
            RecordingQueryExecutor::new(),
        )
        .unwrap(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stale_accesses_regenerate_once() {
    let coordinator = coordinator();
    let q = QuerierId::new("u1");
    coordinator
        .store()
        .insert_at(five_location_policies("u1", t0()))
        .unwrap();
    coordinator.access(&q, &Query::new("SELECT 1")).await.unwrap();
    assert_eq!(coordinator.builder().inner().builds(), 1);

    // Already covered by the cached guard, so the cost model regenerates.
    let t1 = t0() + ChronoDuration::seconds(1);
    coordinator
        .store()
        .insert_at(vec![policy_at("u1", "location_id", "3100", t1)])
        .unwrap();
    coordinator.timestamp_directory().put(q.clone(), t1).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let q = q.clone();
            tokio::spawn(async move { coordinator.access(&q, &Query::new("SELECT 1")).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap().outcome);
    }

    let regenerations = outcomes
        .iter()
        .filter(|o| **o == AccessOutcome::Regenerate)
        .count();
    let hits = outcomes.iter().filter(|o| **o == AccessOutcome::Hit).count();
    assert_eq!(regenerations, 1);
    assert_eq!(hits, 7);
    assert_eq!(coordinator.builder().inner().builds(), 2);

    let cached = coordinator.guard_cache().peek(&q).unwrap().unwrap();
    assert_eq!(cached.last_updated, t1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_queriers_build_independently() {
    let coordinator = coordinator();
    let queriers: Vec<QuerierId> = (0..6).map(|i| QuerierId::new(format!("u{i}"))).collect();
    for q in &queriers {
        coordinator
            .store()
            .insert_at(vec![policy_at(q.as_str(), "user_id", q.as_str(), t0())])
            .unwrap();
    }

    let handles: Vec<_> = queriers
        .iter()
        .cloned()
        .map(|q| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.access(&q, &Query::new("SELECT 1")).await })
        })
        .collect();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.outcome, AccessOutcome::Miss);
        assert_eq!(result.artifact.unwrap().part_count(), 1);
    }

    assert_eq!(coordinator.builder().inner().builds(), 6);
    assert_eq!(coordinator.guard_cache().len().unwrap(), 6);
    assert_eq!(coordinator.stats().unwrap().misses, 6);
}
