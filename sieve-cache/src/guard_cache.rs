//! Thread-safe CLOCK cache of guard artifacts keyed by querier.

use crate::clock::{ClockCache, PutOutcome};
use sieve_core::{CacheError, GuardArtifact, QuerierId, SieveResult, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const STRUCTURE: &str = "guard cache";

/// Result of writing an artifact into the [`GuardCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardWrite {
    Inserted,
    Updated,
    /// The hand evicted another querier's artifact to make room.
    Evicted { querier: QuerierId },
    /// The stored artifact reflects a newer policy snapshot; nothing written.
    RejectedStale { stored_last_updated: Timestamp },
}

impl GuardWrite {
    pub fn is_applied(&self) -> bool {
        !matches!(self, GuardWrite::RejectedStale { .. })
    }
}

/// Statistics about guard cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an artifact.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Artifacts evicted by the CLOCK hand.
    pub evictions: u64,
    /// Writes refused because they would move `last_updated` backwards.
    pub rejected_writes: u64,
    /// Number of artifacts currently cached.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    rejected_writes: AtomicU64,
}

/// Fixed-capacity guard cache with CLOCK eviction.
///
/// Every operation is a single critical section, so a lookup never observes
/// a half-written entry and an eviction scan never interleaves with another
/// write. The lock is never held across guard construction.
#[derive(Debug)]
pub struct GuardCache {
    inner: Mutex<ClockCache<QuerierId, Arc<GuardArtifact>>>,
    counters: Counters,
}

impl GuardCache {
    /// Create a cache holding at most `capacity` artifacts.
    ///
    /// Fails with [`CacheError::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> SieveResult<Self> {
        let clock = ClockCache::new(capacity).map_err(|_| CacheError::InvalidCapacity {
            structure: STRUCTURE,
            capacity,
        })?;
        Ok(Self {
            inner: Mutex::new(clock),
            counters: Counters::default(),
        })
    }

    fn lock(&self) -> SieveResult<MutexGuard<'_, ClockCache<QuerierId, Arc<GuardArtifact>>>> {
        self.inner
            .lock()
            .map_err(|_| CacheError::LockPoisoned { structure: STRUCTURE }.into())
    }

    /// Look up the artifact for `querier`, setting its reference bit.
    pub fn get(&self, querier: &QuerierId) -> SieveResult<Option<Arc<GuardArtifact>>> {
        let found = self.lock()?.get(querier).cloned();
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    /// Look up without touching the reference bit or the statistics.
    pub fn peek(&self, querier: &QuerierId) -> SieveResult<Option<Arc<GuardArtifact>>> {
        Ok(self.lock()?.peek(querier).cloned())
    }

    /// Store `artifact` under its querier.
    ///
    /// A write whose `last_updated` is older than the stored artifact's is
    /// refused and reported as [`GuardWrite::RejectedStale`].
    pub fn put(&self, artifact: impl Into<Arc<GuardArtifact>>) -> SieveResult<GuardWrite> {
        let artifact = artifact.into();
        let mut clock = self.lock()?;

        if let Some(stored) = clock.peek(&artifact.querier) {
            if stored.last_updated > artifact.last_updated {
                let stored_last_updated = stored.last_updated;
                drop(clock);
                self.counters.rejected_writes.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    querier = %artifact.querier,
                    stored = %stored_last_updated,
                    attempted = %artifact.last_updated,
                    "Refusing guard write older than cached artifact"
                );
                return Ok(GuardWrite::RejectedStale {
                    stored_last_updated,
                });
            }
        }

        let write = match clock.put(artifact.querier.clone(), artifact) {
            PutOutcome::Inserted => GuardWrite::Inserted,
            PutOutcome::Updated => GuardWrite::Updated,
            PutOutcome::Evicted { key, .. } => GuardWrite::Evicted { querier: key },
        };
        drop(clock);

        if let GuardWrite::Evicted { querier } = &write {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(evicted = %querier, "Guard evicted by clock hand");
        }
        Ok(write)
    }

    /// Set the reference bit of `querier`'s artifact without altering it.
    pub fn mark_accessed(&self, querier: &QuerierId) -> SieveResult<bool> {
        Ok(self.lock()?.mark_accessed(querier))
    }

    /// Reference bit of `querier`'s slot, if cached.
    pub fn is_referenced(&self, querier: &QuerierId) -> SieveResult<Option<bool>> {
        Ok(self.lock()?.is_referenced(querier))
    }

    pub fn len(&self) -> SieveResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> SieveResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn capacity(&self) -> SieveResult<usize> {
        Ok(self.lock()?.capacity())
    }

    /// Get cache statistics.
    pub fn stats(&self) -> SieveResult<CacheStats> {
        let entry_count = self.lock()?.len() as u64;
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            rejected_writes: self.counters.rejected_writes.load(Ordering::Relaxed),
            entry_count,
        })
    }
}
