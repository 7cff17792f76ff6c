//! Latest policy-change timestamp per querier.
//!
//! The directory is the staleness signal: a cached guard is stale exactly
//! when the directory holds a timestamp strictly after the guard's
//! `last_updated`. It is bounded; when full, the slot under a round-robin
//! cursor is recycled and the cursor advances, so successive new keys rotate
//! through every slot.

use sieve_core::{CacheError, QuerierId, SieveResult, Timestamp};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

const STRUCTURE: &str = "timestamp directory";

/// Key plus the most recent policy change observed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRecord {
    pub querier: QuerierId,
    pub timestamp: Timestamp,
}

/// Result of [`TimestampDirectory::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryWrite {
    Inserted,
    /// Existing record moved forward.
    Advanced,
    /// Existing record already newer or equal; left as is.
    Unchanged,
    /// The directory was full; `querier`'s record was recycled.
    Evicted { querier: QuerierId },
}

#[derive(Debug)]
struct DirectoryState {
    records: Vec<TimestampRecord>,
    index: HashMap<QuerierId, usize>,
    cursor: usize,
    capacity: usize,
}

/// Fixed-capacity map from querier to last policy-change time.
#[derive(Debug)]
pub struct TimestampDirectory {
    state: Mutex<DirectoryState>,
}

impl TimestampDirectory {
    pub fn new(capacity: usize) -> SieveResult<Self> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity {
                structure: STRUCTURE,
                capacity,
            }
            .into());
        }
        Ok(Self {
            state: Mutex::new(DirectoryState {
                records: Vec::with_capacity(capacity),
                index: HashMap::with_capacity(capacity),
                cursor: 0,
                capacity,
            }),
        })
    }

    fn lock(&self) -> SieveResult<MutexGuard<'_, DirectoryState>> {
        self.state
            .lock()
            .map_err(|_| CacheError::LockPoisoned { structure: STRUCTURE }.into())
    }

    /// Record a policy change for `querier` at `timestamp`.
    ///
    /// The stored value never moves backwards.
    pub fn put(&self, querier: QuerierId, timestamp: Timestamp) -> SieveResult<DirectoryWrite> {
        let mut state = self.lock()?;

        if let Some(&idx) = state.index.get(&querier) {
            let record = &mut state.records[idx];
            if timestamp > record.timestamp {
                record.timestamp = timestamp;
                return Ok(DirectoryWrite::Advanced);
            }
            return Ok(DirectoryWrite::Unchanged);
        }

        if state.records.len() < state.capacity {
            let idx = state.records.len();
            state.index.insert(querier.clone(), idx);
            state.records.push(TimestampRecord { querier, timestamp });
            return Ok(DirectoryWrite::Inserted);
        }

        let idx = state.cursor;
        state.cursor = (state.cursor + 1) % state.capacity;
        let evicted = std::mem::replace(
            &mut state.records[idx],
            TimestampRecord {
                querier: querier.clone(),
                timestamp,
            },
        );
        state.index.remove(&evicted.querier);
        state.index.insert(querier, idx);
        tracing::debug!(
            evicted = %evicted.querier,
            slot = idx,
            "Timestamp directory recycled slot"
        );
        Ok(DirectoryWrite::Evicted {
            querier: evicted.querier,
        })
    }

    /// Latest known policy-change time for `querier`.
    pub fn get(&self, querier: &QuerierId) -> SieveResult<Option<Timestamp>> {
        let state = self.lock()?;
        Ok(state
            .index
            .get(querier)
            .map(|&idx| state.records[idx].timestamp))
    }

    pub fn len(&self) -> SieveResult<usize> {
        Ok(self.lock()?.records.len())
    }

    pub fn is_empty(&self) -> SieveResult<bool> {
        Ok(self.lock()?.records.is_empty())
    }

    pub fn capacity(&self) -> SieveResult<usize> {
        Ok(self.lock()?.capacity)
    }

    /// Records in slot order.
    pub fn records(&self) -> SieveResult<Vec<TimestampRecord>> {
        Ok(self.lock()?.records.clone())
    }
}
