//! CLOCK (second-chance) replacement over a fixed array of slots.
//!
//! The imaginary circular list is a `Vec` of slots in which the `hand` moves.
//! For constant-time lookups a `HashMap` maps each key to its slot.
//!
//! `get` doesn't modify the structure in any other way except setting the
//! reference bit of the slot in question. That way we know a re-access
//! occurred since the hand last passed it.
//!
//! When `put` needs a slot and the ring is full, it moves the hand: a
//! referenced slot has its bit cleared and is skipped, the first unreferenced
//! slot is overwritten. One full revolution clears every bit, so a victim is
//! always found within `capacity + 1` inspections.

use sieve_core::CacheError;
use std::collections::HashMap;
use std::hash::Hash;
use std::mem;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    referenced: bool,
}

/// What a [`ClockCache::put`] did with the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome<K, V> {
    /// Appended into a free slot.
    Inserted,
    /// The key already had a slot; its value was overwritten.
    Updated,
    /// The ring was full and the hand evicted `key`.
    Evicted { key: K, value: V },
}

/// # CLOCK Cache
///
/// A key-value store for a bounded number of records, using the CLOCK
/// eviction logic. Capacity is fixed at construction and must be positive.
///
/// ```
/// use sieve_cache::ClockCache;
///
/// let mut cache = ClockCache::new(2).unwrap();
/// cache.put("a", 1);
/// cache.put("b", 2);
/// assert_eq!(cache.get(&"a"), Some(&1));
///
/// // "a" was re-accessed, so "b" is the victim.
/// cache.put("c", 3);
/// assert!(cache.contains(&"a"));
/// assert!(!cache.contains(&"b"));
/// ```
///
/// Reference bits: a record appended into a free slot starts unreferenced,
/// exactly as if the hand had just passed it. A record that replaces a victim
/// and an overwritten record start referenced, as does every record touched
/// by `get` or `mark_accessed`.
#[derive(Debug)]
pub struct ClockCache<K, V> {
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    hand: usize,
    capacity: usize,
    // Reference bits inspected by the most recent `put`.
    last_scan: usize,
}

impl<K, V> ClockCache<K, V>
where
    K: Clone + Eq + Hash,
{
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity {
                structure: "clock cache",
                capacity,
            });
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            hand: 0,
            capacity,
            last_scan: 0,
        })
    }

    /// Returns a value reference for the given key and sets its reference bit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        let slot = &mut self.slots[idx];
        slot.referenced = true;
        Some(&slot.value)
    }

    /// Returns a value reference without touching the reference bit.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.slots[idx].value)
    }

    /// Sets the reference bit only. Returns false if the key is absent.
    pub fn mark_accessed(&mut self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&idx) => {
                self.slots[idx].referenced = true;
                true
            }
            None => false,
        }
    }

    /// Submits this key-value pair for caching.
    pub fn put(&mut self, key: K, value: V) -> PutOutcome<K, V> {
        self.last_scan = 0;

        if let Some(&idx) = self.index.get(&key) {
            let slot = &mut self.slots[idx];
            slot.value = value;
            slot.referenced = true;
            return PutOutcome::Updated;
        }

        if self.slots.len() < self.capacity {
            self.index.insert(key.clone(), self.slots.len());
            self.slots.push(Slot {
                key,
                value,
                referenced: false,
            });
            return PutOutcome::Inserted;
        }

        loop {
            self.last_scan += 1;
            let idx = self.hand;
            self.hand = (self.hand + 1) % self.capacity;

            let slot = &mut self.slots[idx];
            if slot.referenced {
                slot.referenced = false;
                continue;
            }

            let evicted_key = mem::replace(&mut slot.key, key.clone());
            let evicted_value = mem::replace(&mut slot.value, value);
            slot.referenced = true;
            self.index.remove(&evicted_key);
            self.index.insert(key, idx);
            return PutOutcome::Evicted {
                key: evicted_key,
                value: evicted_value,
            };
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Reference bit of `key`, if present.
    pub fn is_referenced(&self, key: &K) -> Option<bool> {
        self.index.get(key).map(|&idx| self.slots[idx].referenced)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot the next eviction scan starts from.
    pub fn hand(&self) -> usize {
        self.hand
    }

    /// Reference bits inspected by the most recent `put` (0 unless it evicted).
    pub fn last_scan_len(&self) -> usize {
        self.last_scan
    }

    /// Keys and reference bits in slot order.
    pub fn slots(&self) -> impl Iterator<Item = (&K, bool)> + '_ {
        self.slots.iter().map(|slot| (&slot.key, slot.referenced))
    }
}
