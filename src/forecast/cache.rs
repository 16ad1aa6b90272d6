//! Per-country forecast memoization with single-flight computation.
//!
//! Every key owns a slot guarded by its own mutex and condition variable.
//! The key map lock is only held long enough to find or insert a slot, so a
//! slow fit for one country never blocks requests for another. Concurrent
//! requests for the same key wait on the slot while the first caller
//! computes; they then read its result instead of fitting again.
//!
//! Only successful computations are stored. A failed or panicking
//! computation resets the slot to empty and wakes the waiters, one of which
//! retries.
//!
//! Lock order: map, then slot. Never take the map lock while holding a slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::Forecast;

/// A stored value and when it was computed.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub computed_at: DateTime<Utc>,
    /// Insertion order, used to pick the oldest entry.
    sequence: u64,
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub failures: u64,
    pub evictions: u64,
}

/// Decides which ready entries to drop after an insert.
pub trait EvictionPolicy: Send + Sync {
    /// Number of ready entries allowed to stay, or `None` for no limit.
    fn capacity(&self) -> Option<usize>;
}

/// Keeps everything until it is invalidated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn capacity(&self) -> Option<usize> {
        None
    }
}

/// Keeps at most `n` entries, evicting the oldest computed first.
#[derive(Debug, Clone, Copy)]
pub struct MaxEntries(pub usize);

impl EvictionPolicy for MaxEntries {
    fn capacity(&self) -> Option<usize> {
        Some(self.0)
    }
}

enum SlotState<V> {
    Empty,
    Computing,
    Ready(CacheEntry<V>),
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
    ready: Condvar,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Slot {
            state: Mutex::new(SlotState::Empty),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self) {
        *self.lock() = SlotState::Empty;
        self.ready.notify_all();
    }
}

/// Resets the slot if the computation unwinds before storing a result.
struct InFlight<'a, V> {
    slot: &'a Slot<V>,
    armed: bool,
}

impl<V> Drop for InFlight<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.reset();
        }
    }
}

pub struct ForecastCache<V = Forecast> {
    slots: Mutex<HashMap<String, Arc<Slot<V>>>>,
    policy: Box<dyn EvictionPolicy>,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> ForecastCache<V> {
    pub fn new() -> Self {
        Self::with_policy(Box::new(Unbounded))
    }

    pub fn with_policy(policy: Box<dyn EvictionPolicy>) -> Self {
        ForecastCache {
            slots: Mutex::new(HashMap::new()),
            policy,
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot<V>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &str) -> Arc<Slot<V>> {
        let mut map = self.map();
        Arc::clone(map.entry(key.to_string()).or_insert_with(|| Arc::new(Slot::new())))
    }

    /// Returns the stored value for `key`, computing it with `compute` if
    /// there is none. At most one computation per key runs at a time.
    ///
    /// An `Err` from `compute` is returned to this caller only and nothing is
    /// stored, so the next request tries again.
    pub fn get_or_compute<E, F>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot(key);
        {
            let mut state = slot.lock();
            let mut waited = false;
            loop {
                if let SlotState::Ready(entry) = &*state {
                    if waited {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(entry.value.clone());
                }
                if matches!(*state, SlotState::Computing) {
                    waited = true;
                    state = slot.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
                    continue;
                }
                *state = SlotState::Computing;
                break;
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let mut guard = InFlight {
            slot: &slot,
            armed: true,
        };
        self.computations.fetch_add(1, Ordering::Relaxed);
        let result = compute();
        guard.armed = false;

        match result {
            Ok(value) => {
                let entry = CacheEntry {
                    value: value.clone(),
                    computed_at: Utc::now(),
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                };
                *slot.lock() = SlotState::Ready(entry);
                slot.ready.notify_all();
                self.enforce_policy(key);
                Ok(value)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                slot.reset();
                Err(e)
            }
        }
    }

    /// The stored entry for `key`, without computing or waiting.
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.map().get(key).cloned()?;
        let state = slot.lock();
        match &*state {
            SlotState::Ready(entry) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Drops the stored value for `key`. A computation already in flight is
    /// left alone and its result is still stored. Returns whether a value
    /// was dropped.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut map = self.map();
        let Some(slot) = map.get(key).cloned() else {
            return false;
        };
        let mut state = slot.lock();
        let dropped = match *state {
            SlotState::Computing => return false,
            SlotState::Ready(_) => true,
            SlotState::Empty => false,
        };
        *state = SlotState::Empty;
        drop(state);
        map.remove(key);
        dropped
    }

    /// Drops every stored value. Returns how many were dropped.
    pub fn reset(&self) -> usize {
        let mut map = self.map();
        let mut dropped = 0;
        map.retain(|_, slot| {
            let mut state = slot.lock();
            match *state {
                SlotState::Computing => return true,
                SlotState::Ready(_) => dropped += 1,
                SlotState::Empty => {}
            }
            *state = SlotState::Empty;
            false
        });
        dropped
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.map()
            .values()
            .filter(|slot| matches!(*slot.lock(), SlotState::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evicts the oldest ready entries beyond the policy's capacity. The key
    /// that was just stored is never evicted.
    fn enforce_policy(&self, just_stored: &str) {
        let Some(capacity) = self.policy.capacity() else {
            return;
        };

        let mut map = self.map();
        let mut ready: Vec<(u64, String)> = map
            .iter()
            .filter_map(|(key, slot)| match &*slot.lock() {
                SlotState::Ready(entry) => Some((entry.sequence, key.clone())),
                _ => None,
            })
            .collect();
        if ready.len() <= capacity {
            return;
        }

        ready.sort();
        let excess = ready.len() - capacity;
        for (_, key) in ready.into_iter().filter(|(_, k)| k != just_stored).take(excess) {
            if let Some(slot) = map.remove(&key) {
                *slot.lock() = SlotState::Empty;
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<V: Clone> Default for ForecastCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
