//! In-process time-series store.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use super::{TimeSeriesStore, select_rows};
use crate::model::{FetchQuery, RawObservation, StoreError};

/// Holds records in memory. Rows can be appended after construction, and
/// the store can be switched offline to exercise upstream-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<RawObservation>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn new(rows: Vec<RawObservation>) -> Self {
        MemoryStore {
            rows: RwLock::new(rows),
            offline: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn append(&self, more: impl IntoIterator<Item = RawObservation>) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(more);
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// While offline every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl TimeSeriesStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn list_countries(&self) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let countries: BTreeSet<&str> = rows.iter().map(|r| r.country.as_str()).collect();
        Ok(countries.into_iter().map(String::from).collect())
    }

    fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawObservation>, StoreError> {
        self.check_online()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(select_rows(&rows, query))
    }
}
