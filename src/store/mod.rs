//! Read-only access to the daily time-series warehouse.
//!
//! Submodules:
//! - `warehouse`: the production Postgres warehouse, one reusable connection.
//! - `memory`: an in-process store for tests and embedding.
//! - `replay`: replays a CSV export when no warehouse is available.

pub mod memory;
pub mod replay;
pub mod warehouse;

pub use self::memory::MemoryStore;
pub use self::replay::CsvStore;
pub use self::warehouse::PostgresStore;

use crate::model::{CaseType, FetchQuery, RawObservation, StoreError};

/// A queryable source of daily cumulative records.
///
/// An entity with no rows is reported as an empty `Vec`, never as an error;
/// callers decide whether empty means "not found". `Err` is reserved for
/// failures to reach or query the store.
pub trait TimeSeriesStore: Send + Sync {
    /// Short label used in logs and verification reports.
    fn name(&self) -> &str;

    /// Distinct country names, ascending.
    fn list_countries(&self) -> Result<Vec<String>, StoreError>;

    /// Rows for one country (optionally one province), ordered by date.
    fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawObservation>, StoreError>;

    /// Country-level rows (no province) of one case type across all countries,
    /// grouped by country and ordered by date within each country.
    fn fetch_by_case_type(&self, case_type: CaseType) -> Result<Vec<RawObservation>, StoreError> {
        let mut all = Vec::new();
        for country in self.list_countries()? {
            let rows = self.fetch(&FetchQuery::country(&country))?;
            all.extend(
                rows.into_iter()
                    .filter(|r| r.case_type == case_type && r.province.is_none()),
            );
        }
        Ok(all)
    }
}

/// Sorts by date and applies the query's province filter and row limit.
/// Shared by the in-process stores.
pub(crate) fn select_rows(rows: &[RawObservation], query: &FetchQuery) -> Vec<RawObservation> {
    let mut selected: Vec<RawObservation> = rows
        .iter()
        .filter(|r| r.country == query.country)
        .filter(|r| match &query.province {
            Some(p) => r.province.as_deref() == Some(p.as_str()),
            None => true,
        })
        .cloned()
        .collect();
    selected.sort_by_key(|r| r.date);
    if let Some(limit) = query.limit {
        selected.truncate(limit);
    }
    selected
}
