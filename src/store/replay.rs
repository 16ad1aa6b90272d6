/// Development mode: replay a CSV export in place of the warehouse
///
/// When the warehouse is unreachable or not provisioned, point
/// `[dev] fixture_csv` at an export of the JHU table and the service runs
/// against it unchanged. Expected header:
///
///   country_region,province_state,date,case_type,cases
///
/// Empty `province_state` / `cases` fields are read as missing values.

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use super::{MemoryStore, TimeSeriesStore};
use crate::logging::{self, DataSource};
use crate::model::{CaseType, FetchQuery, RawObservation, StoreError};

#[derive(Debug, Deserialize)]
struct CsvRow {
    country_region: String,
    province_state: Option<String>,
    date: NaiveDate,
    case_type: String,
    cases: Option<i64>,
}

/// A read-only store loaded once from a CSV file.
#[derive(Debug)]
pub struct CsvStore {
    source: String,
    inner: MemoryStore,
}

impl CsvStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let store = Self::from_reader(reader, &path.display().to_string())?;
        logging::info(
            DataSource::Warehouse,
            None,
            &format!("Loaded {} rows from {}", store.inner.len(), store.source),
        );
        Ok(store)
    }

    /// Parses CSV text directly; used by tests and embedded fixtures.
    pub fn from_csv_str(text: &str) -> Result<Self, StoreError> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        Self::from_reader(reader, "inline")
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>, source: &str) -> Result<Self, StoreError> {
        let mut rows = Vec::new();
        let mut untracked = 0usize;

        for (i, record) in reader.deserialize::<CsvRow>().enumerate() {
            // Line numbers are 1-based and the header is line 1.
            let row = record.map_err(|e| StoreError::Query(format!("Parse error at line {}: {}", i + 2, e)))?;
            let Some(case_type) = CaseType::parse(&row.case_type) else {
                untracked += 1;
                continue;
            };
            rows.push(RawObservation {
                country: row.country_region,
                province: row.province_state.filter(|p| !p.is_empty()),
                date: row.date,
                case_type,
                cumulative_count: row.cases,
            });
        }

        if untracked > 0 {
            logging::debug(
                DataSource::Warehouse,
                None,
                &format!("Skipped {} rows with untracked case types in {}", untracked, source),
            );
        }

        Ok(CsvStore {
            source: source.to_string(),
            inner: MemoryStore::new(rows),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl TimeSeriesStore for CsvStore {
    fn name(&self) -> &str {
        "csv"
    }

    fn list_countries(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_countries()
    }

    fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawObservation>, StoreError> {
        self.inner.fetch(query)
    }
}
