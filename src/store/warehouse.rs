/// Postgres-backed time-series warehouse
///
/// Reads the JHU daily records table. Connections are opened lazily on first
/// use and reused. Per-country queries share one connection, so they run one
/// at a time; the full-table scan behind peak weeks gets its own connection
/// and never holds up country lookups. When a connection drops, the failing
/// call reports `StoreError::Unavailable` and the next call opens a fresh
/// one, so a warehouse outage never takes the service down.
///
/// `postgres::Client` drives a private runtime and cannot be dropped on a
/// tokio worker thread. Dropping the store from async context hands open
/// connections to a plain thread first.

use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;
use postgres::{Client, NoTls, Row};

use super::TimeSeriesStore;
use crate::logging::{self, DataSource};
use crate::model::{CaseType, FetchQuery, RawObservation, StoreError};

pub struct PostgresStore {
    url: String,
    table: String,
    client: Mutex<Option<Client>>,
    scan: Mutex<Option<Client>>,
}

impl PostgresStore {
    /// Creates the store without connecting. `table` may be schema-qualified.
    pub fn new(url: &str, table: &str) -> Result<Self, StoreError> {
        if !is_valid_table_name(table) {
            return Err(StoreError::Query(format!("invalid table name '{}'", table)));
        }
        Ok(PostgresStore {
            url: url.to_string(),
            table: table.to_string(),
            client: Mutex::new(None),
            scan: Mutex::new(None),
        })
    }

    /// Whether a live connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// Runs `op` against the connection in `slot`, connecting first if needed.
    fn with_client<T>(
        &self,
        slot: &Mutex<Option<Client>>,
        operation: &str,
        op: impl FnOnce(&mut Client) -> Result<T, postgres::Error>,
    ) -> Result<T, StoreError> {
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if guard.as_ref().is_none_or(|c| c.is_closed()) {
            *guard = None;
            let client = Client::connect(&self.url, NoTls).map_err(|e| {
                let err = StoreError::Unavailable(e.to_string());
                logging::log_upstream_failure(DataSource::Warehouse, None, "connect", &err);
                err
            })?;
            logging::info(DataSource::Warehouse, None, "Connected to warehouse");
            *guard = Some(client);
        }

        let result = match guard.as_mut() {
            Some(client) => op(client),
            None => return Err(StoreError::Unavailable("no connection".to_string())),
        };

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let lost = e.is_closed() || guard.as_ref().is_none_or(|c| c.is_closed());
                let err = if lost {
                    // Drop the dead connection; the next call reconnects.
                    *guard = None;
                    StoreError::Unavailable(e.to_string())
                } else {
                    StoreError::Query(e.to_string())
                };
                logging::log_upstream_failure(DataSource::Warehouse, None, operation, &err);
                Err(err)
            }
        }
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        let open: Vec<Client> = [&mut self.client, &mut self.scan]
            .into_iter()
            .filter_map(|slot| slot.get_mut().unwrap_or_else(PoisonError::into_inner).take())
            .collect();
        if open.is_empty() || tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        if std::thread::spawn(move || drop(open)).join().is_err() {
            logging::warn(DataSource::Warehouse, None, "Warehouse connection panicked while closing");
        }
    }
}

impl TimeSeriesStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    fn list_countries(&self) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT DISTINCT country_region FROM {} ORDER BY country_region",
            self.table
        );
        self.with_client(&self.client, "list_countries", |client| {
            client
                .query(sql.as_str(), &[])?
                .iter()
                .map(|row| row.try_get::<_, String>(0))
                .collect()
        })
    }

    fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawObservation>, StoreError> {
        let sql = format!(
            "SELECT country_region, province_state, date, case_type, cases
             FROM {}
             WHERE country_region = $1
               AND ($2::TEXT IS NULL OR province_state = $2)
             ORDER BY date
             LIMIT $3",
            self.table
        );
        let limit: Option<i64> = query.limit.map(|l| l as i64);

        let rows = self.with_client(&self.client, "fetch", |client| {
            client.query(sql.as_str(), &[&query.country, &query.province, &limit])
        })?;
        decode_rows(&rows, Some(&query.country))
    }

    fn fetch_by_case_type(&self, case_type: CaseType) -> Result<Vec<RawObservation>, StoreError> {
        let sql = format!(
            "SELECT country_region, province_state, date, case_type, cases
             FROM {}
             WHERE case_type = $1 AND province_state IS NULL
             ORDER BY country_region, date",
            self.table
        );
        let rows = self.with_client(&self.scan, "fetch_by_case_type", |client| {
            client.query(sql.as_str(), &[&case_type.as_str()])
        })?;
        decode_rows(&rows, None)
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_rows(rows: &[Row], country: Option<&str>) -> Result<Vec<RawObservation>, StoreError> {
    let mut observations = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;

    for row in rows {
        let decoded = decode_row(row).map_err(|e| StoreError::Query(format!("Parse error: {}", e)))?;
        match decoded {
            Some(obs) => observations.push(obs),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        logging::debug(
            DataSource::Warehouse,
            country,
            &format!("Skipped {} rows with untracked case types", skipped),
        );
    }
    Ok(observations)
}

/// Returns `Ok(None)` for rows whose case type this service does not track.
fn decode_row(row: &Row) -> Result<Option<RawObservation>, postgres::Error> {
    let raw_case_type: String = row.try_get(3)?;
    let Some(case_type) = CaseType::parse(&raw_case_type) else {
        return Ok(None);
    };
    Ok(Some(RawObservation {
        country: row.try_get(0)?,
        province: row.try_get(1)?,
        date: row.try_get::<_, NaiveDate>(2)?,
        case_type,
        cumulative_count: row.try_get(4)?,
    }))
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn is_valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table.split('.').count() <= 2
        && table.split('.').all(|part| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !part.starts_with(|c: char| c.is_ascii_digit())
        })
}
