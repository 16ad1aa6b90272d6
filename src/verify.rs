//! Backing Store Verification Module
//!
//! Checks the configured warehouse and annotation store before the service
//! is put in front of users: can each be reached, does it return data, and
//! do sampled countries have enough history to forecast.
//!
//! Run with `covid_service verify [--json]`.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::analysis::preprocess::MIN_HISTORY_DAYS;
use crate::annotations::{AnnotationQuery, AnnotationStore};
use crate::logging::{self, DataSource};
use crate::model::{CaseType, FetchQuery};
use crate::store::TimeSeriesStore;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub warehouse: WarehouseVerification,
    pub annotations: AnnotationVerification,
    pub status: VerificationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseVerification {
    pub store: String,
    pub status: VerificationStatus,
    pub countries_found: usize,
    pub samples: Vec<CountrySample>,
    pub error_message: Option<String>,
}

/// One sampled country's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountrySample {
    pub country: String,
    pub rows: usize,
    pub confirmed_dates: usize,
    pub forecastable: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationVerification {
    pub store: String,
    pub status: VerificationStatus,
    pub responsive: bool,
    pub sample_count: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

// ============================================================================
// Warehouse Verification
// ============================================================================

/// Lists countries, then fetches the first `sample_size` of them.
///
/// Success: every sample has enough confirmed history to forecast.
/// PartialSuccess: reachable with data, but some samples are short or failed.
/// Failed: unreachable or empty.
pub fn verify_warehouse(store: &dyn TimeSeriesStore, sample_size: usize) -> WarehouseVerification {
    let mut result = WarehouseVerification {
        store: store.name().to_string(),
        status: VerificationStatus::Failed,
        countries_found: 0,
        samples: Vec::new(),
        error_message: None,
    };

    let countries = match store.list_countries() {
        Ok(countries) => countries,
        Err(e) => {
            logging::log_upstream_failure(DataSource::Warehouse, None, "list_countries", &e);
            result.error_message = Some(e.to_string());
            return result;
        }
    };
    result.countries_found = countries.len();
    if countries.is_empty() {
        result.error_message = Some("no countries returned".to_string());
        return result;
    }

    for country in countries.iter().take(sample_size) {
        result.samples.push(sample_country(store, country));
    }

    let forecastable = result.samples.iter().filter(|s| s.forecastable).count();
    result.status = if forecastable == result.samples.len() {
        VerificationStatus::Success
    } else {
        VerificationStatus::PartialSuccess
    };
    result
}

fn sample_country(store: &dyn TimeSeriesStore, country: &str) -> CountrySample {
    match store.fetch(&FetchQuery::country(country)) {
        Ok(rows) => {
            let confirmed_dates = rows
                .iter()
                .filter(|r| r.case_type == CaseType::Confirmed && r.cumulative_count.is_some())
                .map(|r| r.date)
                .collect::<BTreeSet<_>>()
                .len();
            CountrySample {
                country: country.to_string(),
                rows: rows.len(),
                confirmed_dates,
                forecastable: confirmed_dates >= MIN_HISTORY_DAYS,
                error_message: None,
            }
        }
        Err(e) => {
            logging::log_upstream_failure(DataSource::Warehouse, Some(country), "fetch", &e);
            CountrySample {
                country: country.to_string(),
                rows: 0,
                confirmed_dates: 0,
                forecastable: false,
                error_message: Some(e.to_string()),
            }
        }
    }
}

// ============================================================================
// Annotation Store Verification
// ============================================================================

/// Runs one small query. An empty collection still counts as working.
pub fn verify_annotations(store: &dyn AnnotationStore) -> AnnotationVerification {
    let query = AnnotationQuery {
        limit: Some(5),
        ..Default::default()
    };

    match store.query(&query) {
        Ok(found) => AnnotationVerification {
            store: store.name().to_string(),
            status: VerificationStatus::Success,
            responsive: true,
            sample_count: found.len(),
            error_message: None,
        },
        Err(e) => {
            logging::log_upstream_failure(DataSource::Annotations, None, "query", &e);
            AnnotationVerification {
                store: store.name().to_string(),
                status: VerificationStatus::Failed,
                responsive: false,
                sample_count: 0,
                error_message: Some(e.to_string()),
            }
        }
    }
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn run_verification(
    store: &dyn TimeSeriesStore,
    annotations: &dyn AnnotationStore,
    sample_size: usize,
) -> VerificationReport {
    logging::info(DataSource::System, None, &format!("Verifying warehouse '{}'", store.name()));
    let warehouse = verify_warehouse(store, sample_size);

    logging::info(
        DataSource::System,
        None,
        &format!("Verifying annotation store '{}'", annotations.name()),
    );
    let annotations = verify_annotations(annotations);

    let status = match (warehouse.status, annotations.status) {
        (VerificationStatus::Success, VerificationStatus::Success) => VerificationStatus::Success,
        (VerificationStatus::Failed, VerificationStatus::Failed) => VerificationStatus::Failed,
        _ => VerificationStatus::PartialSuccess,
    };

    let ok = warehouse.samples.iter().filter(|s| s.error_message.is_none()).count();
    logging::log_batch_summary(
        DataSource::Warehouse,
        "Country sampling",
        warehouse.samples.len(),
        ok,
        warehouse.samples.len() - ok,
    );

    VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        warehouse,
        annotations,
        status,
    }
}

pub fn print_summary(report: &VerificationReport) {
    let rule = "=".repeat(63);
    println!("\n{}", rule);
    println!("VERIFICATION SUMMARY  ({})", report.timestamp);
    println!("{}", rule);
    println!();

    let w = &report.warehouse;
    println!("Warehouse ({}):   {:?}, {} countries", w.store, w.status, w.countries_found);
    for s in &w.samples {
        match &s.error_message {
            Some(e) => println!("  {:<24} FAILED: {}", s.country, e),
            None => println!(
                "  {:<24} {} rows, {} confirmed dates{}",
                s.country,
                s.rows,
                s.confirmed_dates,
                if s.forecastable { "" } else { " (too short to forecast)" }
            ),
        }
    }
    if let Some(e) = &w.error_message {
        println!("  error: {}", e);
    }

    let a = &report.annotations;
    println!();
    println!("Annotations ({}):   {:?}, {} sampled", a.store, a.status, a.sample_count);
    if let Some(e) = &a.error_message {
        println!("  error: {}", e);
    }

    println!();
    println!("Overall: {:?}", report.status);
    println!("{}", rule);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::MemoryAnnotationStore;
    use crate::model::RawObservation;
    use crate::store::MemoryStore;
    use chrono::{Days, NaiveDate};

    fn rows(country: &str, days: u64) -> Vec<RawObservation> {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        (0..days)
            .map(|i| RawObservation {
                country: country.to_string(),
                province: None,
                date: start.checked_add_days(Days::new(i)).unwrap(),
                case_type: CaseType::Confirmed,
                cumulative_count: Some(i as i64),
            })
            .collect()
    }

    #[test]
    fn test_full_history_is_success() {
        let store = MemoryStore::new(rows("Latvia", 40));
        let report = run_verification(&store, &MemoryAnnotationStore::new(), 3);
        assert_eq!(report.warehouse.status, VerificationStatus::Success);
        assert_eq!(report.warehouse.countries_found, 1);
        assert_eq!(report.warehouse.samples[0].confirmed_dates, 40);
        assert_eq!(report.status, VerificationStatus::Success);
    }

    #[test]
    fn test_short_history_is_partial() {
        let mut data = rows("Latvia", 40);
        data.extend(rows("Estonia", 10));
        let result = verify_warehouse(&MemoryStore::new(data), 5);
        assert_eq!(result.status, VerificationStatus::PartialSuccess);
        assert!(result.samples.iter().any(|s| s.country == "Estonia" && !s.forecastable));
    }

    #[test]
    fn test_offline_or_empty_store_fails() {
        let store = MemoryStore::new(rows("Latvia", 40));
        store.set_offline(true);
        let result = verify_warehouse(&store, 3);
        assert_eq!(result.status, VerificationStatus::Failed);
        assert!(result.error_message.is_some());

        let empty = verify_warehouse(&MemoryStore::new(Vec::new()), 3);
        assert_eq!(empty.status, VerificationStatus::Failed);

        let report = run_verification(&store, &MemoryAnnotationStore::new(), 3);
        assert_eq!(report.status, VerificationStatus::PartialSuccess);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = run_verification(&MemoryStore::new(rows("Latvia", 5)), &MemoryAnnotationStore::new(), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["warehouse"]["store"], "memory");
        assert_eq!(json["annotations"]["status"], "Success");
    }
}
