/// Integration tests for running from a CSV export
///
/// These tests verify:
/// 1. A config pointing `[dev] fixture_csv` at an export builds a working service
/// 2. Untracked case types and blank fields in the export are handled
/// 3. A missing export fails startup instead of serving nothing
///
/// Fixtures are written to temporary directories; no external services are needed.

use std::fmt::Write as _;
use std::fs;

use chrono::{Days, NaiveDate};

use covid_service::config::Config;
use covid_service::service::{QueryService, StartupError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn export(days: u64) -> String {
    let start = NaiveDate::from_ymd_opt(2020, 3, 2).unwrap();
    let mut csv = String::from("country_region,province_state,date,case_type,cases\n");
    for i in 0..days {
        let date = start.checked_add_days(Days::new(i)).unwrap();
        writeln!(csv, "Latvia,,{},Confirmed,{}", date, 10 + i * 4).unwrap();
        writeln!(csv, "Latvia,,{},Deaths,{}", date, i / 10).unwrap();
        writeln!(csv, "Latvia,,{},Recovered,{}", date, i).unwrap();
    }
    writeln!(csv, "Estonia,,{},Confirmed,", start).unwrap();
    csv
}

fn config_for(path: &str) -> Config {
    let text = format!("[dev]\nfixture_csv = \"{}\"\n", path.replace('\\', "/"));
    Config::from_toml_str(&text, "inline").unwrap()
}

// ---------------------------------------------------------------------------
// Replay Tests
// ---------------------------------------------------------------------------

#[test]
fn test_fixture_config_serves_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.csv");
    fs::write(&path, export(40)).unwrap();

    let service = QueryService::from_config(&config_for(path.to_str().unwrap())).unwrap();
    assert_eq!(service.store().name(), "csv");
    assert_eq!(service.list_countries().unwrap(), vec!["Estonia", "Latvia"]);

    let summary = service.get_summary("Latvia").unwrap();
    assert_eq!(summary.total_cases, 10 + 39 * 4);
    assert_eq!(summary.total_deaths, 3);

    // Recovered rows are not tracked.
    assert_eq!(service.get_timeseries("Latvia").unwrap().len(), 80);
    assert_eq!(service.get_forecast("Latvia").unwrap().len(), 40 + 90);
}

#[test]
fn test_blank_counts_are_kept_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.csv");
    fs::write(&path, export(3)).unwrap();

    let service = QueryService::from_config(&config_for(path.to_str().unwrap())).unwrap();
    let records = service.get_timeseries("Estonia").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cases, None);
    assert_eq!(service.get_summary("Estonia").unwrap().total_cases, 0);
}

#[test]
fn test_missing_export_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.csv");
    let result = QueryService::from_config(&config_for(path.to_str().unwrap()));
    assert!(matches!(result, Err(StartupError::Store(_))));
}
