/// Integration tests against a live warehouse
///
/// These tests verify:
/// 1. The warehouse table is reachable and lists countries
/// 2. A country's rows come back ordered by date
/// 3. Country-level confirmed rows feed the peak-week ranking
/// 4. A dropped connection is replaced on the next call
/// 5. A service holding a live connection can be dropped inside the runtime
///
/// Prerequisites:
/// - PostgreSQL with the JHU daily table (default name `jhu_covid_19`)
/// - DATABASE_URL set in the environment or .env
///
/// Run with: cargo test --test warehouse_integration -- --ignored --test-threads=1

use std::sync::Arc;

use covid_service::analysis::peaks::{PEAK_WEEKS_LIMIT, peak_weeks};
use covid_service::annotations::MemoryAnnotationStore;
use covid_service::forecast::SeasonalTrendModel;
use covid_service::model::{CaseType, FetchQuery, StoreError};
use covid_service::server::router;
use covid_service::service::QueryService;
use covid_service::store::{PostgresStore, TimeSeriesStore};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn warehouse() -> PostgresStore {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        eprintln!("\n{}", "=".repeat(80));
        eprintln!("WAREHOUSE TEST SETUP ERROR: DATABASE_URL is not set");
        eprintln!("{}\n", "=".repeat(80));
        panic!("DATABASE_URL required for warehouse integration tests");
    });
    let table = std::env::var("WAREHOUSE_TABLE").unwrap_or_else(|_| "jhu_covid_19".to_string());
    PostgresStore::new(&url, &table).expect("valid table name")
}

// ---------------------------------------------------------------------------
// Live Warehouse Tests
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_warehouse_lists_countries() {
    let store = warehouse();
    let countries = store.list_countries().expect("warehouse reachable");
    assert!(!countries.is_empty(), "warehouse table has no countries");
    assert!(countries.windows(2).all(|w| w[0] < w[1]), "countries must be sorted and distinct");
    assert!(store.is_connected());
}

#[test]
#[ignore]
fn test_country_rows_are_date_ordered() {
    let store = warehouse();
    let country = store.list_countries().unwrap().into_iter().next().unwrap();
    let rows = store.fetch(&FetchQuery::country(&country)).unwrap();
    assert!(!rows.is_empty());
    assert!(rows.windows(2).all(|w| w[0].date <= w[1].date));
    assert!(rows.iter().all(|r| r.country == country));
}

#[test]
#[ignore]
fn test_unknown_country_is_empty_not_error() {
    let store = warehouse();
    let rows = store.fetch(&FetchQuery::country("Atlantis")).unwrap();
    assert!(rows.is_empty());
}

#[test]
#[ignore]
fn test_peak_weeks_from_warehouse() {
    let store = warehouse();
    let rows = store.fetch_by_case_type(CaseType::Confirmed).unwrap();
    assert!(rows.iter().all(|r| r.province.is_none() && r.case_type == CaseType::Confirmed));

    let ranked = peak_weeks(&rows, PEAK_WEEKS_LIMIT);
    assert!(ranked.len() <= PEAK_WEEKS_LIMIT);
    assert!(ranked.windows(2).all(|w| w[0].peak_weekly_cases >= w[1].peak_weekly_cases));
}

#[test]
#[ignore]
fn test_router_with_live_connection_drops_inside_runtime() {
    let store = warehouse();
    store.list_countries().expect("warehouse reachable");
    store.fetch_by_case_type(CaseType::Confirmed).expect("warehouse reachable");
    assert!(store.is_connected());

    let service = QueryService::new(
        Arc::new(store),
        Arc::new(MemoryAnnotationStore::new()),
        Arc::new(SeasonalTrendModel::default()),
    );
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
    // The last reference goes away on a worker thread, as at server shutdown.
    runtime.block_on(async move {
        let app = router(Arc::new(service));
        drop(app);
    });
}

#[test]
fn test_unconnected_store_drops_inside_runtime() {
    let store = PostgresStore::new("host=127.0.0.1 port=1 user=nobody connect_timeout=1", "jhu_covid_19").unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    runtime.block_on(async move { drop(store) });
}

#[test]
fn test_unreachable_warehouse_is_unavailable() {
    let store = PostgresStore::new("host=127.0.0.1 port=1 user=nobody connect_timeout=1", "jhu_covid_19").unwrap();
    assert!(matches!(store.list_countries(), Err(StoreError::Unavailable(_))));
    // A second call attempts a fresh connection rather than panicking.
    assert!(matches!(store.list_countries(), Err(StoreError::Unavailable(_))));
    assert!(!store.is_connected());
}
