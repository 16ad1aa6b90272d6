/// Integration tests for the HTTP surface
///
/// Requests go through the full axum router (routing, extraction, blocking
/// dispatch, status mapping) without binding a socket.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::{Days, NaiveDate};
use serde_json::{Value, json};
use tower::ServiceExt;

use covid_service::annotations::MemoryAnnotationStore;
use covid_service::forecast::SeasonalTrendModel;
use covid_service::model::{CaseType, RawObservation};
use covid_service::server::router;
use covid_service::service::QueryService;
use covid_service::store::MemoryStore;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn rows(country: &str, days: u64) -> Vec<RawObservation> {
    let start = NaiveDate::from_ymd_opt(2020, 3, 2).unwrap();
    (0..days)
        .map(|i| RawObservation {
            country: country.to_string(),
            province: None,
            date: start.checked_add_days(Days::new(i)).unwrap(),
            case_type: CaseType::Confirmed,
            cumulative_count: Some(100 + i as i64 * 7),
        })
        .collect()
}

fn app_with(store: Arc<MemoryStore>) -> axum::Router {
    let service = QueryService::new(
        store,
        Arc::new(MemoryAnnotationStore::new()),
        Arc::new(SeasonalTrendModel::default()),
    );
    router(Arc::new(service))
}

fn app() -> axum::Router {
    let mut data = rows("Latvia", 40);
    data.extend(rows("Estonia", 10));
    app_with(Arc::new(MemoryStore::new(data)))
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

// ---------------------------------------------------------------------------
// Read Endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_root_reports_running() {
    let (status, body) = get(app(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("running"));
}

#[tokio::test]
async fn test_countries_are_wrapped_and_sorted() {
    let (status, body) = get(app(), "/api/countries").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "countries": ["Estonia", "Latvia"] }));
}

#[tokio::test]
async fn test_summary_shape() {
    let (status, body) = get(app(), "/api/summary/Latvia").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_cases"], 100 + 39 * 7);
    assert_eq!(body["total_deaths"], 0);
    assert_eq!(body["mortality_rate"], 0.0);
}

#[tokio::test]
async fn test_timeseries_404_for_unknown_country() {
    let (status, body) = get(app(), "/api/timeseries/Atlantis").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("Atlantis"));

    let (status, body) = get(app(), "/api/timeseries/Latvia").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 40);
    assert_eq!(body[0]["date"], "2020-03-02");
    assert_eq!(body[0]["case_type"], "Confirmed");
}

#[tokio::test]
async fn test_forecast_and_empty_forecast_are_both_ok() {
    let (status, body) = get(app(), "/api/forecast/Latvia").await;
    assert_eq!(status, StatusCode::OK);
    let points = body.as_array().unwrap();
    assert_eq!(points.len(), 40 + 90);
    assert!(points[0].get("lower").is_some() && points[0].get("upper").is_some());

    let (status, body) = get(app(), "/api/forecast/Estonia").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_offline_store_is_503() {
    let store = Arc::new(MemoryStore::new(rows("Latvia", 40)));
    store.set_offline(true);
    let (status, _) = get(app_with(store), "/api/timeseries/Latvia").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_peak_weeks_lists_countries() {
    let (status, body) = get(app(), "/api/peak-weeks").await;
    assert_eq!(status, StatusCode::OK);
    let weeks = body.as_array().unwrap();
    assert_eq!(weeks.len(), 2);
    assert!(weeks[0]["peak_weekly_cases"].as_u64() >= weeks[1]["peak_weekly_cases"].as_u64());
}

// ---------------------------------------------------------------------------
// Write Endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_post_comment_then_list() {
    let app = app();
    let request = Request::post("/api/comments")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "country": "Latvia", "comment": "test" }).to_string()))
        .unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert!(body["comment_id"].as_str().is_some());

    let (status, body) = get(app, "/api/comments/Latvia").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["comments"][0]["text"], "test");
}

#[tokio::test]
async fn test_blank_comment_is_422() {
    let request = Request::post("/api/comments")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "country": "Latvia", "comment": "  " }).to_string()))
        .unwrap();
    let (status, _) = send(app(), request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_delete_forecast_invalidates() {
    let app = app();
    get(app.clone(), "/api/forecast/Latvia").await;

    let request = Request::delete("/api/forecast/Latvia").body(Body::empty()).unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invalidated"], true);

    let request = Request::delete("/api/forecast").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dropped"], 0);
}
