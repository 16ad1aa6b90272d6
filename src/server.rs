/// HTTP/JSON surface
///
/// Thin axum layer over `QueryService`. Service calls block (warehouse
/// queries, HTTP to the document store, model fits), so every handler runs
/// its call on tokio's blocking pool.
///
/// Status mapping: NotFound → 404, UpstreamUnavailable → 503,
/// InvalidInput → 422. An empty forecast is a 200 with `[]`.

use std::sync::Arc;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::logging::{self, DataSource};
use crate::model::{NewAnnotation, ServiceError};
use crate::service::QueryService;

pub type AppState = Arc<QueryService>;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    /// The blocking task panicked or was cancelled.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(ServiceError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Service(ServiceError::UpstreamUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Service(ServiceError::InvalidInput(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Service(e) => e.to_string(),
            ApiError::Internal(msg) => msg.clone(),
        };
        if status.is_server_error() {
            logging::warn(DataSource::Http, None, &format!("{} {}", status.as_u16(), detail));
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Runs a blocking service call off the async executor.
async fn blocking<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&QueryService) -> Result<T, ServiceError> + Send + 'static,
{
    let service = Arc::clone(state);
    tokio::task::spawn_blocking(move || call(&service))
        .await
        .map_err(|e| ApiError::Internal(format!("request task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/countries", get(countries))
        .route("/api/summary/{country}", get(summary))
        .route("/api/timeseries/{country}", get(timeseries))
        .route("/api/forecast", delete(reset_forecasts))
        .route("/api/forecast/{country}", get(forecast).delete(invalidate_forecast))
        .route("/api/peak-weeks", get(peak_weeks))
        .route("/api/comments", post(add_comment))
        .route("/api/comments/{country}", get(comments))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(state: AppState, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    logging::info(DataSource::Http, None, &format!("Listening on http://{}", addr));

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                logging::info(DataSource::Http, None, "Shutdown requested");
            }
        })
        .await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "API is running." }))
}

async fn countries(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let countries = blocking(&state, |s| s.list_countries()).await?;
    Ok(Json(json!({ "countries": countries })))
}

async fn summary(State(state): State<AppState>, Path(country): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let summary = blocking(&state, move |s| s.get_summary(&country)).await?;
    Ok(Json(summary))
}

async fn timeseries(
    State(state): State<AppState>,
    Path(country): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let records = blocking(&state, move |s| s.get_timeseries(&country)).await?;
    Ok(Json(records))
}

async fn forecast(State(state): State<AppState>, Path(country): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let points = blocking(&state, move |s| s.get_forecast(&country)).await?;
    Ok(Json(points))
}

async fn invalidate_forecast(
    State(state): State<AppState>,
    Path(country): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = country.clone();
    let invalidated = blocking(&state, move |s| Ok(s.invalidate_forecast(&key))).await?;
    Ok(Json(json!({ "country": country, "invalidated": invalidated })))
}

async fn reset_forecasts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let dropped = blocking(&state, |s| Ok(s.reset_forecasts())).await?;
    Ok(Json(json!({ "dropped": dropped })))
}

async fn peak_weeks(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let weeks = blocking(&state, |s| s.get_peak_weeks()).await?;
    Ok(Json(weeks))
}

async fn comments(State(state): State<AppState>, Path(country): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let comments = blocking(&state, move |s| s.get_comments(&country)).await?;
    Ok(Json(json!({ "comments": comments })))
}

async fn add_comment(
    State(state): State<AppState>,
    Json(comment): Json<NewAnnotation>,
) -> Result<impl IntoResponse, ApiError> {
    let id = blocking(&state, move |s| s.add_annotation(comment)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "comment_id": id })),
    ))
}
