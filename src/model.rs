/// Core data types for the epidemiological query service.
///
/// This module defines the shared domain model imported by all other modules:
/// raw warehouse rows, the cleaned series handed to the forecast engine,
/// response shapes, annotations, and the error taxonomy. It contains no I/O.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Case types
// ---------------------------------------------------------------------------

/// The two case types tracked per country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CaseType {
    Confirmed,
    Deaths,
}

impl CaseType {
    /// Parses the warehouse spelling of a case type. Returns `None` for types
    /// this service does not track (e.g. "Recovered", "Active").
    pub fn parse(raw: &str) -> Option<CaseType> {
        match raw.trim() {
            s if s.eq_ignore_ascii_case("confirmed") => Some(CaseType::Confirmed),
            s if s.eq_ignore_ascii_case("deaths") => Some(CaseType::Deaths),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::Confirmed => "Confirmed",
            CaseType::Deaths => "Deaths",
        }
    }
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Warehouse records
// ---------------------------------------------------------------------------

/// A single daily row from the time-series warehouse.
///
/// `cumulative_count` is optional because the warehouse carries null counts
/// for some province/date combinations; the preprocessor drops those.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub country: String,
    pub province: Option<String>,
    pub date: NaiveDate,
    pub case_type: CaseType,
    pub cumulative_count: Option<i64>,
}

/// Parameters for a warehouse fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchQuery {
    pub country: String,
    pub province: Option<String>,
    pub limit: Option<usize>,
}

impl FetchQuery {
    pub fn country(country: &str) -> Self {
        FetchQuery {
            country: country.to_string(),
            province: None,
            limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Series types
// ---------------------------------------------------------------------------

/// A gap-free, date-ascending cumulative series for one country and case type.
///
/// Invariants (enforced by `analysis::preprocess::clean`):
///   - dates strictly increase by exactly one day
///   - counts never decrease
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedSeries {
    pub country: String,
    pub case_type: CaseType,
    pub points: Vec<(NaiveDate, u64)>,
}

impl CleanedSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|(d, _)| *d)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|(d, _)| *d)
    }
}

/// New cases on one day, derived from a cumulative series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub new_cases: u64,
}

// ---------------------------------------------------------------------------
// Forecast types
// ---------------------------------------------------------------------------

/// One forecast row. `lower <= point <= upper` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Why no forecast could be produced for a country.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Fewer distinct dates than the model needs.
    InsufficientData { required: usize, found: usize },
    /// The engine was handed an empty series.
    EmptySeries,
    /// Fitting produced NaN or infinite values.
    NonFinite,
    /// Fitting exceeded the configured deadline.
    TimedOut,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::InsufficientData { required, found } => {
                write!(f, "insufficient data: {} distinct dates, need {}", found, required)
            }
            UnavailableReason::EmptySeries => write!(f, "empty series"),
            UnavailableReason::NonFinite => write!(f, "fit produced non-finite values"),
            UnavailableReason::TimedOut => write!(f, "fit exceeded deadline"),
        }
    }
}

/// Outcome of a forecast: either the projected rows, or an explicit
/// "no forecast for this country right now" signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Forecast {
    Available(Vec<ForecastPoint>),
    Unavailable(UnavailableReason),
}

impl Forecast {
    pub fn is_available(&self) -> bool {
        matches!(self, Forecast::Available(_))
    }

    /// Rows for the response body; empty when unavailable.
    pub fn points(&self) -> &[ForecastPoint] {
        match self {
            Forecast::Available(points) => points,
            Forecast::Unavailable(_) => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// Headline numbers for a country.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_cases: u64,
    pub total_deaths: u64,
    pub mortality_rate: f64,
}

/// One row of the time-series response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeseriesRecord {
    pub date: NaiveDate,
    pub case_type: CaseType,
    pub cases: Option<i64>,
}

/// A country's single highest week of new confirmed cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeakWeek {
    pub country: String,
    pub week_start: NaiveDate,
    pub peak_weekly_cases: u64,
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// A stored user comment about a country's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub data_point_id: String,
    pub country: String,
    pub province: Option<String>,
    pub date: NaiveDate,
    pub author: String,
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Key linking a comment to one day of one region's data.
pub fn data_point_id(country: &str, province: Option<&str>, date: NaiveDate) -> String {
    format!("{}-{}-{}", country, province.unwrap_or("None"), date.format("%Y-%m-%d"))
}

/// A comment submission. Optional fields are filled in by `into_annotation`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewAnnotation {
    pub country: String,
    #[serde(alias = "comment")]
    pub text: String,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default, alias = "user")]
    pub author: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, alias = "annotations")]
    pub tags: Vec<String>,
}

impl NewAnnotation {
    pub fn new(country: &str, text: &str) -> Self {
        NewAnnotation {
            country: country.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// Stamps timestamps and defaults. `now` is injected so tests stay deterministic.
    pub fn into_annotation(self, now: DateTime<Utc>) -> Annotation {
        let date = self.date.unwrap_or_else(|| now.date_naive());
        let data_point_id = data_point_id(&self.country, self.province.as_deref(), date);
        Annotation {
            data_point_id,
            country: self.country,
            province: self.province,
            date,
            author: self.author.unwrap_or_else(|| "anonymous".to_string()),
            text: self.text,
            source: self.source.unwrap_or_else(|| "api".to_string()),
            tags: self.tags,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from the time-series warehouse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, dropped, timed out).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store answered but the query or row decoding failed.
    #[error("query failed: {0}")]
    Query(String),
}

/// Errors from the annotation document store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnnotationError {
    #[error("annotation store unavailable: {0}")]
    Unavailable(String),
    #[error("HTTP error: {0}")]
    Http(u16),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Raised by the preprocessor when there is too little history to model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    #[error("insufficient data: {found} distinct dates, need {required}")]
    InsufficientData { required: usize, found: usize },
}

/// Errors surfaced by `QueryService` to its callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// No data for the requested entity.
    #[error("not found: {0}")]
    NotFound(String),
    /// A backing store could not be reached. Distinct from `NotFound`.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// The request was malformed (e.g. an empty comment).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::UpstreamUnavailable(err.to_string())
    }
}

impl From<AnnotationError> for ServiceError {
    fn from(err: AnnotationError) -> Self {
        ServiceError::UpstreamUnavailable(err.to_string())
    }
}
