/// Query service
///
/// Owns the stores, the forecast engine and the forecast cache, and exposes
/// the operations served by the HTTP API and the CLI. Everything here is
/// blocking; async callers run these methods on a blocking thread.
///
/// Error policy:
///   - a store that cannot be reached is `ServiceError::UpstreamUnavailable`
///   - a country without rows is `NotFound` only for the time series; the
///     summary reports zeros and the forecast reports no points
///   - a forecast that cannot be produced is an empty result, never an error

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::analysis::peaks::{self, PEAK_WEEKS_LIMIT};
use crate::analysis::preprocess::{self, MIN_HISTORY_DAYS};
use crate::annotations::{AnnotationQuery, AnnotationStore, DataApiAnnotationStore, MemoryAnnotationStore};
use crate::config::{ANNOTATIONS_API_KEY_VAR, AnnotationBackend, Config, ConfigError};
use crate::forecast::{
    CacheStats, DEFAULT_HORIZON_DAYS, ForecastCache, ForecastEngine, ForecastOptions, MaxEntries,
    SeasonalTrendModel,
};
use crate::logging::{self, DataSource};
use crate::model::{
    Annotation, AnnotationError, CaseType, FetchQuery, Forecast, ForecastPoint, NewAnnotation, PeakWeek,
    PreprocessError, RawObservation, ServiceError, StoreError, Summary, TimeseriesRecord, UnavailableReason,
};
use crate::store::{CsvStore, MemoryStore, PostgresStore, TimeSeriesStore};

/// Failures while assembling a service from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Annotations(#[from] AnnotationError),
}

pub struct QueryService {
    store: Arc<dyn TimeSeriesStore>,
    annotations: Arc<dyn AnnotationStore>,
    engine: Arc<dyn ForecastEngine>,
    cache: ForecastCache<Forecast>,
    horizon_days: usize,
    min_history_days: usize,
}

impl QueryService {
    /// A service with an unbounded cache, a 90-day horizon and the default
    /// history threshold.
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        annotations: Arc<dyn AnnotationStore>,
        engine: Arc<dyn ForecastEngine>,
    ) -> Self {
        QueryService {
            store,
            annotations,
            engine,
            cache: ForecastCache::new(),
            horizon_days: DEFAULT_HORIZON_DAYS,
            min_history_days: MIN_HISTORY_DAYS,
        }
    }

    pub fn with_cache(mut self, cache: ForecastCache<Forecast>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_horizon_days(mut self, days: usize) -> Self {
        self.horizon_days = days;
        self
    }

    pub fn with_min_history_days(mut self, days: usize) -> Self {
        self.min_history_days = days;
        self
    }

    /// Builds the stores, engine and cache named by `config`.
    ///
    /// Store selection: `dev.fixture_csv` replays a CSV export; otherwise the
    /// warehouse at `DATABASE_URL`. With neither, the service starts on an
    /// empty in-memory store and says so in the log.
    pub fn from_config(config: &Config) -> Result<QueryService, StartupError> {
        let store: Arc<dyn TimeSeriesStore> = if let Some(path) = &config.dev.fixture_csv {
            let store = CsvStore::load(path)?;
            logging::info(
                DataSource::System,
                None,
                &format!("Replaying {} rows from {}", store.len(), path),
            );
            Arc::new(store)
        } else if let Some(url) = &config.warehouse.url {
            Arc::new(PostgresStore::new(url, &config.warehouse.table)?)
        } else {
            logging::warn(
                DataSource::System,
                None,
                "No warehouse URL or fixture configured; serving an empty store",
            );
            Arc::new(MemoryStore::new(Vec::new()))
        };

        let annotations: Arc<dyn AnnotationStore> = match config.annotations.backend {
            AnnotationBackend::Memory => Arc::new(MemoryAnnotationStore::new()),
            AnnotationBackend::DataApi => {
                let a = &config.annotations;
                let endpoint = a
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| ConfigError::Missing("annotations.endpoint".to_string()))?;
                let api_key = a
                    .api_key
                    .as_deref()
                    .ok_or_else(|| ConfigError::Missing(ANNOTATIONS_API_KEY_VAR.to_string()))?;
                Arc::new(DataApiAnnotationStore::new(
                    endpoint,
                    api_key,
                    &a.data_source,
                    &a.database,
                    &a.collection,
                    Duration::from_secs(a.timeout_secs),
                )?)
            }
        };

        let engine = Arc::new(SeasonalTrendModel::new(ForecastOptions::from(&config.forecast)));
        let cache = match config.forecast.max_cached_countries {
            Some(n) => ForecastCache::with_policy(Box::new(MaxEntries(n))),
            None => ForecastCache::new(),
        };

        logging::info(
            DataSource::System,
            None,
            &format!(
                "Service ready: store={}, annotations={}, engine={}",
                store.name(),
                annotations.name(),
                engine.name()
            ),
        );

        Ok(QueryService::new(store, annotations, engine)
            .with_cache(cache)
            .with_horizon_days(config.forecast.horizon_days)
            .with_min_history_days(config.forecast.min_history_days))
    }

    pub fn store(&self) -> &dyn TimeSeriesStore {
        self.store.as_ref()
    }

    pub fn annotation_store(&self) -> &dyn AnnotationStore {
        self.annotations.as_ref()
    }

    // -----------------------------------------------------------------------
    // Time series
    // -----------------------------------------------------------------------

    pub fn list_countries(&self) -> Result<Vec<String>, ServiceError> {
        self.store.list_countries().map_err(|e| self.store_failure(None, "list_countries", e))
    }

    /// Totals and mortality. A country without rows reports zeros.
    pub fn get_summary(&self, country: &str) -> Result<Summary, ServiceError> {
        let rows = self.fetch_country(country)?;
        Ok(preprocess::summarize(&preprocess::country_level(&rows)))
    }

    /// Every stored row for the country, ascending by date.
    pub fn get_timeseries(&self, country: &str) -> Result<Vec<TimeseriesRecord>, ServiceError> {
        let rows = self.fetch_country(country)?;
        if rows.is_empty() {
            return Err(ServiceError::NotFound(format!("No data for country: {}", country)));
        }

        let mut records: Vec<TimeseriesRecord> = rows
            .into_iter()
            .map(|r| TimeseriesRecord {
                date: r.date,
                case_type: r.case_type,
                cases: r.cumulative_count,
            })
            .collect();
        records.sort_by_key(|r| (r.date, r.case_type));
        Ok(records)
    }

    /// Top countries by their highest week of new confirmed cases.
    pub fn get_peak_weeks(&self) -> Result<Vec<PeakWeek>, ServiceError> {
        let rows = self
            .store
            .fetch_by_case_type(CaseType::Confirmed)
            .map_err(|e| self.store_failure(None, "peak_weeks", e))?;
        Ok(peaks::peak_weeks(&rows, PEAK_WEEKS_LIMIT))
    }

    // -----------------------------------------------------------------------
    // Forecast
    // -----------------------------------------------------------------------

    /// Historical fit plus the projection horizon for confirmed cases.
    ///
    /// The first successful answer for a country is kept for the life of the
    /// process (or until invalidated), including "no forecast" answers. A
    /// store failure is not kept, so the next request tries again.
    pub fn get_forecast(&self, country: &str) -> Result<Vec<ForecastPoint>, ServiceError> {
        let mut computed = false;
        let forecast = self.cache.get_or_compute(country, || {
            computed = true;
            self.compute_forecast(country)
        })?;
        if !computed {
            let kind = if forecast.is_available() { "Forecast" } else { "Empty forecast" };
            logging::debug(DataSource::Cache, Some(country), &format!("{} served from cache", kind));
        }
        Ok(forecast.points().to_vec())
    }

    fn compute_forecast(&self, country: &str) -> Result<Forecast, ServiceError> {
        let rows = self.fetch_country(country)?;
        let series = match preprocess::clean(
            &preprocess::country_level(&rows),
            CaseType::Confirmed,
            self.min_history_days,
        ) {
            Ok(series) => series,
            Err(PreprocessError::InsufficientData { required, found }) => {
                logging::info(
                    DataSource::Forecast,
                    Some(country),
                    &format!("No forecast: {} distinct dates, need {}", found, required),
                );
                return Ok(Forecast::Unavailable(UnavailableReason::InsufficientData {
                    required,
                    found,
                }));
            }
        };
        if series.is_empty() {
            return Ok(Forecast::Unavailable(UnavailableReason::EmptySeries));
        }

        let started = Instant::now();
        let forecast = self.engine.fit_predict(&series, self.horizon_days);
        let elapsed = started.elapsed();

        match &forecast {
            Forecast::Available(points) => logging::info(
                DataSource::Forecast,
                Some(country),
                &format!(
                    "Fitted {} on {} days, {} points in {} ms",
                    self.engine.name(),
                    series.len(),
                    points.len(),
                    elapsed.as_millis()
                ),
            ),
            Forecast::Unavailable(reason) => logging::warn(
                DataSource::Forecast,
                Some(country),
                &format!("Forecast unavailable: {}", reason),
            ),
        }
        Ok(forecast)
    }

    /// Drops the cached forecast for one country. Returns whether one existed.
    pub fn invalidate_forecast(&self, country: &str) -> bool {
        let dropped = self.cache.invalidate(country);
        if dropped {
            logging::info(DataSource::Cache, Some(country), "Forecast invalidated");
        }
        dropped
    }

    /// Drops every cached forecast. Returns how many were dropped.
    pub fn reset_forecasts(&self) -> usize {
        let dropped = self.cache.reset();
        logging::info(DataSource::Cache, None, &format!("Forecast cache reset, {} dropped", dropped));
        dropped
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // -----------------------------------------------------------------------
    // Comments
    // -----------------------------------------------------------------------

    pub fn add_comment(&self, country: &str, text: &str) -> Result<String, ServiceError> {
        self.add_annotation(NewAnnotation::new(country, text))
    }

    /// Stores a comment and returns its id. Country and text must be non-blank.
    pub fn add_annotation(&self, mut annotation: NewAnnotation) -> Result<String, ServiceError> {
        annotation.country = annotation.country.trim().to_string();
        if annotation.country.is_empty() {
            return Err(ServiceError::InvalidInput("country must not be empty".to_string()));
        }
        if annotation.text.trim().is_empty() {
            return Err(ServiceError::InvalidInput("comment must not be empty".to_string()));
        }

        let country = annotation.country.clone();
        let id = self.annotations.append(annotation).map_err(|e| {
            logging::log_upstream_failure(DataSource::Annotations, Some(&country), "append", &e);
            ServiceError::from(e)
        })?;
        logging::debug(DataSource::Annotations, Some(&country), &format!("Stored comment {}", id));
        Ok(id)
    }

    pub fn get_comments(&self, country: &str) -> Result<Vec<Annotation>, ServiceError> {
        self.annotations
            .query(&AnnotationQuery::country(country))
            .map_err(|e| {
                logging::log_upstream_failure(DataSource::Annotations, Some(country), "query", &e);
                ServiceError::from(e)
            })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn fetch_country(&self, country: &str) -> Result<Vec<RawObservation>, ServiceError> {
        self.store
            .fetch(&FetchQuery::country(country))
            .map_err(|e| self.store_failure(Some(country), "fetch", e))
    }

    fn store_failure(&self, country: Option<&str>, operation: &str, err: StoreError) -> ServiceError {
        logging::log_upstream_failure(DataSource::Warehouse, country, operation, &err);
        ServiceError::from(err)
    }
}
