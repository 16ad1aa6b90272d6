//! Case forecasting.
//!
//! A `ForecastEngine` turns a cleaned cumulative series into a projection
//! with uncertainty bands. Engines are stateless between calls; memoization
//! is the job of `cache::ForecastCache`.
//!
//! Submodules:
//! - `seasonal`: additive trend + weekly seasonality model.
//! - `cache`: single-flight, per-country memoization.

pub mod cache;
pub mod seasonal;

pub use self::cache::{CacheEntry, CacheStats, EvictionPolicy, ForecastCache, MaxEntries, Unbounded};
pub use self::seasonal::SeasonalTrendModel;

use std::time::Duration;

use crate::config::ForecastConfig;
use crate::model::{CleanedSeries, Forecast};

/// Days projected past the last observed date.
pub const DEFAULT_HORIZON_DAYS: usize = 90;

/// Fits a model to a cumulative series and projects it forward.
///
/// Implementations never panic or return errors for bad input: anything that
/// prevents a forecast is reported as `Forecast::Unavailable`.
pub trait ForecastEngine: Send + Sync {
    fn name(&self) -> &str;

    /// One row per historical date followed by `horizon_days` future rows,
    /// dates strictly increasing, `lower <= point <= upper` on every row.
    fn fit_predict(&self, series: &CleanedSeries, horizon_days: usize) -> Forecast;
}

/// Tuning knobs for `SeasonalTrendModel`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastOptions {
    /// Probability mass inside the band, e.g. 0.8 for an 80% interval.
    pub interval_width: f64,
    /// Trailing days used to estimate the projected slope.
    pub trend_window_days: usize,
    /// Smallest half-width of the band, so flat series still get one.
    pub min_band: f64,
    /// Wall-clock budget for a single fit.
    pub fit_timeout: Option<Duration>,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        ForecastOptions {
            interval_width: 0.8,
            trend_window_days: 28,
            min_band: 1.0,
            fit_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl From<&ForecastConfig> for ForecastOptions {
    fn from(config: &ForecastConfig) -> Self {
        ForecastOptions {
            interval_width: config.interval_width,
            trend_window_days: config.trend_window_days,
            min_band: config.min_band,
            fit_timeout: (config.fit_timeout_ms > 0).then(|| Duration::from_millis(config.fit_timeout_ms)),
        }
    }
}
