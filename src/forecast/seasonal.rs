//! Additive trend + weekly seasonality forecast.
//!
//! Model, for day `t` with weekday `w(t)`:
//!
//!   y(t) = trend(t) + season[w(t)] + noise
//!
//! - trend: centered 7-day moving average, shrinking at the edges
//! - season: mean residual per weekday, centered to sum to zero
//! - projection: least-squares line over the trailing trend window, slope
//!   clamped at zero because cumulative counts never fall
//! - band: `z * sigma` historically, widening with the step size in the
//!   future (trend innovation and slope standard error)

use std::time::Instant;

use chrono::{Datelike, Days};
use statrs::distribution::{ContinuousCDF, Normal};

use super::{ForecastEngine, ForecastOptions};
use crate::model::{CleanedSeries, Forecast, ForecastPoint, UnavailableReason};

const SEASON_LENGTH: usize = 7;

#[derive(Debug, Clone)]
pub struct SeasonalTrendModel {
    options: ForecastOptions,
    z: f64,
}

/// Least-squares line through `(0, v0), (1, v1), ...`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LineFit {
    intercept: f64,
    slope: f64,
    slope_se: f64,
}

impl SeasonalTrendModel {
    pub fn new(options: ForecastOptions) -> Self {
        let z = Normal::new(0.0, 1.0)
            .map(|n| n.inverse_cdf(0.5 + options.interval_width / 2.0))
            .unwrap_or(f64::NAN);
        SeasonalTrendModel { options, z }
    }

    pub fn options(&self) -> &ForecastOptions {
        &self.options
    }

    fn fit(&self, series: &CleanedSeries, horizon_days: usize) -> Result<Vec<ForecastPoint>, UnavailableReason> {
        let deadline = self.options.fit_timeout.map(|t| Instant::now() + t);
        let check_deadline = || match deadline {
            Some(d) if Instant::now() > d => Err(UnavailableReason::TimedOut),
            _ => Ok(()),
        };

        let (Some(first_date), Some(last_date)) = (series.first_date(), series.last_date()) else {
            return Err(UnavailableReason::EmptySeries);
        };
        if !self.z.is_finite() {
            return Err(UnavailableReason::NonFinite);
        }

        let y: Vec<f64> = series.points.iter().map(|(_, c)| *c as f64).collect();
        let n = y.len();
        let weekdays: Vec<usize> = series
            .points
            .iter()
            .map(|(d, _)| d.weekday().num_days_from_monday() as usize)
            .collect();

        // Stage 1: trend
        let trend = centered_moving_average(&y, SEASON_LENGTH);
        check_deadline()?;

        // Stage 2: weekly seasonality and residual noise
        let season = weekly_profile(&y, &trend, &weekdays);
        let fitted: Vec<f64> = trend
            .iter()
            .zip(&weekdays)
            .map(|(t, w)| t + season[*w])
            .collect();
        let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(a, f)| a - f).collect();
        let sigma = std_dev(&residuals).max(self.options.min_band);
        check_deadline()?;

        // Stage 3: projection from the deseasonalized observations, since the
        // moving average lags at the series end
        let window = self.options.trend_window_days.clamp(1, n);
        let deseasonalized: Vec<f64> = y[n - window..]
            .iter()
            .zip(&weekdays[n - window..])
            .map(|(v, w)| v - season[*w])
            .collect();
        let line = fit_line(&deseasonalized);
        let slope = line.slope.max(0.0);
        let level = line.intercept + line.slope * (window as f64 - 1.0);
        let innovation = trend_innovation(&trend[n - window..], line.slope);
        check_deadline()?;

        let historical_half = self.z * sigma;
        let mut out = Vec::with_capacity(n + horizon_days);

        for ((date, _), f) in series.points.iter().zip(&fitted) {
            out.push(banded(*date, *f, historical_half));
        }

        let mut date = last_date;
        for k in 1..=horizon_days {
            date = date
                .checked_add_days(Days::new(1))
                .ok_or(UnavailableReason::NonFinite)?;
            let step = k as f64;
            let trend_k = level + slope * step;
            let weekday = date.weekday().num_days_from_monday() as usize;
            let variance = sigma.powi(2) + step * innovation.powi(2) + (step * line.slope_se).powi(2);
            out.push(banded(date, trend_k + season[weekday], self.z * variance.sqrt()));
        }

        if out
            .iter()
            .any(|p| !(p.point.is_finite() && p.lower.is_finite() && p.upper.is_finite()))
        {
            return Err(UnavailableReason::NonFinite);
        }
        debug_assert_eq!(out.first().map(|p| p.date), Some(first_date));
        Ok(out)
    }
}

impl Default for SeasonalTrendModel {
    fn default() -> Self {
        SeasonalTrendModel::new(ForecastOptions::default())
    }
}

impl ForecastEngine for SeasonalTrendModel {
    fn name(&self) -> &str {
        "seasonal-trend"
    }

    fn fit_predict(&self, series: &CleanedSeries, horizon_days: usize) -> Forecast {
        match self.fit(series, horizon_days) {
            Ok(points) => Forecast::Available(points),
            Err(reason) => Forecast::Unavailable(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Counts are never negative, so every bound is clamped at zero; the upper
/// bound is kept at or above the clamped point.
fn banded(date: chrono::NaiveDate, center: f64, half_width: f64) -> ForecastPoint {
    let half = half_width.abs();
    let point = center.max(0.0);
    ForecastPoint {
        date,
        point,
        lower: (center - half).max(0.0).min(point),
        upper: (center + half).max(point),
    }
}

/// Mean over `[i - w/2, i + w/2]`, truncated at both ends of the series.
fn centered_moving_average(y: &[f64], width: usize) -> Vec<f64> {
    let half = width / 2;
    let mut prefix = Vec::with_capacity(y.len() + 1);
    prefix.push(0.0);
    for v in y {
        prefix.push(prefix[prefix.len() - 1] + v);
    }
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(y.len() - 1);
            (prefix[hi + 1] - prefix[lo]) / (hi - lo + 1) as f64
        })
        .collect()
}

/// Per-weekday mean of `y - trend`, centered so the seven values sum to zero.
///
/// Only points whose moving-average window is complete contribute, so the
/// lagging edges of the trend do not leak into the profile. Needs two full
/// weeks of such points; shorter series get a flat profile.
fn weekly_profile(y: &[f64], trend: &[f64], weekdays: &[usize]) -> [f64; SEASON_LENGTH] {
    let mut profile = [0.0; SEASON_LENGTH];
    let half = SEASON_LENGTH / 2;
    if y.len() < 2 * SEASON_LENGTH + 2 * half {
        return profile;
    }

    let mut sums = [0.0; SEASON_LENGTH];
    let mut counts = [0usize; SEASON_LENGTH];
    for i in half..y.len() - half {
        sums[weekdays[i]] += y[i] - trend[i];
        counts[weekdays[i]] += 1;
    }
    for w in 0..SEASON_LENGTH {
        if counts[w] > 0 {
            profile[w] = sums[w] / counts[w] as f64;
        }
    }
    let mean = profile.iter().sum::<f64>() / SEASON_LENGTH as f64;
    for p in &mut profile {
        *p -= mean;
    }
    profile
}

/// Sample standard deviation; 0 for fewer than two values.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

fn fit_line(values: &[f64]) -> LineFit {
    let n = values.len();
    if n < 2 {
        return LineFit {
            intercept: values.first().copied().unwrap_or(0.0),
            slope: 0.0,
            slope_se: 0.0,
        };
    }

    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, v) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxx += dx * dx;
        sxy += dx * (v - y_mean);
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let slope_se = if n > 2 {
        let ssr: f64 = values
            .iter()
            .enumerate()
            .map(|(i, v)| (v - (intercept + slope * i as f64)).powi(2))
            .sum();
        (ssr / (nf - 2.0) / sxx).sqrt()
    } else {
        0.0
    };

    LineFit {
        intercept,
        slope,
        slope_se,
    }
}

/// Spread of day-over-day trend increments around the fitted slope.
fn trend_innovation(tail: &[f64], slope: f64) -> f64 {
    let increments: Vec<f64> = tail.windows(2).map(|w| w[1] - w[0] - slope).collect();
    if increments.len() < 2 {
        return 0.0;
    }
    let ss: f64 = increments.iter().map(|d| d * d).sum();
    (ss / (increments.len() - 1) as f64).sqrt()
}
