//! COVID-19 time-series query service.
//!
//! Serves per-country summaries, raw time series, cached forecasts,
//! peak-week rankings and user comments over JSON.

pub mod analysis;
pub mod annotations;
pub mod config;
pub mod forecast;
pub mod logging;
pub mod model;
pub mod server;
pub mod service;
pub mod store;
pub mod verify;
