//! Service configuration.
//!
//! Settings live in a TOML file (`covid_service.toml` by default); every
//! section has defaults so a missing file still yields a runnable dev setup.
//! Credentials never live in the file: the warehouse URL and the annotation
//! store API key come from the environment, after `.env` has been loaded.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::logging::LogLevel;

pub const DEFAULT_CONFIG_PATH: &str = "./covid_service.toml";

/// Environment variable holding the warehouse connection string.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Environment variable holding the annotation store API key.
pub const ANNOTATIONS_API_KEY_VAR: &str = "ANNOTATIONS_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub warehouse: WarehouseConfig,
    pub dev: DevConfig,
    pub annotations: AnnotationsConfig,
    pub forecast: ForecastConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Table holding the JHU daily records.
    pub table: String,
    /// Connection string; normally left unset and taken from `DATABASE_URL`.
    pub url: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig {
            table: "jhu_covid_19".to_string(),
            url: None,
        }
    }
}

/// Running without a warehouse.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// CSV file replayed in place of the warehouse.
    pub fixture_csv: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationBackend {
    Memory,
    DataApi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotationsConfig {
    pub backend: AnnotationBackend,
    pub endpoint: Option<String>,
    pub data_source: String,
    pub database: String,
    pub collection: String,
    pub timeout_secs: u64,
    /// Normally left unset and taken from `ANNOTATIONS_API_KEY`.
    pub api_key: Option<String>,
}

impl Default for AnnotationsConfig {
    fn default() -> Self {
        AnnotationsConfig {
            backend: AnnotationBackend::Memory,
            endpoint: None,
            data_source: "covid19project".to_string(),
            database: "covid19_supplementary".to_string(),
            collection: "comments".to_string(),
            timeout_secs: 10,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub horizon_days: usize,
    pub min_history_days: usize,
    pub interval_width: f64,
    pub trend_window_days: usize,
    pub fit_timeout_ms: u64,
    pub min_band: f64,
    /// Absent means one entry per country with no eviction.
    pub max_cached_countries: Option<usize>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            horizon_days: 90,
            min_history_days: 30,
            interval_width: 0.8,
            trend_window_days: 28,
            fit_timeout_ms: 5_000,
            min_band: 1.0,
            max_cached_countries: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            console_timestamps: true,
        }
    }
}

impl LoggingConfig {
    pub fn min_level(&self) -> Result<LogLevel, ConfigError> {
        self.level.parse().map_err(ConfigError::Invalid)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Parses configuration from TOML text and validates it.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `path`, falling back to defaults when it does not exist,
    /// then applies secrets from the environment.
    pub fn load(path: &str) -> Result<Config, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = if Path::new(path).exists() {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_string(),
                source,
            })?;
            Config::from_toml_str(&text, path)?
        } else {
            Config::default()
        };

        if config.warehouse.url.is_none() {
            config.warehouse.url = env::var(DATABASE_URL_VAR).ok();
        }
        if config.annotations.api_key.is_none() {
            config.annotations.api_key = env::var(ANNOTATIONS_API_KEY_VAR).ok();
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.forecast;
        if !(f.interval_width > 0.0 && f.interval_width < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "forecast.interval_width must be in (0, 1), got {}",
                f.interval_width
            )));
        }
        if f.min_history_days < 14 {
            return Err(ConfigError::Invalid(
                "forecast.min_history_days must cover at least two weeks".to_string(),
            ));
        }
        if f.trend_window_days < 2 {
            return Err(ConfigError::Invalid(
                "forecast.trend_window_days must be at least 2".to_string(),
            ));
        }
        if f.min_band < 0.0 || !f.min_band.is_finite() {
            return Err(ConfigError::Invalid("forecast.min_band must be >= 0".to_string()));
        }
        if f.max_cached_countries == Some(0) {
            return Err(ConfigError::Invalid(
                "forecast.max_cached_countries must be positive when set".to_string(),
            ));
        }
        if self.annotations.backend == AnnotationBackend::DataApi && self.annotations.endpoint.is_none() {
            return Err(ConfigError::Missing("annotations.endpoint".to_string()));
        }
        self.logging.min_level()?;
        Ok(())
    }
}
