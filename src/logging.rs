/// Structured logging for the query service
///
/// Provides context-rich logging tagged with the data source and, where one
/// applies, the country the message concerns. Output goes to the console and
/// optionally to a log file for daemon operation. Events are emitted through
/// `tracing`, so `RUST_LOG` overrides the configured level.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt as tfmt};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Warehouse,
    Annotations,
    Forecast,
    Cache,
    Http,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Warehouse => write!(f, "WAREHOUSE"),
            DataSource::Annotations => write!(f, "NOTES"),
            DataSource::Forecast => write!(f, "FCST"),
            DataSource::Cache => write!(f, "CACHE"),
            DataSource::Http => write!(f, "HTTP"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the entity simply has no data
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Initialization
// ---------------------------------------------------------------------------

/// Keeps the file writer flushing for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the global logger.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    let level = min_level.as_filter();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("covid_service={level},tower_http={level}")));

    let console = if console_timestamps {
        tfmt::layer().with_target(false).boxed()
    } else {
        tfmt::layer().with_target(false).without_time().boxed()
    };

    let file_layer = log_file.and_then(|path| {
        let path = Path::new(path);
        let name = path.file_name()?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        let _ = FILE_GUARD.set(guard);
        Some(tfmt::layer().with_ansi(false).with_writer(writer).boxed())
    });

    if let Err(e) = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(filter)
        .try_init()
    {
        eprintln!("Logger already initialized: {}", e);
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(source: DataSource, country: Option<&str>, message: &str) {
    tracing::info!(source = %source, country = country.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(source: DataSource, country: Option<&str>, message: &str) {
    tracing::warn!(source = %source, country = country.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(source: DataSource, country: Option<&str>, message: &str) {
    tracing::error!(source = %source, country = country.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(source: DataSource, country: Option<&str>, message: &str) {
    tracing::debug!(source = %source, country = country.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify an upstream failure from its rendered error message.
pub fn classify_upstream_failure(error_message: &str) -> FailureType {
    let msg = error_message.to_ascii_lowercase();

    if msg.contains("not found") || msg.contains("no data") {
        FailureType::Expected
    }
    // Lost connections and HTTP failures mean the backing service is degraded
    else if msg.contains("unavailable")
        || msg.contains("connection")
        || msg.contains("timed out")
        || msg.contains("http error")
    {
        FailureType::Unexpected
    }
    // Parse errors suggest schema or API changes
    else if msg.contains("parse error") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log an upstream failure with automatic classification
pub fn log_upstream_failure(
    source: DataSource,
    country: Option<&str>,
    operation: &str,
    err: &dyn std::error::Error,
) {
    let error_msg = err.to_string();
    let failure_type = classify_upstream_failure(&error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(source, country, &message),
        FailureType::Unexpected => error(source, country, &message),
        FailureType::Unknown => warn(source, country, &message),
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a per-country batch operation
pub fn log_batch_summary(source: DataSource, operation: &str, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "{} complete: {}/{} successful, {} failed",
        operation, successful, total, failed
    );

    if failed == 0 {
        info(source, None, &message);
    } else if successful == 0 {
        error(source, None, &message);
    } else {
        warn(source, None, &message);
    }
}
