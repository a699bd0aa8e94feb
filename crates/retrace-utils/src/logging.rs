//! # Logging Utilities
//!
//! Logging infrastructure for Retrace using `tracing`.
//!
//! The unwinder emits one `unwind` span per request and `debug`/`trace`
//! events for every decision it takes. This module turns those into output:
//! - Pretty (development) or JSON (machine-readable) format
//! - RFC 3339 UTC timestamps
//! - Console output on **stderr**, so traces printed on stdout stay clean
//! - Optional file output through `tracing-appender`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use retrace_utils::{init_logging, LoggingConfig};
//!
//! let config = LoggingConfig::from_env().expect("bad logging environment");
//! // Keep the guard alive for as long as file logging should flush.
//! let _guard = init_logging(&config).expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: level filter (e.g. `RUST_LOG=debug`, `RUST_LOG=retrace_core::unwind=trace`)
//! - `RETRACE_LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
//! - `RETRACE_LOG_FILE`: optional log file. Rotated daily, unless the path
//!   contains `{date}`, which is replaced by today's date instead.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{DefaultFields, Format, Full, Json, JsonFields};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Environment variable selecting the output format.
pub const FORMAT_VAR: &str = "RETRACE_LOG_FORMAT";

/// Environment variable naming the log file.
pub const FILE_VAR: &str = "RETRACE_LOG_FILE";

/// Placeholder in a log file path replaced by the current UTC date.
const DATE_PLACEHOLDER: &str = "{date}";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default for development)
    #[default]
    Pretty,
    /// JSON format, one object per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    Info,
    /// Debug level: every unwind decision
    Debug,
    /// Trace level: every rejected stack word
    Trace,
}

impl LogLevel
{
    /// Level for a count of `-v` flags: none is `Warn`, then `Info`,
    /// `Debug` and `Trace`.
    pub fn from_verbosity(count: u8) -> Self
    {
        match count {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Where and how to log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig
{
    /// Level that overrides `RUST_LOG` (e.g. from `-v` flags).
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    /// Log file, if any.
    pub file: Option<PathBuf>,
    /// Colour console output.
    pub ansi: bool,
}

impl LoggingConfig
{
    /// Configuration from `RETRACE_LOG_FORMAT` and `RETRACE_LOG_FILE`.
    ///
    /// ## Errors
    ///
    /// Returns [`LoggingError::InvalidFormat`] for an unknown format name.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        Self::from_vars(env::var(FORMAT_VAR).ok().as_deref(), env::var(FILE_VAR).ok().as_deref())
    }

    /// Configuration from the values of the two environment variables.
    ///
    /// ## Errors
    ///
    /// Returns [`LoggingError::InvalidFormat`] for an unknown format name.
    pub fn from_vars(format: Option<&str>, file: Option<&str>) -> Result<Self, LoggingError>
    {
        let format = match format.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.parse().map_err(LoggingError::InvalidFormat)?,
            None => LogFormat::Pretty,
        };
        Ok(Self {
            level: None,
            format,
            file: file.map(str::trim).filter(|value| !value.is_empty()).map(PathBuf::from),
            ansi: true,
        })
    }

    /// Override the level filter.
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self
    {
        self.level = Some(level);
        self
    }

    /// Level filter: the explicit level, else `RUST_LOG`, else `INFO`.
    ///
    /// ## Errors
    ///
    /// Returns [`LoggingError::InvalidLevel`] when `RUST_LOG` cannot be parsed.
    pub fn filter(&self) -> Result<EnvFilter, LoggingError>
    {
        if let Some(level) = self.level {
            return Ok(EnvFilter::new(Level::from(level).to_string()));
        }
        match env::var("RUST_LOG") {
            Ok(directives) => EnvFilter::try_new(&directives).map_err(|err| LoggingError::InvalidLevel(err.to_string())),
            Err(_) => Ok(EnvFilter::new(Level::INFO.to_string())),
        }
    }
}

/// Replace `{date}` in `path` with `date` (`YYYY-MM-DD`).
pub fn expand_log_path(path: &Path, date: &str) -> PathBuf
{
    PathBuf::from(path.to_string_lossy().replace(DATE_PLACEHOLDER, date))
}

/// Initialize logging with the environment's configuration.
///
/// ## Errors
///
/// See [`init_logging`].
pub fn init_logging_from_env() -> Result<Option<WorkerGuard>, LoggingError>
{
    init_logging(&LoggingConfig::from_env()?)
}

/// Initialize logging.
///
/// Returns the file writer's guard when file logging is enabled; buffered
/// lines are flushed when it is dropped.
///
/// ## Example
///
/// ```rust,no_run
/// use retrace_utils::{init_logging, LogFormat, LogLevel, LoggingConfig};
///
/// let config = LoggingConfig {
///     format: LogFormat::Json,
///     ..LoggingConfig::default()
/// }
/// .with_level(LogLevel::Debug);
/// let _guard = init_logging(&config).expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `RUST_LOG` is invalid
/// - The log file's directory cannot be created
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError>
{
    let filter = config.filter()?;

    let (file_writer, guard) = match &config.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let json = config.format == LogFormat::Json;
    let ansi = config.ansi;
    Registry::default()
        .with(filter)
        .with((!json).then(|| pretty_layer(io::stderr, ansi)))
        .with(json.then(|| json_layer(io::stderr)))
        .with(file_writer.clone().filter(|_| !json).map(|writer| pretty_layer(writer, false)))
        .with(file_writer.filter(|_| json).map(json_layer))
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    tracing::debug!(format = ?config.format, file = ?config.file, "logging initialized");
    Ok(guard)
}

fn file_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender, LoggingError>
{
    let dated = path.to_string_lossy().contains(DATE_PLACEHOLDER);
    let path = if dated {
        expand_log_path(path, &Utc::now().format("%Y-%m-%d").to_string())
    } else {
        path.to_path_buf()
    };

    let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(directory).map_err(LoggingError::FileError)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InitializationFailed(format!("log path {} has no file name", path.display())))?;

    // A dated name already rotates; rolling it again would add a second date.
    Ok(if dated {
        tracing_appender::rolling::never(directory, file_name)
    } else {
        tracing_appender::rolling::daily(directory, file_name)
    })
}

fn pretty_layer<S, W>(writer: W, ansi: bool) -> fmt::Layer<S, DefaultFields, Format<Full, ChronoUtc>, W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(ansi)
}

fn json_layer<S, W>(writer: W) -> fmt::Layer<S, JsonFields, Format<Json, ChronoUtc>, W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .json()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_current_span(true)
        .with_span_list(true)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level or filter directive
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("PROD").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_str("invalid").is_err());
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warn").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("debug").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("invalid").is_err());
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_verbosity_levels()
    {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(2), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(9), LogLevel::Trace);
    }

    #[test]
    fn test_config_from_vars()
    {
        let config = LoggingConfig::from_vars(Some("json"), Some("/var/log/retrace.log")).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/var/log/retrace.log")));
        assert_eq!(config.level, None);

        let config = LoggingConfig::from_vars(None, Some("  ")).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.file, None);

        let err = LoggingConfig::from_vars(Some("xml"), None).unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFormat(_)));
    }

    #[test]
    fn test_explicit_level_wins_over_rust_log()
    {
        let config = LoggingConfig::default().with_level(LogLevel::Trace);
        let filter = config.filter().unwrap();
        assert_eq!(filter.to_string(), "trace");
    }

    #[test]
    fn test_expand_log_path()
    {
        let path = expand_log_path(Path::new("/tmp/{date}-retrace.log"), "2026-10-19");
        assert_eq!(path, PathBuf::from("/tmp/2026-10-19-retrace.log"));

        let plain = expand_log_path(Path::new("/tmp/retrace.log"), "2026-10-19");
        assert_eq!(plain, PathBuf::from("/tmp/retrace.log"));
    }
}
