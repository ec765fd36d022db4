//! Tracing setup for Ripstream
//!
//! Console output at the level the user picked, plus a full trace log of the
//! last run on disk for post-mortem debugging of session lifecycles.

use std::fs::{File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run log file.
pub const RUN_LOG_FILE: &str = "ripstream-last-run.log";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("Cannot prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Tracing already initialized: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Location of the run log inside `logs_dir` (defaults to "./logs").
pub fn run_log_path(logs_dir: Option<&Path>) -> PathBuf {
    logs_dir.unwrap_or_else(|| Path::new("logs")).join(RUN_LOG_FILE)
}

/// Initialize tracing with console output at `console_level` and a trace-level file.
///
/// Every event is also written to [`RUN_LOG_FILE`] in `logs_dir`, replacing
/// the previous run's log. `RUST_LOG` overrides the console filter only.
/// Returns the path of the run log.
///
/// # Errors
///
/// - `TracingError::LogFile` - Logs directory or file could not be created
/// - `TracingError::AlreadyInitialized` - A global subscriber is already set
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, TracingError> {
    let log_file_path = run_log_path(logs_dir);
    let log_file = open_run_log(&log_file_path).map_err(|source| TracingError::LogFile {
        path: log_file_path.clone(),
        source,
    })?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Tracing initialized: console={}, log_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(log_file_path)
}

fn open_run_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    File::create(path)
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Informational, warning, and error messages
    Info,
    /// Debug, informational, warning, and error messages
    Debug,
    /// All messages including detailed tracing
    Trace,
}

impl CliLogLevel {
    /// Converts the CLI log level to a tracing level.
    ///
    /// # Examples
    /// ```
    /// use ripstream_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Info.as_tracing_level();
    /// assert_eq!(level, tracing::Level::INFO);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(CliLogLevel::Error),
            "warn" => Ok(CliLogLevel::Warn),
            "info" => Ok(CliLogLevel::Info),
            "debug" => Ok(CliLogLevel::Debug),
            "trace" => Ok(CliLogLevel::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliLogLevel::Error => write!(f, "error"),
            CliLogLevel::Warn => write!(f, "warn"),
            CliLogLevel::Info => write!(f, "info"),
            CliLogLevel::Debug => write!(f, "debug"),
            CliLogLevel::Trace => write!(f, "trace"),
        }
    }
}
