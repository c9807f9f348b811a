//! Structured logging setup.
//!
//! The `logging` section of [`crate::SyncConfig`] decides the console and
//! file verbosity. Console output is human-readable, the rolling file is
//! JSON. `RUST_LOG` overrides the console filter.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Target of this crate's events in filter directives.
const CRATE_TARGET: &str = "playsync_core";

/// Dependencies that are too chatty below `warn`.
const QUIET_TARGETS: [&str; 3] = ["reqwest", "hyper_util", "rustls"];

/// Verbosity of a log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-poll traces.
    Trace,
    /// Scheduling and reconciliation details.
    Debug,
    /// Lifecycle events.
    Info,
    /// Absorbed failures.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    const fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Log file rotation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// New file every hour.
    Hourly,
    /// New file every day.
    Daily,
    /// Single file.
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

/// Logging section of the sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory of the rolling log files; the platform data dir when unset.
    pub directory: Option<PathBuf>,
    /// File name prefix of the rolling log files.
    pub file_prefix: String,
    /// Verbosity of this crate on the console.
    pub console_level: LogLevel,
    /// Verbosity of dependencies in the log file.
    pub file_level: LogLevel,
    /// Rotation of the log file.
    pub rotation: LogRotation,
    /// Colored console output.
    pub ansi: bool,
    /// Source locations and span open/close events on the console.
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LoggingConfig {
    /// Debug console output, traced spans and hourly files.
    #[must_use]
    pub fn development() -> Self {
        Self {
            directory: None,
            file_prefix: "playsync".to_string(),
            console_level: LogLevel::Debug,
            file_level: LogLevel::Debug,
            rotation: LogRotation::Hourly,
            ansi: true,
            verbose: true,
        }
    }

    /// Info console output and daily files.
    #[must_use]
    pub fn production() -> Self {
        Self {
            directory: None,
            file_prefix: "playsync".to_string(),
            console_level: LogLevel::Info,
            file_level: LogLevel::Info,
            rotation: LogRotation::Daily,
            ansi: true,
            verbose: false,
        }
    }

    /// [`Self::development`] in debug builds, [`Self::production`] otherwise.
    #[must_use]
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::development()
        } else {
            Self::production()
        }
    }

    /// Directory the log files are written to.
    #[must_use]
    pub fn log_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_log_directory)
    }

    /// Filter directives for the console layer.
    fn console_directives(&self) -> String {
        directives(LogLevel::Warn, self.console_level)
    }

    /// Filter directives for the file layer; this crate is always traced.
    fn file_directives(&self) -> String {
        directives(self.file_level, LogLevel::Trace)
    }
}

/// `base` for everything, `own` for this crate, warn for noisy dependencies.
fn directives(base: LogLevel, own: LogLevel) -> String {
    let mut directives = vec![
        base.directive().to_string(),
        format!("{CRATE_TARGET}={}", own.directive()),
    ];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Flushes the log file when dropped.
pub struct LoggingGuard {
    _worker: tracing_appender::non_blocking::WorkerGuard,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard").finish_non_exhaustive()
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for as long as the process logs.
///
/// # Errors
///
/// Fails if the log directory cannot be created or a subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let directory = config.log_directory();
    std::fs::create_dir_all(&directory).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: directory.clone(),
        reason: e.to_string(),
    })?;

    let appender = RollingFileAppender::new(config.rotation.into(), &directory, &config.file_prefix);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.console_directives()));
    let console_spans = if config.verbose {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console = fmt::layer()
        .with_ansi(config.ansi)
        .with_target(config.verbose)
        .with_file(config.verbose)
        .with_line_number(config.verbose)
        .with_span_events(console_spans)
        .with_filter(console_filter);

    let file = fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_current_span(true)
        .with_filter(EnvFilter::new(config.file_directives()));

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        directory = %directory.display(),
        console = config.console_level.directive(),
        "Logging initialized"
    );
    Ok(LoggingGuard { _worker: worker })
}

/// `<data-local-dir>/playsync/logs`.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("playsync")
        .join("logs")
}

/// Logging initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
