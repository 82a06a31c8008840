//! Diagnostic logging to stderr or a file.
//!
//! Cycle results go to the output sink; everything here is diagnostics.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_LEVEL_ENV: &str = "CGM_BRIDGE_LOG";
pub const LOG_FORMAT_ENV: &str = "CGM_BRIDGE_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "CGM_BRIDGE_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable logs.
    #[default]
    Human,
    /// JSON logs (one event per line).
    Json,
    /// Compact logs (single line, terse).
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Log level from a CLI argument or the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn as_tracing_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Log level from `CGM_BRIDGE_LOG`.
#[must_use]
pub fn parse_log_level_from_env() -> Option<LogLevel> {
    non_empty_env(LOG_LEVEL_ENV).and_then(|v| LogLevel::from_arg(&v))
}

/// Log format from `CGM_BRIDGE_LOG_FORMAT`.
#[must_use]
pub fn parse_log_format_from_env() -> Option<LogFormat> {
    non_empty_env(LOG_FORMAT_ENV).and_then(|v| LogFormat::from_arg(&v))
}

/// Log file from `CGM_BRIDGE_LOG_FILE`.
#[must_use]
pub fn parse_log_file_from_env() -> Option<PathBuf> {
    non_empty_env(LOG_FILE_ENV).map(PathBuf::from)
}

/// Effective settings: the CLI level wins over the environment; `--verbose`
/// lowers anything above debug to debug; `--json-output` forces JSON.
#[must_use]
pub fn resolve(
    cli_level: Option<&str>,
    verbose: bool,
    json_output: bool,
) -> (LogLevel, LogFormat, Option<PathBuf>) {
    let level = cli_level
        .and_then(LogLevel::from_arg)
        .or_else(parse_log_level_from_env)
        .unwrap_or_default();
    let level = if verbose && matches!(level, LogLevel::Info | LogLevel::Warn | LogLevel::Error) {
        LogLevel::Debug
    } else {
        level
    };
    let format = if json_output {
        LogFormat::Json
    } else {
        parse_log_format_from_env().unwrap_or_default()
    };
    (level, format, parse_log_file_from_env())
}

fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// Install the global subscriber. A second call is a no-op.
///
/// `RUST_LOG` overrides the level filter when set.
pub fn init(level: LogLevel, format: LogFormat, log_file: Option<PathBuf>) {
    let file = log_file.as_deref().and_then(open_log_file);

    let make_writer = || -> BoxMakeWriter {
        if let Some(file) = file.as_ref().and_then(|inner| inner.try_clone().ok()) {
            BoxMakeWriter::new(file)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        }
    };

    let make_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("cgm_bridge={}", level.as_filter())))
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .json()
                .with_writer(make_writer())
                .with_span_events(FmtSpan::CLOSE)
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .compact()
                .with_writer(make_writer())
                .with_target(true)
                .try_init()
                .ok();
        }
        LogFormat::Human => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .with_writer(make_writer())
                .with_target(false)
                .try_init()
                .ok();
        }
    }
}
