//! Per-test progress logging.
#![allow(dead_code)]
//!
//! Writes one line per step to stderr so a failing integration test shows how
//! far it got. Lines are plain text, or JSON when `TEST_LOG_JSON` is set.
//!
//! # Usage
//!
//! ```rust,ignore
//! let log = TestLogger::new("driver_retries_then_gives_up");
//! log.phase("setup");
//! log.http_request("GET", &url);
//! log.finish_ok();
//! ```
//!
//! # Environment Variables
//!
//! - `TEST_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! - `TEST_LOG_JSON` - "1" or "true" for JSON lines

use std::env;
use std::fmt::Display;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use super::log_capture::TestLogCapture;

/// Severity of a test log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    min_level: LogLevel,
    json: bool,
}

fn settings() -> Settings {
    static SETTINGS: OnceLock<Settings> = OnceLock::new();
    *SETTINGS.get_or_init(|| Settings {
        min_level: env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info),
        json: env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
    })
}

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: String,
    level: LogLevel,
    test: &'a str,
    phase: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
}

/// Logger scoped to one test function.
pub struct TestLogger {
    test_name: String,
    started: Instant,
    phase: Mutex<String>,
}

impl TestLogger {
    #[must_use]
    pub fn new(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            started: Instant::now(),
            phase: Mutex::new("init".to_string()),
        };
        logger.emit(LogLevel::Info, "Test starting", None);
        logger
    }

    /// Logger plus a capture of tracing events emitted on this thread.
    pub fn with_capture(test_name: &str) -> (Self, TestLogCapture) {
        let capture = TestLogCapture::start();
        (Self::new(test_name), capture)
    }

    pub fn phase(&self, phase: &str) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase.to_string();
        }
        self.emit(LogLevel::Debug, &format!("Phase: {phase}"), None);
    }

    pub fn debug(&self, message: &str) {
        self.emit(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.emit(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.emit(LogLevel::Warn, message, None);
    }

    pub fn http_request(&self, method: &str, url: &str) {
        self.debug(&format!("HTTP {method} {url}"));
    }

    pub fn finish_ok(&self) {
        let elapsed = self.elapsed_ms();
        self.emit(LogLevel::Info, "Test passed", Some(elapsed));
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn emit(&self, level: LogLevel, message: &str, elapsed_ms: Option<u64>) {
        let settings = settings();
        if level < settings.min_level {
            return;
        }
        let phase = self
            .phase
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default();
        let line = LogLine {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            level,
            test: &self.test_name,
            phase: &phase,
            message,
            elapsed_ms,
        };
        if settings.json {
            if let Ok(json) = serde_json::to_string(&line) {
                eprintln!("{json}");
            }
        } else {
            let suffix = elapsed_ms.map(|ms| format!(" ({ms}ms)")).unwrap_or_default();
            eprintln!(
                "[{}] [{}] [{}:{}] {}{suffix}",
                line.timestamp, line.level, line.test, line.phase, line.message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing_and_ordering() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("nope"), None);
        assert!(LogLevel::Debug < LogLevel::Info);
    }

    #[test]
    fn logger_runs_through_phases() {
        let log = TestLogger::new("logger_runs_through_phases");
        log.phase("setup");
        log.http_request("GET", "http://127.0.0.1/api/v2/cgm/readings");
        log.finish_ok();
    }
}
