//! Configuration file loading and resolution.
//!
//! Loads configuration from `<config dir>/config.toml` (see [`AppPaths`]),
//! overridable with `--config` or `CGM_BRIDGE_CONFIG`.
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `CONNECT_GLOOKO_EMAIL`, `CONNECT_GLOOKO_PASSWORD`: account credentials
//! - `CONNECT_GLOOKO_SERVER`: API host (`default`, `eu.api.glooko.com`, or a URL)
//! - `CONNECT_GLOOKO_TIMEZONE_OFFSET`: hours; non-numeric values mean 0
//! - `CGM_BRIDGE_INTERVAL_MS`: expected data interval
//! - `CGM_BRIDGE_OUTPUT`: results file (default stdout)
//! - `CGM_BRIDGE_CONFIG`: config file path

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::cli::args::Cli;
use crate::core::backoff::BackoffSpec;
use crate::core::models::DriverConfig;
use crate::core::session::SessionDelays;
use crate::core::source::Credentials;
use crate::error::{BridgeError, Result};
use crate::sources::glooko;

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const ENV_EMAIL: &str = "CONNECT_GLOOKO_EMAIL";
pub const ENV_PASSWORD: &str = "CONNECT_GLOOKO_PASSWORD";
pub const ENV_SERVER: &str = "CONNECT_GLOOKO_SERVER";
pub const ENV_TIMEZONE_OFFSET: &str = "CONNECT_GLOOKO_TIMEZONE_OFFSET";
pub const ENV_INTERVAL_MS: &str = "CGM_BRIDGE_INTERVAL_MS";
pub const ENV_OUTPUT: &str = "CGM_BRIDGE_OUTPUT";
pub const ENV_CONFIG: &str = "CGM_BRIDGE_CONFIG";

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Largest accepted timezone offset, in hours either side of UTC.
pub const MAX_TIMEZONE_OFFSET_HOURS: i64 = 14;

// =============================================================================
// File Configuration
// =============================================================================

/// Contents of `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub glooko: GlookoSection,
    pub driver: DriverSection,
    pub output: OutputSection,
    pub general: GeneralSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlookoSection {
    pub email: Option<String>,
    pub password: Option<String>,
    pub server: Option<String>,
    /// Hours; the driver shifts timestamps by `-hours`.
    pub timezone_offset_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSection {
    pub refresh_delay_ms: Option<u64>,
    pub expire_delay_ms: Option<u64>,
    pub expected_data_interval_ms: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Results file. Unset means stdout.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSection {
    /// HTTP request timeout.
    pub timeout_seconds: Option<u64>,
}

impl Config {
    /// Load from `path`. A missing file yields the default (empty) config.
    ///
    /// # Errors
    ///
    /// `ConfigParse` if the file exists but is not valid TOML for this schema.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BridgeError::ConfigParse {
            path: path.display().to_string(),
            message: e.message().to_string(),
        })
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    ConfigFile,
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Source of each user-facing setting.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub email: ConfigSource,
    pub password: ConfigSource,
    pub server: ConfigSource,
    pub timezone_offset: ConfigSource,
    pub interval: ConfigSource,
    pub output: ConfigSource,
}

/// Fully resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credentials: Credentials,
    pub server: String,
    pub driver: DriverConfig,
    pub timeout: Duration,
    /// Results file; `None` writes to stdout.
    pub output: Option<PathBuf>,
    pub config_path: PathBuf,
    pub sources: ConfigSources,
}

/// Picks the first value present, recording where it came from.
fn pick<T>(
    source: &mut ConfigSource,
    cli: Option<T>,
    env: Option<T>,
    file: Option<T>,
    default: T,
) -> T {
    let (value, from) = if let Some(v) = cli {
        (v, ConfigSource::Cli)
    } else if let Some(v) = env {
        (v, ConfigSource::Env)
    } else if let Some(v) = file {
        (v, ConfigSource::ConfigFile)
    } else {
        (default, ConfigSource::Default)
    };
    *source = from;
    value
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Timezone offset in hours to a timestamp shift in milliseconds.
///
/// A positive offset (hours ahead of UTC) shifts timestamps backwards.
#[must_use]
pub fn offset_hours_to_ms(hours: f64) -> i64 {
    if !hours.is_finite() {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let ms = (hours * -MS_PER_HOUR).round() as i64;
    ms
}

fn env_timezone_offset() -> Option<f64> {
    env_value(ENV_TIMEZONE_OFFSET).map(|raw| {
        raw.parse::<f64>().unwrap_or_else(|_| {
            tracing::warn!(value = %raw, "Timezone offset is not a number, using 0");
            0.0
        })
    })
}

fn env_interval() -> Result<Option<u64>> {
    env_value(ENV_INTERVAL_MS)
        .map(|raw| {
            raw.parse::<u64>().map_err(|_| BridgeError::ConfigInvalid {
                key: ENV_INTERVAL_MS.to_string(),
                message: format!("expected milliseconds, got '{raw}'"),
            })
        })
        .transpose()
}

impl ResolvedConfig {
    /// Resolve the configuration for a CLI invocation.
    ///
    /// # Errors
    ///
    /// Returns error if the config file is invalid or any resolved value
    /// fails validation. All validation problems are reported together.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .or_else(|| env_value(ENV_CONFIG).map(PathBuf::from))
            .unwrap_or_else(|| AppPaths::new().config_file());
        let file = Config::load_from(&config_path)?;
        let mut sources = ConfigSources::default();

        let email = pick(
            &mut sources.email,
            None,
            env_value(ENV_EMAIL),
            file.glooko.email.clone(),
            String::new(),
        );
        let password = pick(
            &mut sources.password,
            None,
            env_value(ENV_PASSWORD),
            file.glooko.password.clone(),
            String::new(),
        );
        let server = pick(
            &mut sources.server,
            cli.server.clone(),
            env_value(ENV_SERVER),
            file.glooko.server.clone(),
            glooko::DEFAULT_SERVER.to_string(),
        );
        let offset_hours = pick(
            &mut sources.timezone_offset,
            None,
            env_timezone_offset(),
            file.glooko.timezone_offset_hours,
            0.0,
        );
        let interval_ms = pick(
            &mut sources.interval,
            cli.interval_ms,
            env_interval()?,
            file.driver.expected_data_interval_ms,
            glooko::EXPECTED_DATA_INTERVAL_MS,
        );
        let output = pick(
            &mut sources.output,
            cli.output.clone().map(Some),
            env_value(ENV_OUTPUT).map(|p| Some(PathBuf::from(p))),
            file.output.path.clone().map(Some),
            None,
        );

        let driver = DriverConfig {
            refresh_delay_ms: file
                .driver
                .refresh_delay_ms
                .unwrap_or(glooko::REFRESH_DELAY_MS),
            expire_delay_ms: file
                .driver
                .expire_delay_ms
                .unwrap_or(glooko::EXPIRE_DELAY_MS),
            expected_data_interval_ms: interval_ms,
            backoff: BackoffSpec {
                base_interval_ms: file
                    .driver
                    .backoff_base_ms
                    .unwrap_or(glooko::BACKOFF_BASE_MS),
                max_attempts: file
                    .driver
                    .backoff_max_attempts
                    .unwrap_or(glooko::BACKOFF_MAX_ATTEMPTS),
            },
            timezone_offset_ms: offset_hours_to_ms(offset_hours),
        };

        let resolved = Self {
            credentials: Credentials::new(email, password),
            server,
            driver,
            timeout: Duration::from_secs(file.general.timeout_seconds.unwrap_or(30)),
            output,
            config_path,
            sources,
        };
        resolved.validate()?;

        tracing::debug!(
            config = %resolved.config_path.display(),
            server = %resolved.server,
            interval_ms = resolved.driver.expected_data_interval_ms,
            timezone_offset_ms = resolved.driver.timezone_offset_ms,
            email_from = %resolved.sources.email,
            "Configuration resolved"
        );
        Ok(resolved)
    }

    /// Check every setting and report all problems at once.
    ///
    /// # Errors
    ///
    /// The single problem found, or a combined `Config` error listing all of them.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.credentials.username.is_empty() {
            problems.push(BridgeError::MissingCredential {
                name: ENV_EMAIL.to_string(),
            });
        }
        if self.credentials.password.is_empty() {
            problems.push(BridgeError::MissingCredential {
                name: ENV_PASSWORD.to_string(),
            });
        }
        if let Err(e) =
            SessionDelays::from_millis(self.driver.refresh_delay_ms, self.driver.expire_delay_ms)
        {
            problems.push(e);
        }
        if self.driver.expected_data_interval_ms == 0 {
            problems.push(BridgeError::ConfigInvalid {
                key: "expected_data_interval_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.driver.backoff.base_interval_ms == 0 {
            problems.push(BridgeError::ConfigInvalid {
                key: "backoff_base_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.driver.timezone_offset_ms.unsigned_abs()
            > MAX_TIMEZONE_OFFSET_HOURS.unsigned_abs() * 3_600_000
        {
            problems.push(BridgeError::ConfigInvalid {
                key: "timezone_offset_hours".to_string(),
                message: format!(
                    "must be within {MAX_TIMEZONE_OFFSET_HOURS} hours of UTC (got {} ms)",
                    self.driver.timezone_offset_ms
                ),
            });
        }
        if self.timeout.is_zero() || self.timeout > Duration::from_secs(300) {
            problems.push(BridgeError::ConfigInvalid {
                key: "timeout_seconds".to_string(),
                message: "must be between 1 and 300".to_string(),
            });
        }

        match problems.len() {
            0 => Ok(()),
            1 => Err(problems.remove(0)),
            _ => Err(BridgeError::Config(
                problems
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }
}
