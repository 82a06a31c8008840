//! Configuration loading and application paths.

pub mod config;
pub mod paths;

pub use config::{
    Config, ConfigSource, ConfigSources, ResolvedConfig, ENV_CONFIG, ENV_EMAIL, ENV_INTERVAL_MS,
    ENV_OUTPUT, ENV_PASSWORD, ENV_SERVER, ENV_TIMEZONE_OFFSET,
};
pub use paths::AppPaths;
