//! HTTP client utilities.
//!
//! Source clients receive an explicitly built [`reqwest::Client`]; nothing
//! here is process-global.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, redirect};

use crate::error::{BridgeError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent to data sources.
pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; cgm-bridge/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Build a configured HTTP client.
///
/// Redirects are not followed.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    ClientBuilder::new()
        .timeout(timeout)
        .redirect(redirect::Policy::none())
        .default_headers(headers)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| BridgeError::Network(e.to_string()))
}

/// Get a client with the default timeout.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn default_client() -> Result<Client> {
    build_client(DEFAULT_TIMEOUT)
}

/// Map a transport error to the bridge taxonomy.
#[must_use]
pub fn classify_error(source_name: &str, timeout: Duration, err: &reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Timeout {
            source_name: source_name.to_string(),
            seconds: timeout.as_secs(),
        }
    } else if err.is_decode() {
        BridgeError::ParseResponse(err.to_string())
    } else {
        BridgeError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_the_crate() {
        assert!(USER_AGENT.contains("cgm-bridge/"));
    }

    #[test]
    fn client_builds_with_default_timeout() {
        assert!(default_client().is_ok());
    }
}
