//! Error types for cgm-bridge.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into five main categories:
//! - **Authentication**: Rejected logins, missing patient identifiers, failed refreshes
//! - **Network**: Connection, timeout, or transport issues
//! - **Configuration**: Config file parsing, validation, or missing credentials
//! - **Source**: Data fetch failures, rejected sessions, malformed payloads, transform failures
//! - **Internal**: Unexpected errors, bugs, or unclassified issues
//!
//! Each error has a stable error code (e.g., `CGMB-A001`) for programmatic handling.
//!
//! ## Retry Semantics
//!
//! The polling scheduler is the single place that decides between retrying,
//! backing off and reporting a terminal failure. It asks two questions of an
//! error: [`BridgeError::is_authentication`] (terminal for the cycle) and
//! [`BridgeError::is_retryable`] (eligible for backoff).

pub mod suggestions;

use thiserror::Error;

pub use suggestions::FixSuggestion;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Authentication issues (rejected credentials, unusable sessions).
    Authentication,
    /// Network issues (timeout, connection refused, transport errors).
    Network,
    /// Configuration issues (parse errors, invalid values, missing credentials).
    Configuration,
    /// Source-side issues (API errors, malformed payloads, transform failures).
    Source,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Network => "Network error",
            Self::Configuration => "Configuration error",
            Self::Source => "Source error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Network => "N",
            Self::Configuration => "C",
            Self::Source => "S",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the `cgm-bridge` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Credentials were rejected by the source
    AuthError = 2,
    /// Configuration could not be loaded or validated
    ConfigError = 3,
    /// Timeout
    Timeout = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Main error type for cgm-bridge operations.
///
/// Each variant has:
/// - A stable error code (e.g., `CGMB-A001`)
/// - A category for classification
/// - A retryable flag for the scheduler's backoff decision
#[derive(Error, Debug)]
pub enum BridgeError {
    // ==========================================================================
    // Authentication errors (Category: Authentication)
    // ==========================================================================
    /// The source rejected the credentials or could not produce a session.
    #[error("authentication failed for {source_name}: {reason}")]
    AuthenticationFailed {
        source_name: String,
        reason: String,
    },

    /// Refreshing an existing session failed. Absorbed by the session manager.
    #[error("session refresh failed for {source_name}: {reason}")]
    RefreshFailed {
        source_name: String,
        reason: String,
    },

    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// Request timed out after the client's timeout.
    #[error("request timeout after {seconds}s for {source_name}")]
    Timeout {
        source_name: String,
        seconds: u64,
    },

    /// Transport-level failure (DNS, TLS, connection reset).
    #[error("network error: {0}")]
    Network(String),

    // ==========================================================================
    // Source errors (Category: Source)
    // ==========================================================================
    /// A data request for one kind failed.
    #[error("fetch of {kind} failed for {source_name}: {reason}")]
    FetchFailed {
        source_name: String,
        kind: String,
        reason: String,
    },

    /// The source no longer accepts the session it issued.
    #[error("{source_name} rejected the session (HTTP {status_code})")]
    SessionRejected {
        source_name: String,
        status_code: u16,
    },

    /// The source API returned a non-success status.
    #[error("{source_name} API error: {message}")]
    SourceApiError {
        source_name: String,
        status_code: Option<u16>,
        message: String,
    },

    /// Failed to parse a source response.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    /// The alignment or transform step could not produce output records.
    #[error("transform failed: {reason}")]
    TransformFailed {
        reason: String,
    },

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse {
        path: String,
        message: String,
    },

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid {
        key: String,
        message: String,
    },

    /// A required credential was not supplied.
    #[error("missing credential: {name}")]
    MissingCredential {
        name: String,
    },

    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // I/O errors (Category: Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    /// Map error to the process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::AuthenticationFailed { .. } | Self::RefreshFailed { .. } => ExitCode::AuthError,

            Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. }
            | Self::MissingCredential { .. }
            | Self::Config(_) => ExitCode::ConfigError,

            Self::Timeout { .. } => ExitCode::Timeout,

            Self::Network(_)
            | Self::FetchFailed { .. }
            | Self::SessionRejected { .. }
            | Self::SourceApiError { .. }
            | Self::ParseResponse(_)
            | Self::TransformFailed { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthenticationFailed { .. } | Self::RefreshFailed { .. } => {
                ErrorCategory::Authentication
            }

            Self::Timeout { .. } | Self::Network(_) => ErrorCategory::Network,

            Self::FetchFailed { .. }
            | Self::SessionRejected { .. }
            | Self::SourceApiError { .. }
            | Self::ParseResponse(_)
            | Self::TransformFailed { .. } => ErrorCategory::Source,

            Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. }
            | Self::MissingCredential { .. }
            | Self::Config(_) => ErrorCategory::Configuration,

            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `CGMB-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed { .. } => "CGMB-A001",
            Self::RefreshFailed { .. } => "CGMB-A002",

            Self::Timeout { .. } => "CGMB-N001",
            Self::Network(_) => "CGMB-N099",

            Self::FetchFailed { .. } => "CGMB-S001",
            Self::SessionRejected { .. } => "CGMB-S002",
            Self::SourceApiError { .. } => "CGMB-S003",
            Self::ParseResponse(_) => "CGMB-S010",
            Self::TransformFailed { .. } => "CGMB-S020",

            Self::ConfigParse { .. } => "CGMB-C001",
            Self::ConfigInvalid { .. } => "CGMB-C002",
            Self::MissingCredential { .. } => "CGMB-C003",
            Self::Config(_) => "CGMB-C004",

            Self::Io(_) => "CGMB-X001",
            Self::Json(_) => "CGMB-X002",
            Self::Other(_) => "CGMB-X099",
        }
    }

    /// Returns whether the error was raised by the source rejecting
    /// credentials. Waiting will not fix these, so the scheduler reports them
    /// immediately instead of backing off.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    /// Returns whether the error is eligible for the scheduler's backoff.
    ///
    /// Transform failures count as retryable: a malformed batch from the
    /// source is as likely to be transient as a failed request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Network(_)
                | Self::FetchFailed { .. }
                | Self::SessionRejected { .. }
                | Self::SourceApiError { .. }
                | Self::ParseResponse(_)
                | Self::TransformFailed { .. }
                | Self::RefreshFailed { .. }
                | Self::Io(_)
                | Self::Json(_)
                | Self::Other(_)
        )
    }

    /// Returns whether the current session should be discarded before retrying.
    #[must_use]
    pub const fn invalidates_session(&self) -> bool {
        matches!(self, Self::SessionRejected { .. })
    }

    /// Returns the source name if this error is source-specific.
    #[must_use]
    pub fn source_name(&self) -> Option<&str> {
        match self {
            Self::AuthenticationFailed { source_name, .. }
            | Self::RefreshFailed { source_name, .. }
            | Self::Timeout { source_name, .. }
            | Self::FetchFailed { source_name, .. }
            | Self::SessionRejected { source_name, .. }
            | Self::SourceApiError { source_name, .. } => Some(source_name),
            _ => None,
        }
    }

    /// Returns actionable fix suggestions for this error.
    #[must_use]
    pub fn fix_suggestions(&self) -> Vec<FixSuggestion> {
        match self {
            Self::AuthenticationFailed { source_name, reason } => {
                suggestions::authentication_failed_suggestions(source_name, reason)
            }
            Self::MissingCredential { name } => suggestions::missing_credential_suggestions(name),
            Self::ConfigParse { path, message } => {
                suggestions::config_parse_suggestions(path, message)
            }
            Self::ConfigInvalid { key, message } => {
                suggestions::config_invalid_suggestions(key, message)
            }
            Self::Timeout { source_name, seconds } => {
                suggestions::timeout_suggestions(source_name, *seconds)
            }
            Self::Network(msg) => vec![FixSuggestion::new(
                vec!["cgm-bridge check".to_string()],
                format!("Network error: {msg}. Check your internet connection."),
            )],
            _ => Vec::new(),
        }
    }
}

/// Result type alias for cgm-bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
