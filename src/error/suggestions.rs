//! Fix suggestions for cgm-bridge errors.
//!
//! Maps the operator-actionable errors (bad credentials, bad configuration,
//! unreachable source) to commands and short explanations.

// =============================================================================
// Fix Suggestion Types
// =============================================================================

/// A fix suggestion for an error.
#[derive(Debug, Clone)]
pub struct FixSuggestion {
    /// Commands to try, in order of preference.
    pub commands: Vec<String>,

    /// Explanation of why this error occurred.
    pub context: String,

    /// Tips to prevent this error in the future.
    pub prevention: Option<String>,
}

impl FixSuggestion {
    /// Creates a new fix suggestion with required fields.
    #[must_use]
    pub fn new(commands: Vec<String>, context: impl Into<String>) -> Self {
        Self {
            commands,
            context: context.into(),
            prevention: None,
        }
    }

    /// Builder: adds prevention tips.
    #[must_use]
    pub fn with_prevention(mut self, prevention: impl Into<String>) -> Self {
        self.prevention = Some(prevention.into());
        self
    }
}

// =============================================================================
// Suggestion Generators
// =============================================================================

/// Suggestions when the source rejects the configured credentials.
#[must_use]
pub fn authentication_failed_suggestions(source_name: &str, reason: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["cgm-bridge check".to_string()],
            format!("{source_name} rejected the login ({reason})."),
        )
        .with_prevention(
            "Sign in once through the vendor's own app to confirm the account is active.",
        ),
    ]
}

/// Suggestions when a required credential is absent.
#[must_use]
pub fn missing_credential_suggestions(name: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("export {name}=...")],
        format!("{name} is required to sign in to the data source."),
    )]
}

/// Suggestions for an unparsable config file.
#[must_use]
pub fn config_parse_suggestions(path: &str, message: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("$EDITOR {path}")],
        format!("The config file could not be parsed: {message}"),
    )]
}

/// Suggestions for a config value that failed validation.
#[must_use]
pub fn config_invalid_suggestions(key: &str, message: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["cgm-bridge check".to_string()],
        format!("'{key}' is invalid: {message}"),
    )]
}

/// Suggestions for a request that timed out.
#[must_use]
pub fn timeout_suggestions(source_name: &str, seconds: u64) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["cgm-bridge check".to_string()],
            format!("{source_name} did not answer within {seconds}s."),
        )
        .with_prevention("Transient timeouts are retried automatically with backoff."),
    ]
}
