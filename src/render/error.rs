//! Error rendering for the `cgm-bridge` binary.
//!
//! Plain text with the first fix suggestion for terminals, or a JSON object
//! when `--json-output` is set.

use crate::error::BridgeError;

/// Render an error for stderr.
#[must_use]
pub fn render_error(error: &BridgeError, json: bool) -> String {
    if json {
        render_error_json(error)
    } else {
        render_simple(error)
    }
}

/// Render an error as a single-line JSON object.
#[must_use]
pub fn render_error_json(error: &BridgeError) -> String {
    serde_json::to_string(&ErrorJson::from_error(error)).unwrap_or_else(|_| render_simple(error))
}

fn render_simple(error: &BridgeError) -> String {
    let suggestions = error.fix_suggestions();
    let mut lines = vec![format!("Error [{}]: {}", error.error_code(), error)];

    if let Some(suggestion) = suggestions.first() {
        if let Some(cmd) = suggestion.commands.iter().find(|c| !c.starts_with('#')) {
            lines.push(format!("Fix: {cmd}"));
        }
        if !suggestion.context.is_empty() {
            lines.push(format!("Why: {}", suggestion.context));
        }
    }

    lines.join("\n")
}

#[derive(serde::Serialize)]
struct ErrorJson {
    error_code: String,
    category: String,
    message: String,
    is_retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    suggestions: Vec<SuggestionJson>,
}

#[derive(serde::Serialize)]
struct SuggestionJson {
    commands: Vec<String>,
    context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prevention: Option<String>,
}

impl ErrorJson {
    fn from_error(error: &BridgeError) -> Self {
        Self {
            error_code: error.error_code().to_string(),
            category: error.category().to_string(),
            message: error.to_string(),
            is_retryable: error.is_retryable(),
            source: error.source_name().map(String::from),
            suggestions: error
                .fix_suggestions()
                .into_iter()
                .map(|s| SuggestionJson {
                    commands: s.commands,
                    context: s.context,
                    prevention: s.prevention,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_output_includes_code_and_fix() {
        let err = BridgeError::MissingCredential {
            name: "CONNECT_GLOOKO_EMAIL".to_string(),
        };
        let output = render_error(&err, false);
        assert!(output.starts_with("Error [CGMB-C003]"));
        assert!(output.contains("Fix: "));
    }

    #[test]
    fn json_output_is_structured() {
        let err = BridgeError::Timeout {
            source_name: "glooko".to_string(),
            seconds: 30,
        };
        let parsed: serde_json::Value = serde_json::from_str(&render_error(&err, true)).unwrap();
        assert_eq!(parsed["source"], "glooko");
        assert_eq!(parsed["is_retryable"], true);
        assert!(parsed["error_code"].is_string());
        assert!(!render_error(&err, true).contains('\n'));
    }

    #[test]
    fn errors_without_suggestions_render_header_only() {
        let err = BridgeError::TransformFailed {
            reason: "bad".to_string(),
        };
        assert_eq!(render_error(&err, false).lines().count(), 1);
    }
}
