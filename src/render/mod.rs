//! Output rendering for the `check` command and errors.

pub mod error;

use serde::Serialize;

use crate::error::Result;

/// Outcome of `cgm-bridge check`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub config_path: String,
    pub server: String,
    pub email: String,
    pub account_id: String,
    pub expected_data_interval_ms: u64,
    pub timezone_offset_ms: i64,
}

/// Render a check report as text or a JSON line.
///
/// # Errors
///
/// Returns error if JSON serialization fails.
pub fn render_check(report: &CheckReport, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string(report)?);
    }
    Ok([
        format!("Config:    {}", report.config_path),
        format!("Server:    {}", report.server),
        format!("Account:   {} (patient {})", report.email, report.account_id),
        format!("Interval:  {} ms", report.expected_data_interval_ms),
        format!("TZ offset: {} ms", report.timezone_offset_ms),
        "Sign-in OK".to_string(),
    ]
    .join("\n"))
}
