//! Glooko REST API client.
//!
//! Signs in with an email and password to obtain a session cookie and a
//! patient code, then reads CGM and pump data for that patient.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::core::http::classify_error;
use crate::core::models::DataKind;
use crate::core::source::SessionToken;
use crate::error::{BridgeError, Result};

use super::SOURCE_NAME;

/// Default Glooko API host. EU accounts use `eu.api.glooko.com`.
pub const DEFAULT_SERVER: &str = "api.glooko.com";

/// Sent as `lastGuid` on every data request. Glooko requires the parameter
/// and accepts any value.
const LAST_GUID: &str = "1e0c094e-1e54-4a4f-8e6a-f94484b53789";

/// How far back data requests reach.
const LOOKBACK_HOURS: i64 = 48;

/// Expected spacing of CGM readings, used to size the `limit` parameter.
const READING_INTERVAL_MINUTES: i64 = 5;

const SIGN_IN_PATH: &str = "/api/v2/users/sign_in";
const SESSION_USERS_PATH: &str = "/api/v3/session/users";

/// Resolve the base URL for a server setting.
///
/// `"default"` or an empty value selects [`DEFAULT_SERVER`]; a bare host is
/// served over HTTPS; a value that already carries a scheme is used as is.
#[must_use]
pub fn base_url(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.is_empty() || server.eq_ignore_ascii_case("default") {
        format!("https://{DEFAULT_SERVER}")
    } else if server.contains("://") {
        server.to_string()
    } else {
        format!("https://{server}")
    }
}

/// API path for a data kind.
#[must_use]
pub const fn endpoint(kind: DataKind) -> &'static str {
    match kind {
        DataKind::CgmReadings => "/api/v2/cgm/readings",
        DataKind::NormalBoluses => "/api/v2/pumps/normal_boluses",
        DataKind::ScheduledBasals => "/api/v2/pumps/scheduled_basals",
    }
}

/// Query window for one data request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub limit: i64,
}

impl FetchWindow {
    /// Window ending at `now`, starting at the lookback horizon, and asking
    /// for enough readings to cover the gap since `since` (clamped to the
    /// horizon).
    #[must_use]
    pub fn new(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let start_date = now - TimeDelta::hours(LOOKBACK_HOURS);
        let last_updated_at = since.map_or(start_date, |s| s.max(start_date));
        let gap_ms = (now - last_updated_at).num_milliseconds().max(0);
        let step_ms = READING_INTERVAL_MINUTES * 60 * 1000;
        let limit = ((gap_ms + step_ms - 1) / step_ms).max(1);
        Self {
            start_date,
            end_date: now,
            last_updated_at,
            limit,
        }
    }

    fn query(&self, patient: &str) -> Vec<(&'static str, String)> {
        vec![
            ("patient", patient.to_string()),
            ("startDate", iso(self.start_date)),
            ("endDate", iso(self.end_date)),
            ("lastGuid", LAST_GUID.to_string()),
            ("lastUpdatedAt", iso(self.last_updated_at)),
            ("limit", self.limit.to_string()),
        ]
    }
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionUsersResponse {
    #[serde(default)]
    current_patient: Option<CurrentPatient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentPatient {
    #[serde(default)]
    glooko_code: Option<String>,
}

/// Client for one Glooko server.
#[derive(Debug, Clone)]
pub struct GlookoClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl GlookoClient {
    /// `timeout` must match the one the `http` client was built with; it is
    /// only used to report timeouts.
    #[must_use]
    pub fn new(http: Client, server: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url(server),
            timeout,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sign in and resolve the patient code.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` when Glooko rejects the login or the account has
    /// no patient; network and API errors otherwise.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionToken> {
        let cookie = self.create_session(email, password).await?;
        let account_id = self.patient_code(&cookie).await?;
        Ok(SessionToken {
            token: cookie,
            account_id,
        })
    }

    async fn create_session(&self, email: &str, password: &str) -> Result<String> {
        let body = json!({
            "userLogin": {
                "email": email,
                "password": password,
            },
            "deviceInformation": {
                "applicationType": "logbook",
                "os": "android",
                "osVersion": "33",
                "device": "Google Pixel 4a",
                "deviceManufacturer": "Google",
                "deviceModel": "Pixel 4a",
                "serialNumber": "ab43bfjdj3423421fb",
                "clinicalResearch": false,
                "deviceId": "716c34bac673f4b9",
                "applicationVersion": "6.1.3",
                "buildNumber": "0",
                "gitHash": "g4fbed2011b",
            },
        });

        let url = format!("{}{SIGN_IN_PATH}", self.base_url);
        tracing::debug!(url = %url, "Signing in to Glooko");
        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_error(SOURCE_NAME, self.timeout, &e))?;

        let response = check_auth_status(response, "sign in")?;
        let cookie = session_cookie(&response);
        if cookie.is_empty() {
            return Err(auth_failed("sign in returned no session cookie"));
        }
        Ok(cookie)
    }

    async fn patient_code(&self, cookie: &str) -> Result<String> {
        let url = format!("{}{SESSION_USERS_PATH}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(COOKIE, cookie)
            .send()
            .await
            .map_err(|e| classify_error(SOURCE_NAME, self.timeout, &e))?;

        let response = check_auth_status(response, "session lookup")?;
        let users: SessionUsersResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::ParseResponse(e.to_string()))?;

        users
            .current_patient
            .and_then(|p| p.glooko_code)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| auth_failed("account has no current patient"))
    }

    /// Fetch the raw response for one data kind.
    ///
    /// # Errors
    ///
    /// `SessionRejected` on 401/403, `FetchFailed` on other non-success
    /// statuses, network errors and parse errors otherwise.
    pub async fn fetch(
        &self,
        kind: DataKind,
        token: &SessionToken,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value> {
        let window = FetchWindow::new(since, now);
        let url = format!("{}{}", self.base_url, endpoint(kind));
        tracing::debug!(
            url = %url,
            last_updated_at = %window.last_updated_at,
            limit = window.limit,
            "Fetching Glooko data"
        );

        let response = self
            .http
            .get(&url)
            .header(COOKIE, &token.token)
            .query(&window.query(&token.account_id))
            .send()
            .await
            .map_err(|e| classify_error(SOURCE_NAME, self.timeout, &e))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(BridgeError::SessionRejected {
                source_name: SOURCE_NAME.to_string(),
                status_code: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(BridgeError::FetchFailed {
                source_name: SOURCE_NAME.to_string(),
                kind: kind.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| BridgeError::ParseResponse(format!("{kind}: {e}")))
    }
}

/// Statuses on the auth endpoints that mean the login itself was refused.
/// Throttling and request timeouts stay retryable.
fn check_auth_status(response: Response, step: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::UNPROCESSABLE_ENTITY
    ) {
        Err(auth_failed(&format!("{step} rejected with HTTP {status}")))
    } else {
        Err(BridgeError::SourceApiError {
            source_name: SOURCE_NAME.to_string(),
            status_code: Some(status.as_u16()),
            message: format!("{step} failed with HTTP {status}"),
        })
    }
}

/// `name=value` pairs from every `Set-Cookie` header, joined for a `Cookie` header.
fn session_cookie(response: &Response) -> String {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect::<Vec<_>>()
        .join("; ")
}

fn auth_failed(reason: &str) -> BridgeError {
    BridgeError::AuthenticationFailed {
        source_name: SOURCE_NAME.to_string(),
        reason: reason.to_string(),
    }
}
