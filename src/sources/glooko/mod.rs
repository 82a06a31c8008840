//! Glooko data source.
//!
//! Glooko has no session refresh endpoint: a stale session is replaced by a
//! fresh sign-in. Each cycle reads scheduled basals, normal boluses and CGM
//! readings for the signed-in patient.

pub mod api;
pub mod convert;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::core::http::build_client;
use crate::core::models::{DataKind, RawRecord};
use crate::core::source::{Authenticator, Credentials, DataSource, SessionToken};
use crate::error::{BridgeError, Result};

pub use api::{DEFAULT_SERVER, FetchWindow, GlookoClient};
pub use convert::GlookoTransformer;

/// Source name used in logs, errors and emissions.
pub const SOURCE_NAME: &str = "glooko";

/// Refresh a session ten minutes before its one-day lifetime ends.
pub const REFRESH_DELAY_MS: u64 = 24 * 60 * 60 * 1000 - 10 * 60 * 1000;
/// Glooko sessions last one day.
pub const EXPIRE_DELAY_MS: u64 = 24 * 60 * 60 * 1000;
/// New CGM data is expected every five minutes.
pub const EXPECTED_DATA_INTERVAL_MS: u64 = 5 * 60 * 1000;
/// Base retry delay, doubled per attempt.
pub const BACKOFF_BASE_MS: u64 = 150_000;
/// Retries after a failed cycle before it counts as terminal.
pub const BACKOFF_MAX_ATTEMPTS: u32 = 1;

/// Authenticator and data source backed by the Glooko API.
#[derive(Debug, Clone)]
pub struct GlookoSource {
    client: GlookoClient,
}

impl GlookoSource {
    #[must_use]
    pub const fn new(client: GlookoClient) -> Self {
        Self { client }
    }

    /// Build a source for `server` with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn for_server(server: &str, timeout: Duration) -> Result<Self> {
        let http = build_client(timeout)?;
        Ok(Self::new(GlookoClient::new(http, server, timeout)))
    }

    #[must_use]
    pub const fn client(&self) -> &GlookoClient {
        &self.client
    }
}

#[async_trait]
impl Authenticator for GlookoSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionToken> {
        let token = self
            .client
            .sign_in(&credentials.username, &credentials.password)
            .await?;
        tracing::info!(source = SOURCE_NAME, patient = %token.account_id, "Signed in");
        Ok(token)
    }
}

#[async_trait]
impl DataSource for GlookoSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn kinds(&self) -> &[DataKind] {
        DataKind::ALL
    }

    async fn fetch(
        &self,
        kind: DataKind,
        token: &SessionToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>> {
        let body = self.client.fetch(kind, token, since, Utc::now()).await?;
        extract_records(kind, &body, since)
    }
}

/// Field holding each record's timestamp.
const fn timestamp_field(kind: DataKind) -> &'static str {
    match kind {
        DataKind::CgmReadings => "timestamp",
        DataKind::NormalBoluses | DataKind::ScheduledBasals => "pumpTimestamp",
    }
}

/// Glooko timestamps are RFC 3339, or naive UTC on older pump records.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Pull the records of `kind` out of a response body.
///
/// Records at or before `since` were delivered by an earlier cycle and are
/// dropped.
///
/// # Errors
///
/// `ParseResponse` when the body has no array for `kind`.
pub fn extract_records(
    kind: DataKind,
    body: &Value,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<RawRecord>> {
    let items = body
        .get(kind.as_str())
        .and_then(Value::as_array)
        .ok_or_else(|| BridgeError::ParseResponse(format!("response has no {kind} array")))?;

    let field = timestamp_field(kind);
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let Some(timestamp) = item.get(field).and_then(Value::as_str).and_then(parse_timestamp)
        else {
            tracing::warn!(kind = %kind, field, "Skipping record without a valid timestamp");
            continue;
        };
        if since.is_some_and(|s| timestamp <= s) {
            continue;
        }
        records.push(RawRecord {
            kind,
            timestamp,
            payload: item.clone(),
        });
    }
    Ok(records)
}
