//! Collaborator contracts consumed by the polling driver.
//!
//! A source module supplies an [`Authenticator`], a [`DataSource`] and a
//! [`Transformer`]; the embedding application supplies a [`Sink`]. The driver
//! holds each behind an `Arc<dyn ..>` so drivers for different sources share
//! no concrete types.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{CycleResult, DataKind, RawBatch, RawRecord, TransformedBatch};
use crate::error::{BridgeError, Result};

// =============================================================================
// Credentials & Tokens
// =============================================================================

/// Login credentials for a source account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque credential issued by a source plus the account it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Opaque value sent with data requests (cookie header, bearer token).
    pub token: String,
    /// Source-specific account identifier (e.g. a patient code).
    pub account_id: String,
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Produces and renews sessions for a source.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Short source name for logs and errors.
    fn name(&self) -> &str;

    /// Sign in from scratch.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` when the source rejects the credentials;
    /// network errors for transport failures.
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionToken>;

    /// Renew an existing session in place.
    ///
    /// Sources without a refresh endpoint keep the default, which always
    /// fails so the session manager falls back to a full sign-in.
    ///
    /// # Errors
    ///
    /// `RefreshFailed` when the session cannot be renewed.
    async fn refresh(&self, _token: &SessionToken) -> Result<SessionToken> {
        Err(BridgeError::RefreshFailed {
            source_name: self.name().to_string(),
            reason: "source does not support session refresh".to_string(),
        })
    }
}

/// Retrieves raw records for one kind of data.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short source name for logs and errors.
    fn name(&self) -> &str;

    /// Kinds this source tracks, fetched on every cycle.
    fn kinds(&self) -> &[DataKind];

    /// Fetch records of `kind` newer than `since` (or the source's own lookback
    /// window when `since` is `None`).
    ///
    /// # Errors
    ///
    /// Network errors, non-success responses and malformed payloads.
    async fn fetch(
        &self,
        kind: DataKind,
        token: &SessionToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>>;
}

/// Reconciles timestamps across kinds before the transform step.
pub trait Aligner: Send + Sync {
    /// # Errors
    ///
    /// `TransformFailed` when the batch cannot be aligned.
    fn align(&self, batch: RawBatch, timezone_offset_ms: i64) -> Result<RawBatch>;
}

/// Default alignment: hands the batch through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughAligner;

impl Aligner for PassThroughAligner {
    fn align(&self, batch: RawBatch, _timezone_offset_ms: i64) -> Result<RawBatch> {
        Ok(batch)
    }
}

/// Converts raw source records into normalized output records. Pure, no I/O.
pub trait Transformer: Send + Sync {
    /// # Errors
    ///
    /// `TransformFailed` when the batch cannot be converted.
    fn transform(&self, batch: &RawBatch, timezone_offset_ms: i64) -> Result<TransformedBatch>;
}

/// Receives cycle results. Must not block the scheduler.
pub trait Sink: Send + Sync {
    fn emit(&self, result: CycleResult);
}

/// Source of the current time for the driver.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRefresh;

    #[async_trait]
    impl Authenticator for NoRefresh {
        fn name(&self) -> &str {
            "norefresh"
        }

        async fn authenticate(&self, _credentials: &Credentials) -> Result<SessionToken> {
            Ok(SessionToken {
                token: "t".to_string(),
                account_id: "a".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn default_refresh_reports_refresh_failed() {
        let token = NoRefresh
            .authenticate(&Credentials::new("u", "p"))
            .await
            .unwrap();
        let err = NoRefresh.refresh(&token).await.unwrap_err();
        assert!(matches!(err, BridgeError::RefreshFailed { .. }));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = Credentials::new("me@example.com", "hunter2");
        let token = SessionToken {
            token: "_logbook-web_session=abc".to_string(),
            account_id: "patient-1".to_string(),
        };
        let rendered = format!("{creds:?} {token:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("abc"));
        assert!(rendered.contains("patient-1"));
    }

    #[test]
    fn pass_through_aligner_keeps_batch() {
        let batch = RawBatch::new();
        let aligned = PassThroughAligner.align(batch.clone(), -3_600_000).unwrap();
        assert_eq!(aligned, batch);
    }
}
