//! Authenticated session lifecycle.
//!
//! The session state is derived lazily from the clock on every call to
//! [`SessionManager::ensure_session`]; there is no background refresh timer.
//!
//! ```text
//! Unauthenticated --authenticate--> Active
//! Active --now >= refresh_after--> Stale --refresh ok--> Active
//! Stale --refresh failed--> Unauthenticated --authenticate--> Active
//! Active | Stale --now >= expire_at--> Expired --> Unauthenticated
//! ```

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use super::source::{Authenticator, Credentials, SessionToken};
use crate::error::{BridgeError, Result};

// =============================================================================
// Delays
// =============================================================================

/// Upper bound for either session delay: 30 days.
pub const MAX_SESSION_DELAY_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Offsets from session creation at which a session turns stale and expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDelays {
    refresh: TimeDelta,
    expire: TimeDelta,
}

impl SessionDelays {
    /// Build delays from milliseconds.
    ///
    /// # Errors
    ///
    /// `ConfigInvalid` unless `refresh_delay_ms < expire_delay_ms` and both are
    /// at most [`MAX_SESSION_DELAY_MS`].
    pub fn from_millis(refresh_delay_ms: u64, expire_delay_ms: u64) -> Result<Self> {
        if refresh_delay_ms >= expire_delay_ms {
            return Err(BridgeError::ConfigInvalid {
                key: "refresh_delay_ms".to_string(),
                message: format!(
                    "must be lower than expire_delay_ms ({refresh_delay_ms} >= {expire_delay_ms})"
                ),
            });
        }
        Ok(Self {
            refresh: millis_delta("refresh_delay_ms", refresh_delay_ms)?,
            expire: millis_delta("expire_delay_ms", expire_delay_ms)?,
        })
    }

    #[must_use]
    pub const fn refresh(&self) -> TimeDelta {
        self.refresh
    }

    #[must_use]
    pub const fn expire(&self) -> TimeDelta {
        self.expire
    }
}

fn millis_delta(key: &str, ms: u64) -> Result<TimeDelta> {
    i64::try_from(ms)
        .ok()
        .filter(|_| ms <= MAX_SESSION_DELAY_MS)
        .and_then(TimeDelta::try_milliseconds)
        .ok_or_else(|| BridgeError::ConfigInvalid {
            key: key.to_string(),
            message: format!("{ms} ms exceeds the {MAX_SESSION_DELAY_MS} ms limit"),
        })
}

// =============================================================================
// Session
// =============================================================================

/// Lifecycle state of the managed session at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Active,
    /// Past `refresh_after`, still before `expire_at`.
    Stale,
    Expired,
}

/// An issued session and its schedule.
///
/// Invariant: `created_at <= refresh_after < expire_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: SessionToken,
    pub created_at: DateTime<Utc>,
    pub refresh_after: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

impl Session {
    fn issue(token: SessionToken, now: DateTime<Utc>, delays: SessionDelays) -> Result<Self> {
        let offset = |key: &str, delay: TimeDelta| {
            now.checked_add_signed(delay)
                .ok_or_else(|| BridgeError::ConfigInvalid {
                    key: key.to_string(),
                    message: format!("session issued at {now} ends out of range"),
                })
        };
        Ok(Self {
            token,
            created_at: now,
            refresh_after: offset("refresh_delay_ms", delays.refresh)?,
            expire_at: offset("expire_delay_ms", delays.expire)?,
        })
    }

    /// State of this session at `now`.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if now >= self.expire_at {
            SessionState::Expired
        } else if now >= self.refresh_after {
            SessionState::Stale
        } else {
            SessionState::Active
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Owns the session for one driver.
pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    credentials: Credentials,
    delays: SessionDelays,
    session: Option<Session>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        credentials: Credentials,
        delays: SessionDelays,
    ) -> Self {
        Self {
            authenticator,
            credentials,
            delays,
            session: None,
        }
    }

    /// Current session, whatever its state.
    #[must_use]
    pub const fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// State of the managed session at `now`.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Unauthenticated, |s| s.state_at(now))
    }

    /// Drop the current session; the next call re-authenticates.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            tracing::info!(source = self.authenticator.name(), "Session invalidated");
        }
    }

    /// Return a session usable at `now`, signing in or refreshing as needed.
    ///
    /// A failed refresh is absorbed: the stale session is discarded and a full
    /// sign-in is attempted in the same call.
    ///
    /// # Errors
    ///
    /// Whatever the authenticator reports for the sign-in attempt
    /// (`AuthenticationFailed` for rejected credentials). On error no session
    /// is held.
    pub async fn ensure_session(&mut self, now: DateTime<Utc>) -> Result<Session> {
        let source = self.authenticator.name().to_string();

        match self.state_at(now) {
            SessionState::Active => {
                if let Some(session) = &self.session {
                    return Ok(session.clone());
                }
            }
            SessionState::Stale => {
                if let Some(stale) = self.session.take() {
                    tracing::debug!(
                        source = %source,
                        refresh_after = %stale.refresh_after,
                        "Session stale, refreshing"
                    );
                    match self.authenticator.refresh(&stale.token).await {
                        Ok(token) => {
                            let session = Session::issue(token, now, self.delays)?;
                            tracing::info!(
                                source = %source,
                                expire_at = %session.expire_at,
                                "Session refreshed"
                            );
                            self.session = Some(session.clone());
                            return Ok(session);
                        }
                        Err(e) => {
                            tracing::warn!(
                                source = %source,
                                error = %e,
                                "Session refresh failed, re-authenticating"
                            );
                        }
                    }
                }
            }
            SessionState::Expired => {
                tracing::info!(source = %source, "Session expired, discarding");
                self.session = None;
            }
            SessionState::Unauthenticated => {}
        }

        self.authenticate(now).await
    }

    async fn authenticate(&mut self, now: DateTime<Utc>) -> Result<Session> {
        self.session = None;
        let token = self.authenticator.authenticate(&self.credentials).await?;
        let session = Session::issue(token, now, self.delays)?;
        tracing::info!(
            source = self.authenticator.name(),
            account = %session.token.account_id,
            refresh_after = %session.refresh_after,
            expire_at = %session.expire_at,
            "Authenticated"
        );
        self.session = Some(session.clone());
        Ok(session)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("source", &self.authenticator.name())
            .field("delays", &self.delays)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
