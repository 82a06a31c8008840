//! Test utilities for cgm-bridge.
//!
//! Provides fake collaborators, a hand-driven clock and data factories for
//! use across unit and integration tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cgm_bridge::test_utils::*;
//!
//! let auth = Arc::new(FakeAuthenticator::new().with_refresh());
//! let source = Arc::new(FakeDataSource::new());
//! source.fail_kind(DataKind::CgmReadings);
//! let dir = TestDir::new();
//! dir.create_file("config.toml", "[driver]\nexpected_data_interval_ms = 60000");
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use tokio::sync::Semaphore;

use crate::core::models::{CycleResult, DataKind, RawBatch, RawRecord, TransformedBatch};
use crate::core::session::Session;
use crate::core::source::{
    Authenticator, Clock, Credentials, DataSource, SessionToken, Sink, Transformer,
};
use crate::error::{BridgeError, Result};

// =============================================================================
// Test Data Factories
// =============================================================================

/// Credentials used by fakes and fixtures.
#[must_use]
pub fn test_credentials() -> Credentials {
    Credentials::new("patient@example.com", "correct horse")
}

/// An active session issued at `now` with a one-hour refresh and two-hour expiry.
#[must_use]
pub fn make_test_session(now: DateTime<Utc>) -> Session {
    Session {
        token: SessionToken {
            token: "_logbook-web_session=test".to_string(),
            account_id: "patient-1".to_string(),
        },
        created_at: now,
        refresh_after: now + TimeDelta::hours(1),
        expire_at: now + TimeDelta::hours(2),
    }
}

/// A raw record with a small payload shaped like the kind's source data.
#[must_use]
pub fn make_test_record(kind: DataKind, timestamp: DateTime<Utc>) -> RawRecord {
    let payload = match kind {
        DataKind::CgmReadings => json!({ "timestamp": timestamp.to_rfc3339(), "value": 120 }),
        DataKind::NormalBoluses => json!({
            "pumpTimestamp": timestamp.to_rfc3339(),
            "insulinDelivered": 1.5,
            "carbsInput": 0
        }),
        DataKind::ScheduledBasals => json!({
            "pumpTimestamp": timestamp.to_rfc3339(),
            "rate": 0.8,
            "duration": 3600
        }),
    };
    RawRecord {
        kind,
        timestamp,
        payload,
    }
}

// =============================================================================
// Fake Authenticator
// =============================================================================

/// Authenticator that counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct FakeAuthenticator {
    supports_refresh: bool,
    fail_auth: AtomicBool,
    fail_refresh: AtomicBool,
    authenticate_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl FakeAuthenticator {
    /// Authenticator without refresh support.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable in-place refresh.
    #[must_use]
    pub fn with_refresh(mut self) -> Self {
        self.supports_refresh = true;
        self
    }

    pub fn fail_authentication(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn authenticate_calls(&self) -> usize {
        self.authenticate_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionToken> {
        let n = self.authenticate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(BridgeError::AuthenticationFailed {
                source_name: "fake".to_string(),
                reason: format!("login rejected for {}", credentials.username),
            });
        }
        Ok(SessionToken {
            token: format!("session-{n}"),
            account_id: "patient-1".to_string(),
        })
    }

    async fn refresh(&self, token: &SessionToken) -> Result<SessionToken> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.supports_refresh || self.fail_refresh.load(Ordering::SeqCst) {
            return Err(BridgeError::RefreshFailed {
                source_name: "fake".to_string(),
                reason: "refresh unavailable".to_string(),
            });
        }
        Ok(SessionToken {
            token: format!("{}-refreshed", token.token),
            account_id: token.account_id.clone(),
        })
    }
}

// =============================================================================
// Fake Data Source
// =============================================================================

/// Data source serving canned records per kind.
#[derive(Debug, Default)]
pub struct FakeDataSource {
    records: Mutex<BTreeMap<DataKind, Vec<RawRecord>>>,
    failing: Mutex<HashSet<DataKind>>,
    reject_next: AtomicBool,
    since_seen: Mutex<BTreeMap<DataKind, Option<DateTime<Utc>>>>,
    fetch_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeDataSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records returned for `kind` on every fetch until replaced.
    pub fn set_records(&self, kind: DataKind, records: Vec<RawRecord>) {
        self.records.lock().unwrap().insert(kind, records);
    }

    /// Make every fetch of `kind` fail until [`Self::clear_failures`].
    pub fn fail_kind(&self, kind: DataKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// The next fetch reports the session as rejected.
    pub fn reject_session_once(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    /// Park every fetch until [`Self::release_fetches`].
    pub fn hold_fetches(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let parked and future fetches complete.
    pub fn release_fetches(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }

    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// The `since` bound of the most recent fetch of `kind`, if it was fetched.
    #[must_use]
    pub fn last_since(&self, kind: DataKind) -> Option<Option<DateTime<Utc>>> {
        self.since_seen.lock().unwrap().get(&kind).copied()
    }
}

#[async_trait]
impl DataSource for FakeDataSource {
    fn name(&self) -> &str {
        "fake"
    }

    fn kinds(&self) -> &[DataKind] {
        DataKind::ALL
    }

    async fn fetch(
        &self,
        kind: DataKind,
        _token: &SessionToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.since_seen.lock().unwrap().insert(kind, since);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            // Closed on release; the acquire never succeeds.
            let _ = gate.acquire().await;
        }

        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::SessionRejected {
                source_name: "fake".to_string(),
                status_code: 401,
            });
        }
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(BridgeError::FetchFailed {
                source_name: "fake".to_string(),
                kind: kind.to_string(),
                reason: "HTTP 503".to_string(),
            });
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// Transformer & Sink
// =============================================================================

/// Transformer that counts the raw records it sees and emits nothing.
#[derive(Debug, Default)]
pub struct CountingTransformer {
    seen: AtomicUsize,
    fail: AtomicBool,
}

impl CountingTransformer {
    #[must_use]
    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Transformer for CountingTransformer {
    fn transform(&self, batch: &RawBatch, _timezone_offset_ms: i64) -> Result<TransformedBatch> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::TransformFailed {
                reason: "forced failure".to_string(),
            });
        }
        self.seen.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(TransformedBatch::default())
    }
}

/// Sink that keeps every result it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    results: Mutex<Vec<CycleResult>>,
}

impl RecordingSink {
    #[must_use]
    pub fn results(&self) -> Vec<CycleResult> {
        self.results.lock().unwrap().clone()
    }

    #[must_use]
    pub fn terminal_failures(&self) -> usize {
        self.results
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_terminal_failure())
            .count()
    }
}

impl Sink for RecordingSink {
    fn emit(&self, result: CycleResult) {
        self.results.lock().unwrap().push(result);
    }
}

// =============================================================================
// Manual Clock
// =============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// =============================================================================
// Temporary Directories
// =============================================================================

/// A temporary directory that is removed on drop.
pub struct TestDir {
    dir: tempfile::TempDir,
}

impl TestDir {
    /// Create a fresh temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `name` inside the directory and return its path.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn create_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        fs::write(&path, contents).expect("failed to write test file");
        path
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
