//! Polling scheduler: drives the repeating cycle for one source session.
//!
//! Exactly one cycle is in flight at a time. Each cycle either succeeds
//! (cursor advances, records go to the sink, next cycle after the nominal
//! interval), fails recoverably (retry after a backoff delay while within the
//! retry budget), or fails terminally (reported to the sink, next cycle after
//! the nominal interval). Nothing escapes the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::backoff::BackoffPolicy;
use super::models::{CycleResult, DriverConfig, PollCursor};
use super::pipeline::{FetchPipeline, PipelineOutput};
use super::session::SessionManager;
use super::source::{Clock, Sink, SystemClock};
use crate::error::BridgeError;

// =============================================================================
// Attempt State
// =============================================================================

/// Consecutive recoverable failures since the last success or terminal failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptState {
    pub consecutive_failures: u32,
}

impl AttemptState {
    /// Count one more failure and return the new total.
    pub const fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub const fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

// =============================================================================
// Cycle Outcome
// =============================================================================

/// What a cycle produced, before any state is updated.
#[derive(Debug)]
enum CycleOutcome {
    Fetched(PipelineOutput),
    AuthFailed(BridgeError),
    Failed(BridgeError),
}

/// Decision taken after a cycle: what (if anything) went to the sink and
/// when the next cycle runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub result: CycleResult,
    pub next_delay: Duration,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Coordinates session, pipeline, backoff and sink for one driver.
pub struct PollingScheduler {
    sessions: SessionManager,
    pipeline: FetchPipeline,
    sink: Arc<dyn Sink>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    interval: Duration,
    cursor: PollCursor,
    attempts: AttemptState,
}

impl PollingScheduler {
    #[must_use]
    pub fn new(
        sessions: SessionManager,
        pipeline: FetchPipeline,
        sink: Arc<dyn Sink>,
        config: &DriverConfig,
    ) -> Self {
        Self {
            sessions,
            pipeline,
            sink,
            clock: Arc::new(SystemClock),
            backoff: BackoffPolicy::new(config.backoff),
            interval: Duration::from_millis(config.expected_data_interval_ms),
            cursor: PollCursor::new(),
            attempts: AttemptState::default(),
        }
    }

    /// Replace the wall clock (tests drive time by hand).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start from a known cursor instead of the source's default lookback.
    #[must_use]
    pub fn with_cursor(mut self, cursor: PollCursor) -> Self {
        self.cursor = cursor;
        self
    }

    #[must_use]
    pub const fn cursor(&self) -> &PollCursor {
        &self.cursor
    }

    #[must_use]
    pub const fn attempts(&self) -> AttemptState {
        self.attempts
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run one cycle, apply its result, and return the delay before the next.
    pub async fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let outcome = self.run_cycle(now).await;
        self.settle(outcome)
    }

    async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        let session = match self.sessions.ensure_session(now).await {
            Ok(session) => session,
            Err(e) if e.is_authentication() => return CycleOutcome::AuthFailed(e),
            Err(e) => return CycleOutcome::Failed(e),
        };

        match self.pipeline.run(&session, &self.cursor).await {
            Ok(output) => CycleOutcome::Fetched(output),
            Err(e) => CycleOutcome::Failed(e),
        }
    }

    fn settle(&mut self, outcome: CycleOutcome) -> TickReport {
        let source = self.pipeline.source_name().to_string();
        match outcome {
            CycleOutcome::Fetched(output) => {
                self.attempts.reset();
                self.cursor.advance(&output.latest);
                let result = CycleResult::Success {
                    records: output.records,
                };
                self.sink.emit(result.clone());
                tracing::debug!(
                    source = %source,
                    next_in_ms = duration_ms(self.interval),
                    "Cycle succeeded"
                );
                TickReport {
                    result,
                    next_delay: self.interval,
                }
            }
            CycleOutcome::AuthFailed(e) => {
                tracing::error!(
                    source = %source,
                    error = %e,
                    code = e.error_code(),
                    "Authentication failed, skipping to next cycle"
                );
                self.attempts.reset();
                self.terminal(e.to_string())
            }
            CycleOutcome::Failed(e) => {
                if e.invalidates_session() {
                    self.sessions.invalidate();
                }
                let attempt = self.attempts.record_failure();
                if e.is_retryable() && self.backoff.should_retry(attempt) {
                    let delay = self.backoff.delay_for(attempt);
                    tracing::warn!(
                        source = %source,
                        error = %e,
                        attempt,
                        retry_in_ms = duration_ms(delay),
                        "Cycle failed, backing off"
                    );
                    TickReport {
                        result: CycleResult::RecoverableFailure {
                            reason: e.to_string(),
                            attempt,
                        },
                        next_delay: delay,
                    }
                } else {
                    tracing::error!(
                        source = %source,
                        error = %e,
                        attempt,
                        "Retries exhausted for this cycle"
                    );
                    self.attempts.reset();
                    self.terminal(e.to_string())
                }
            }
        }
    }

    fn terminal(&self, reason: String) -> TickReport {
        let result = CycleResult::TerminalFailure { reason };
        self.sink.emit(result.clone());
        TickReport {
            result,
            next_delay: self.interval,
        }
    }

    /// Spawn the polling loop on the current tokio runtime.
    ///
    /// The first cycle runs immediately.
    #[must_use]
    pub fn start(self) -> DriverHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run_until_stopped(stop_rx));
        DriverHandle { stop_tx, task }
    }

    async fn run_until_stopped(mut self, mut stop_rx: watch::Receiver<bool>) -> Self {
        let source = self.pipeline.source_name().to_string();
        tracing::info!(
            source = %source,
            interval_ms = duration_ms(self.interval),
            "Polling driver started"
        );

        loop {
            let now = self.clock.now();
            // The in-flight cycle is never interrupted; its outcome is
            // dropped if a stop arrived meanwhile.
            let outcome = self.run_cycle(now).await;
            if *stop_rx.borrow() {
                tracing::debug!(source = %source, "Stop requested, discarding cycle result");
                break;
            }
            let report = self.settle(outcome);

            tokio::select! {
                () = tokio::time::sleep(report.next_delay) => {}
                _ = stop_rx.changed() => break,
            }
        }

        tracing::info!(source = %source, "Polling driver stopped");
        self
    }
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("pipeline", &self.pipeline)
            .field("backoff", &self.backoff)
            .field("interval", &self.interval)
            .field("cursor", &self.cursor)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running polling loop.
#[derive(Debug)]
pub struct DriverHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<PollingScheduler>,
}

impl DriverHandle {
    /// Stop scheduling further cycles and wait for the loop to exit.
    ///
    /// Returns the scheduler so its cursor can be inspected, or `None` if the
    /// loop task panicked.
    pub async fn stop(self) -> Option<PollingScheduler> {
        // A closed receiver means the loop already exited.
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(scheduler) => Some(scheduler),
            Err(e) => {
                tracing::error!(error = %e, "Polling driver task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backoff::BackoffSpec;
    use crate::core::models::DataKind;
    use crate::core::session::SessionDelays;
    use crate::test_utils::{
        CountingTransformer, FakeAuthenticator, FakeDataSource, ManualClock, RecordingSink,
        make_test_record, test_credentials,
    };
    use chrono::TimeDelta;

    const INTERVAL_MS: u64 = 300_000;

    struct Harness {
        auth: Arc<FakeAuthenticator>,
        source: Arc<FakeDataSource>,
        sink: Arc<RecordingSink>,
        clock: Arc<ManualClock>,
        scheduler: PollingScheduler,
    }

    fn config(base_interval_ms: u64, max_attempts: u32) -> DriverConfig {
        DriverConfig {
            refresh_delay_ms: 3_600_000,
            expire_delay_ms: 7_200_000,
            expected_data_interval_ms: INTERVAL_MS,
            backoff: BackoffSpec {
                base_interval_ms,
                max_attempts,
            },
            timezone_offset_ms: 0,
        }
    }

    fn harness(config: &DriverConfig) -> Harness {
        let auth = Arc::new(FakeAuthenticator::new().with_refresh());
        let source = Arc::new(FakeDataSource::new());
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let sessions = SessionManager::new(
            auth.clone(),
            test_credentials(),
            SessionDelays::from_millis(config.refresh_delay_ms, config.expire_delay_ms).unwrap(),
        );
        let pipeline = FetchPipeline::new(
            source.clone(),
            Arc::new(CountingTransformer::default()),
            config.timezone_offset_ms,
        );
        let scheduler =
            PollingScheduler::new(sessions, pipeline, sink.clone(), config).with_clock(clock.clone());
        Harness {
            auth,
            source,
            sink,
            clock,
            scheduler,
        }
    }

    #[tokio::test]
    async fn success_advances_cursor_and_uses_nominal_interval() {
        let mut h = harness(&config(150_000, 1));
        let t = h.clock.now();
        h.source.set_records(
            DataKind::CgmReadings,
            vec![make_test_record(DataKind::CgmReadings, t)],
        );

        let report = h.scheduler.tick().await;

        assert!(report.result.is_success());
        assert_eq!(report.next_delay, Duration::from_millis(INTERVAL_MS));
        assert_eq!(h.scheduler.cursor().since(DataKind::CgmReadings), Some(t));
        assert_eq!(h.scheduler.attempts().consecutive_failures, 0);
        assert_eq!(h.sink.results().len(), 1);
    }

    #[tokio::test]
    async fn retry_then_terminal_with_single_attempt_budget() {
        let mut h = harness(&config(150_000, 1));
        h.source.fail_kind(DataKind::CgmReadings);

        let first = h.scheduler.tick().await;
        assert_eq!(first.next_delay, Duration::from_millis(150_000));
        assert!(matches!(
            first.result,
            CycleResult::RecoverableFailure { attempt: 1, .. }
        ));
        assert_eq!(h.scheduler.attempts().consecutive_failures, 1);
        assert!(h.sink.results().is_empty());

        let second = h.scheduler.tick().await;
        assert!(second.result.is_terminal_failure());
        assert_eq!(second.next_delay, Duration::from_millis(INTERVAL_MS));
        assert_eq!(h.scheduler.attempts().consecutive_failures, 0);
        assert_eq!(h.sink.terminal_failures(), 1);
    }

    #[tokio::test]
    async fn exhausting_budget_emits_exactly_one_terminal_failure() {
        let mut h = harness(&config(1_000, 3));
        h.source.fail_kind(DataKind::NormalBoluses);

        let mut delays = Vec::new();
        for _ in 0..4 {
            delays.push(h.scheduler.tick().await.next_delay);
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(2_000),
                Duration::from_millis(4_000),
                Duration::from_millis(INTERVAL_MS),
            ]
        );
        assert_eq!(h.sink.terminal_failures(), 1);
        assert_eq!(h.scheduler.attempts().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn cursor_unchanged_on_failure() {
        let mut h = harness(&config(1_000, 2));
        let t = h.clock.now();
        h.source.set_records(
            DataKind::CgmReadings,
            vec![make_test_record(DataKind::CgmReadings, t)],
        );
        h.scheduler.tick().await;
        let before = h.scheduler.cursor().clone();

        h.source.set_records(
            DataKind::CgmReadings,
            vec![make_test_record(DataKind::CgmReadings, t + TimeDelta::minutes(5))],
        );
        h.source.fail_kind(DataKind::ScheduledBasals);
        h.scheduler.tick().await;

        assert_eq!(h.scheduler.cursor(), &before);
    }

    #[tokio::test]
    async fn authentication_failure_is_terminal_without_backoff() {
        let mut h = harness(&config(150_000, 3));
        h.auth.fail_authentication(true);

        let report = h.scheduler.tick().await;

        assert!(report.result.is_terminal_failure());
        assert_eq!(report.next_delay, Duration::from_millis(INTERVAL_MS));
        assert_eq!(h.scheduler.attempts().consecutive_failures, 0);
        assert_eq!(h.source.fetch_calls(), 0);
        assert_eq!(h.sink.terminal_failures(), 1);
    }

    #[tokio::test]
    async fn auth_failure_resets_previous_failures() {
        let mut h = harness(&config(1_000, 5));
        h.source.fail_kind(DataKind::CgmReadings);
        h.scheduler.tick().await;
        assert_eq!(h.scheduler.attempts().consecutive_failures, 1);

        h.scheduler.sessions.invalidate();
        h.auth.fail_authentication(true);
        h.scheduler.tick().await;

        assert_eq!(h.scheduler.attempts().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn rejected_session_is_dropped_before_retry() {
        let mut h = harness(&config(1_000, 2));
        h.source.reject_session_once();

        let report = h.scheduler.tick().await;
        assert!(matches!(report.result, CycleResult::RecoverableFailure { .. }));
        assert!(h.scheduler.sessions().current().is_none());

        let report = h.scheduler.tick().await;
        assert!(report.result.is_success());
        assert_eq!(h.auth.authenticate_calls(), 2);
    }

    #[tokio::test]
    async fn refresh_keeps_same_account_without_reauthentication() {
        let mut h = harness(&config(1_000, 2));
        h.scheduler.tick().await;
        let first_account = h.scheduler.sessions().current().unwrap().token.account_id.clone();

        // Past refresh_after (1h) but before expire_at (2h).
        h.clock.advance(TimeDelta::minutes(90));
        let report = h.scheduler.tick().await;

        assert!(report.result.is_success());
        assert_eq!(h.auth.authenticate_calls(), 1);
        assert_eq!(h.auth.refresh_calls(), 1);
        assert_eq!(
            h.scheduler.sessions().current().unwrap().token.account_id,
            first_account
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_loop_and_returns_scheduler() {
        let h = harness(&config(1_000, 1));
        let t = h.clock.now();
        h.source.set_records(
            DataKind::CgmReadings,
            vec![make_test_record(DataKind::CgmReadings, t)],
        );
        let sink = h.sink.clone();

        let handle = h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let scheduler = handle.stop().await.expect("loop should exit cleanly");

        assert_eq!(sink.results().len(), 1);
        assert_eq!(scheduler.cursor().since(DataKind::CgmReadings), Some(t));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_cycle_discards_its_result() {
        let h = harness(&config(1_000, 1));
        let t = h.clock.now();
        h.source.set_records(
            DataKind::CgmReadings,
            vec![make_test_record(DataKind::CgmReadings, t)],
        );
        h.source.hold_fetches();
        let source = h.source.clone();
        let sink = h.sink.clone();

        let handle = h.scheduler.start();
        while source.fetch_calls() < DataKind::ALL.len() {
            tokio::task::yield_now().await;
        }

        let stopping = tokio::spawn(handle.stop());
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        source.release_fetches();
        let scheduler = stopping
            .await
            .unwrap()
            .expect("loop should exit cleanly");

        assert_eq!(source.fetch_calls(), DataKind::ALL.len());
        assert!(sink.results().is_empty());
        assert_eq!(scheduler.cursor(), &PollCursor::new());
        assert_eq!(scheduler.attempts().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_again_after_nominal_interval() {
        let h = harness(&config(1_000, 1));
        let sink = h.sink.clone();

        let handle = h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(INTERVAL_MS + 10)).await;
        handle.stop().await;

        assert_eq!(sink.results().len(), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn rejected_credentials_log_an_error() {
        let mut h = harness(&config(150_000, 3));
        h.auth.fail_authentication(true);

        let report = h.scheduler.tick().await;

        assert!(report.result.is_terminal_failure());
        assert!(logs_contain("Authentication failed, skipping to next cycle"));
        assert!(!logs_contain("backing off"));
    }
}
