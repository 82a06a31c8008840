//! Sinks that deliver cycle results downstream.
//!
//! `JsonLinesSink` writes directly from the driver task; `ChannelSink` hands
//! results to a bounded queue drained by a shared emitter task, so several
//! drivers can feed one writer. Neither blocks the scheduler: a full queue
//! drops the result.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::models::CycleResult;
use super::source::Sink;
use crate::error::{BridgeError, Result};

/// A cycle result tagged with the driver that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emission {
    pub source: String,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: CycleResult,
}

impl Emission {
    #[must_use]
    pub fn now(source: &str, result: CycleResult) -> Self {
        Self {
            source: source.to_string(),
            emitted_at: Utc::now(),
            result,
        }
    }
}

// =============================================================================
// JSON Lines
// =============================================================================

/// Serializes emissions as one JSON object per line.
pub struct JsonLinesWriter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesWriter {
    /// Write to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    /// Append to a file, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(file))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    /// Write one emission and flush.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or I/O failure.
    pub fn write(&self, emission: &Emission) -> Result<()> {
        let line = serde_json::to_string(emission)?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| BridgeError::Other(anyhow::anyhow!("output writer poisoned")))?;
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonLinesWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesWriter").finish_non_exhaustive()
    }
}

/// Sink writing each result straight to a [`JsonLinesWriter`].
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    source: String,
    writer: Arc<JsonLinesWriter>,
}

impl JsonLinesSink {
    #[must_use]
    pub fn new(source: impl Into<String>, writer: Arc<JsonLinesWriter>) -> Self {
        Self {
            source: source.into(),
            writer,
        }
    }
}

impl Sink for JsonLinesSink {
    fn emit(&self, result: CycleResult) {
        if let Err(e) = self.writer.write(&Emission::now(&self.source, result)) {
            tracing::error!(source = %self.source, error = %e, "Failed to write cycle result");
        }
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Sink forwarding results to a bounded queue. Drops on a full or closed queue.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    source: String,
    tx: mpsc::Sender<Emission>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(source: impl Into<String>, tx: mpsc::Sender<Emission>) -> Self {
        Self {
            source: source.into(),
            tx,
        }
    }
}

impl Sink for ChannelSink {
    fn emit(&self, result: CycleResult) {
        match self.tx.try_send(Emission::now(&self.source, result)) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    source = %self.source,
                    emitted_at = %dropped.emitted_at,
                    "Emitter queue full, dropping cycle result"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(source = %self.source, "Emitter closed, dropping cycle result");
            }
        }
    }
}

/// Drain a queue of emissions into a writer until every sender is gone.
///
/// Returns the number of emissions written.
pub async fn drain_to_writer(mut rx: mpsc::Receiver<Emission>, writer: Arc<JsonLinesWriter>) -> u64 {
    let mut written = 0;
    while let Some(emission) = rx.recv().await {
        match writer.write(&emission) {
            Ok(()) => written += 1,
            Err(e) => tracing::error!(source = %emission.source, error = %e, "Failed to write cycle result"),
        }
    }
    written
}
