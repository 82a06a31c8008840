//! Core data models for the polling driver.
//!
//! Raw records as they arrive from a source, the normalized Nightscout-shaped
//! records the transform step produces, the per-kind poll cursor, and the
//! tagged outcome of a cycle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Data Kind
// =============================================================================

/// Kind of time-series data tracked by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataKind {
    /// Continuous glucose monitor readings.
    CgmReadings,
    /// Pump boluses (meal and correction).
    NormalBoluses,
    /// Pump basal rate segments.
    ScheduledBasals,
}

impl DataKind {
    /// All kinds in fetch order.
    pub const ALL: &'static [Self] = &[Self::ScheduledBasals, Self::NormalBoluses, Self::CgmReadings];

    /// Stable identifier used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CgmReadings => "readings",
            Self::NormalBoluses => "normalBoluses",
            Self::ScheduledBasals => "scheduledBasals",
        }
    }

    /// Whether records of this kind become Nightscout entries (vs. treatments).
    #[must_use]
    pub const fn is_entry(self) -> bool {
        matches!(self, Self::CgmReadings)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Raw Records
// =============================================================================

/// A single record as returned by a data source, before any transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub kind: DataKind,
    /// Source timestamp of the data point, used to advance the cursor.
    pub timestamp: DateTime<Utc>,
    /// Untouched payload as delivered by the source.
    pub payload: serde_json::Value,
}

/// Records from one cycle, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    records: BTreeMap<DataKind, Vec<RawRecord>>,
}

impl RawBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the records for one kind, replacing any previous ones.
    pub fn insert(&mut self, kind: DataKind, records: Vec<RawRecord>) {
        self.records.insert(kind, records);
    }

    /// Records of one kind (empty if the kind was not fetched).
    #[must_use]
    pub fn get(&self, kind: DataKind) -> &[RawRecord] {
        self.records.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Kinds present in this batch.
    pub fn kinds(&self) -> impl Iterator<Item = DataKind> + '_ {
        self.records.keys().copied()
    }

    /// Total record count across kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest timestamp actually returned per kind. Kinds with no records are absent.
    #[must_use]
    pub fn latest_timestamps(&self) -> BTreeMap<DataKind, DateTime<Utc>> {
        self.records
            .iter()
            .filter_map(|(kind, records)| {
                records.iter().map(|r| r.timestamp).max().map(|ts| (*kind, ts))
            })
            .collect()
    }
}

impl FromIterator<(DataKind, Vec<RawRecord>)> for RawBatch {
    fn from_iter<I: IntoIterator<Item = (DataKind, Vec<RawRecord>)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Normalized Output
// =============================================================================

/// A Nightscout sensor glucose entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Sensor glucose value in mg/dL.
    pub sgv: i32,
    /// Epoch milliseconds.
    pub date: i64,
    pub date_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    pub device: String,
}

/// A Nightscout treatment (bolus, basal segment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulin: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute: Option<f64>,
    /// Minutes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(rename = "enteredBy")]
    pub entered_by: String,
}

/// Output of the transform step for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformedBatch {
    pub entries: Vec<Entry>,
    pub treatments: Vec<Treatment>,
}

impl TransformedBatch {
    /// Total number of output records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() + self.treatments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.treatments.is_empty()
    }
}

// =============================================================================
// Poll Cursor
// =============================================================================

/// Watermark of the last successfully retrieved data point per kind.
///
/// Only moves forward: advancing with an older timestamp is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCursor {
    positions: BTreeMap<DataKind, DateTime<Utc>>,
}

impl PollCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower bound for the next fetch of `kind`, if any data was seen yet.
    #[must_use]
    pub fn since(&self, kind: DataKind) -> Option<DateTime<Utc>> {
        self.positions.get(&kind).copied()
    }

    /// Move each kind forward to the given timestamp if it is newer.
    pub fn advance(&mut self, latest: &BTreeMap<DataKind, DateTime<Utc>>) {
        for (kind, ts) in latest {
            self.positions
                .entry(*kind)
                .and_modify(|current| {
                    if *ts > *current {
                        *current = *ts;
                    }
                })
                .or_insert(*ts);
        }
    }
}

// =============================================================================
// Cycle Result
// =============================================================================

/// Tagged outcome of one polling cycle, as delivered to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CycleResult {
    /// The cycle produced records.
    Success { records: TransformedBatch },
    /// The cycle failed and will be retried after a backoff delay.
    RecoverableFailure { reason: String, attempt: u32 },
    /// The cycle failed for good; the next cycle runs at the nominal interval.
    TerminalFailure { reason: String },
}

impl CycleResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub const fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::TerminalFailure { .. })
    }
}

// =============================================================================
// Driver Configuration
// =============================================================================

/// Timing configuration consumed by the polling driver.
///
/// Every field is required. Defaults belong to configuration loading, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    pub refresh_delay_ms: u64,
    pub expire_delay_ms: u64,
    pub expected_data_interval_ms: u64,
    pub backoff: super::backoff::BackoffSpec,
    pub timezone_offset_ms: i64,
}
