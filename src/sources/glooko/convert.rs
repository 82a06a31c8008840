//! Conversion of Glooko records into Nightscout entries and treatments.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde_json::Value;

use crate::core::models::{DataKind, Entry, RawBatch, RawRecord, Treatment, TransformedBatch};
use crate::core::source::Transformer;
use crate::error::{BridgeError, Result};

/// Device label on generated entries.
pub const DEVICE: &str = "glooko";

/// `enteredBy` on generated treatments.
pub const ENTERED_BY: &str = "cgm-bridge";

/// Converts Glooko readings, boluses and basals.
///
/// Individual malformed records are skipped with a warning. A kind whose
/// records are all unusable fails the batch, since that points at a changed
/// payload shape rather than a bad data point.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlookoTransformer;

impl Transformer for GlookoTransformer {
    fn transform(&self, batch: &RawBatch, timezone_offset_ms: i64) -> Result<TransformedBatch> {
        let offset = TimeDelta::try_milliseconds(timezone_offset_ms).ok_or_else(|| {
            BridgeError::TransformFailed {
                reason: format!("timezone offset out of range: {timezone_offset_ms} ms"),
            }
        })?;

        let mut out = TransformedBatch::default();
        for kind in batch.kinds() {
            let records = batch.get(kind);
            let before = out.len();
            for record in records {
                let shifted = record.timestamp.checked_add_signed(offset).ok_or_else(|| {
                    BridgeError::TransformFailed {
                        reason: format!(
                            "shifting {} by {timezone_offset_ms} ms leaves the date range",
                            record.timestamp
                        ),
                    }
                })?;
                let converted = match kind {
                    DataKind::CgmReadings => to_entry(record, shifted).map(|e| out.entries.push(e)),
                    DataKind::NormalBoluses => {
                        to_bolus(record, shifted).map(|t| out.treatments.push(t))
                    }
                    DataKind::ScheduledBasals => {
                        to_basal(record, shifted).map(|t| out.treatments.push(t))
                    }
                };
                if converted.is_none() {
                    tracing::warn!(kind = %kind, payload = %record.payload, "Skipping malformed record");
                }
            }
            if !records.is_empty() && out.len() == before {
                return Err(BridgeError::TransformFailed {
                    reason: format!("no usable {kind} records in {} received", records.len()),
                });
            }
        }
        Ok(out)
    }
}

fn number(payload: &Value, field: &str) -> Option<f64> {
    payload.get(field).and_then(Value::as_f64)
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Glooko trend labels to Nightscout directions.
fn direction(trend: &str) -> Option<&'static str> {
    Some(match trend {
        "doubleUp" | "DoubleUp" => "DoubleUp",
        "singleUp" | "SingleUp" => "SingleUp",
        "fortyFiveUp" | "FortyFiveUp" => "FortyFiveUp",
        "flat" | "Flat" => "Flat",
        "fortyFiveDown" | "FortyFiveDown" => "FortyFiveDown",
        "singleDown" | "SingleDown" => "SingleDown",
        "doubleDown" | "DoubleDown" => "DoubleDown",
        _ => return None,
    })
}

fn to_entry(record: &RawRecord, at: DateTime<Utc>) -> Option<Entry> {
    let value = number(&record.payload, "value")?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let sgv = value.round() as i32;
    Some(Entry {
        entry_type: "sgv".to_string(),
        sgv,
        date: at.timestamp_millis(),
        date_string: iso(at),
        direction: record
            .payload
            .get("trend")
            .and_then(Value::as_str)
            .and_then(direction)
            .map(str::to_string),
        device: DEVICE.to_string(),
    })
}

fn to_bolus(record: &RawRecord, at: DateTime<Utc>) -> Option<Treatment> {
    let insulin = number(&record.payload, "insulinDelivered")?;
    let carbs = number(&record.payload, "carbsInput").filter(|c| *c > 0.0);
    let event_type = if carbs.is_some() {
        "Meal Bolus"
    } else {
        "Correction Bolus"
    };
    Some(Treatment {
        event_type: event_type.to_string(),
        created_at: iso(at),
        insulin: Some(insulin),
        carbs,
        rate: None,
        absolute: None,
        duration: None,
        entered_by: ENTERED_BY.to_string(),
    })
}

fn to_basal(record: &RawRecord, at: DateTime<Utc>) -> Option<Treatment> {
    let rate = number(&record.payload, "rate")?;
    // Glooko reports segment length in seconds.
    let duration = number(&record.payload, "duration").map(|secs| secs / 60.0);
    Some(Treatment {
        event_type: "Temp Basal".to_string(),
        created_at: iso(at),
        insulin: None,
        carbs: None,
        rate: Some(rate),
        absolute: Some(rate),
        duration,
        entered_by: ENTERED_BY.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_test_record;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn raw(kind: DataKind, ts: DateTime<Utc>, payload: Value) -> RawRecord {
        RawRecord {
            kind,
            timestamp: ts,
            payload,
        }
    }

    #[test]
    fn readings_become_sgv_entries_shifted_by_offset() {
        let ts = at("2024-03-01T12:00:00Z");
        let mut batch = RawBatch::new();
        batch.insert(
            DataKind::CgmReadings,
            vec![raw(
                DataKind::CgmReadings,
                ts,
                json!({ "value": 142.6, "trend": "flat" }),
            )],
        );

        let out = GlookoTransformer.transform(&batch, -3_600_000).unwrap();

        assert_eq!(out.entries.len(), 1);
        let entry = &out.entries[0];
        assert_eq!(entry.sgv, 143);
        assert_eq!(entry.date_string, "2024-03-01T11:00:00.000Z");
        assert_eq!(entry.date, at("2024-03-01T11:00:00Z").timestamp_millis());
        assert_eq!(entry.direction.as_deref(), Some("Flat"));
        assert!(out.treatments.is_empty());
    }

    #[test]
    fn boluses_split_on_carbs() {
        let ts = at("2024-03-01T12:00:00Z");
        let mut batch = RawBatch::new();
        batch.insert(
            DataKind::NormalBoluses,
            vec![
                raw(
                    DataKind::NormalBoluses,
                    ts,
                    json!({ "insulinDelivered": 4.0, "carbsInput": 45 }),
                ),
                make_test_record(DataKind::NormalBoluses, ts),
            ],
        );

        let out = GlookoTransformer.transform(&batch, 0).unwrap();

        let kinds: Vec<&str> = out.treatments.iter().map(|t| t.event_type.as_str()).collect();
        assert_eq!(kinds, ["Meal Bolus", "Correction Bolus"]);
        assert_eq!(out.treatments[0].carbs, Some(45.0));
        assert_eq!(out.treatments[1].carbs, None);
        assert_eq!(out.treatments[1].insulin, Some(1.5));
    }

    #[test]
    fn basals_become_temp_basals_in_minutes() {
        let ts = at("2024-03-01T12:00:00Z");
        let mut batch = RawBatch::new();
        batch.insert(
            DataKind::ScheduledBasals,
            vec![make_test_record(DataKind::ScheduledBasals, ts)],
        );

        let out = GlookoTransformer.transform(&batch, 0).unwrap();

        let basal = &out.treatments[0];
        assert_eq!(basal.event_type, "Temp Basal");
        assert_eq!(basal.absolute, Some(0.8));
        assert_eq!(basal.duration, Some(60.0));
        assert_eq!(basal.entered_by, ENTERED_BY);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let ts = at("2024-03-01T12:00:00Z");
        let mut batch = RawBatch::new();
        batch.insert(
            DataKind::CgmReadings,
            vec![
                raw(DataKind::CgmReadings, ts, json!({ "value": "high" })),
                make_test_record(DataKind::CgmReadings, ts),
            ],
        );

        let out = GlookoTransformer.transform(&batch, 0).unwrap();
        assert_eq!(out.entries.len(), 1);
    }

    #[test]
    fn kind_with_no_usable_records_fails() {
        let ts = at("2024-03-01T12:00:00Z");
        let mut batch = RawBatch::new();
        batch.insert(
            DataKind::ScheduledBasals,
            vec![raw(DataKind::ScheduledBasals, ts, json!({ "segment": 1 }))],
        );

        let err = GlookoTransformer.transform(&batch, 0).unwrap_err();
        assert!(matches!(err, BridgeError::TransformFailed { .. }));
    }

    #[test]
    fn offset_past_date_range_fails_instead_of_panicking() {
        let ts = at("2024-03-01T12:00:00Z");
        let mut batch = RawBatch::new();
        batch.insert(
            DataKind::CgmReadings,
            vec![make_test_record(DataKind::CgmReadings, ts)],
        );

        let err = GlookoTransformer
            .transform(&batch, -36_000_000_000_000_000)
            .unwrap_err();

        assert!(matches!(err, BridgeError::TransformFailed { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn empty_batch_is_empty_output() {
        let out = GlookoTransformer.transform(&RawBatch::new(), 0).unwrap();
        assert!(out.is_empty());
    }
}
