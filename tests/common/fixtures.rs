//! Glooko API fixtures for integration tests.
//!
//! Mounts sign-in and data endpoints on a `wiremock` server and builds
//! response bodies shaped like Glooko's.
#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cgm_bridge::core::DataKind;
use cgm_bridge::sources::glooko::{GlookoSource, api};

pub const PATIENT_CODE: &str = "us-east-1-patient-42";
pub const SESSION_COOKIE: &str = "_logbook-web_session=abc123";
pub const COOKIE_HEADER: &str = "_logbook-web_session=abc123; glooko_region=us";

/// Source pointed at the mock server with a short timeout.
pub fn source_for(server: &MockServer) -> GlookoSource {
    GlookoSource::for_server(&server.uri(), Duration::from_secs(5)).expect("client build")
}

pub fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Successful sign-in with two cookies, and a session lookup returning the patient.
pub async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v2/users/sign_in"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", format!("{SESSION_COOKIE}; path=/; HttpOnly"))
                .append_header("set-cookie", "glooko_region=us; path=/")
                .set_body_json(json!({ "success": true })),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v3/session/users"))
        .and(header("cookie", COOKIE_HEADER))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "currentUser": { "id": 7 },
            "currentPatient": { "glookoCode": PATIENT_CODE }
        })))
        .mount(server)
        .await;
}

/// Sign-in rejected with the given status.
pub async fn mount_sign_in_rejected(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/api/v2/users/sign_in"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Serve `body` for `kind` with the given status.
pub async fn mount_data(server: &MockServer, kind: DataKind, status: u16, body: Value) {
    Mock::given(method("GET"))
        .and(path(api::endpoint(kind)))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve empty arrays for every kind.
pub async fn mount_empty_data(server: &MockServer) {
    for &kind in DataKind::ALL {
        mount_data(server, kind, 200, json!({ kind.as_str(): [] })).await;
    }
}

pub fn readings_body(points: &[(DateTime<Utc>, i64)]) -> Value {
    let readings: Vec<Value> = points
        .iter()
        .map(|(ts, value)| json!({ "timestamp": iso(*ts), "value": value, "trend": "flat" }))
        .collect();
    json!({ "readings": readings })
}

pub fn boluses_body(points: &[(DateTime<Utc>, f64, f64)]) -> Value {
    let boluses: Vec<Value> = points
        .iter()
        .map(|(ts, insulin, carbs)| {
            json!({ "pumpTimestamp": iso(*ts), "insulinDelivered": insulin, "carbsInput": carbs })
        })
        .collect();
    json!({ "normalBoluses": boluses })
}

pub fn basals_body(points: &[(DateTime<Utc>, f64, u64)]) -> Value {
    let basals: Vec<Value> = points
        .iter()
        .map(|(ts, rate, secs)| json!({ "pumpTimestamp": iso(*ts), "rate": rate, "duration": secs }))
        .collect();
    json!({ "scheduledBasals": basals })
}
