//! Shared helpers for integration tests.
//!
//! - `fixtures`: Glooko mock endpoints and response bodies
//! - `logger`: per-test progress logging
//! - `log_capture`: assertions on `tracing` output

pub mod fixtures;
pub mod log_capture;
pub mod logger;
