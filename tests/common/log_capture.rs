//! Capture of `tracing` events for assertions on driver logs.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

/// One captured event.
#[derive(Debug, Clone)]
pub struct CapturedLog {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedLog {
    /// Value of a structured field, if recorded.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Records events on the current thread until dropped.
///
/// Works with `#[tokio::test]` (current-thread runtime); tasks spawned onto
/// other threads are not captured.
pub struct TestLogCapture {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl TestLogCapture {
    pub fn start() -> Self {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(CaptureLayer { logs: logs.clone() });
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            logs,
            _guard: guard,
        }
    }

    #[must_use]
    pub fn logs(&self) -> Vec<CapturedLog> {
        self.logs.lock().unwrap().clone()
    }

    /// Events whose message contains `needle`.
    #[must_use]
    pub fn matching(&self, needle: &str) -> Vec<CapturedLog> {
        self.logs()
            .into_iter()
            .filter(|l| l.message.contains(needle))
            .collect()
    }

    pub fn assert_logged(&self, needle: &str) {
        assert!(
            !self.matching(needle).is_empty(),
            "Expected log containing '{needle}'. Logged: {:#?}",
            self.messages()
        );
    }

    pub fn assert_logged_at_level(&self, level: Level, needle: &str) {
        assert!(
            self.matching(needle).iter().any(|l| l.level == level),
            "Expected {level} log containing '{needle}'. Logged: {:#?}",
            self.messages()
        );
    }

    pub fn assert_field_logged(&self, field_name: &str, field_value: &str) {
        let found = self
            .logs()
            .iter()
            .any(|l| l.field(field_name).is_some_and(|v| v.contains(field_value)));
        assert!(
            found,
            "Expected field {field_name}={field_value}. Logged: {:#?}",
            self.logs()
        );
    }

    pub fn assert_no_errors(&self) {
        let errors: Vec<_> = self
            .logs()
            .into_iter()
            .filter(|l| l.level == Level::ERROR)
            .collect();
        assert!(errors.is_empty(), "Unexpected errors: {errors:#?}");
    }

    fn messages(&self) -> Vec<String> {
        self.logs().into_iter().map(|l| l.message).collect()
    }
}

struct CaptureLayer {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.logs.lock().unwrap().push(CapturedLog {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn push(&mut self, name: &str, value: String) {
        if name == "message" {
            self.message = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.push(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.push(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push(field.name(), value.to_string());
    }
}
