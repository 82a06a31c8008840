//! Polling driver: sessions, fetch pipeline, backoff and scheduling.

pub mod backoff;
pub mod http;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod source;

pub use backoff::{BackoffPolicy, BackoffSpec};
pub use models::{
    CycleResult, DataKind, DriverConfig, Entry, PollCursor, RawBatch, RawRecord, TransformedBatch,
    Treatment,
};
pub use pipeline::{FetchPipeline, PipelineOutput};
pub use scheduler::{AttemptState, DriverHandle, PollingScheduler, TickReport};
pub use session::{Session, SessionDelays, SessionManager, SessionState};
pub use sink::{ChannelSink, Emission, JsonLinesSink, JsonLinesWriter, drain_to_writer};
pub use source::{
    Aligner, Authenticator, Clock, Credentials, DataSource, PassThroughAligner, SessionToken, Sink,
    SystemClock, Transformer,
};
