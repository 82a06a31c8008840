//! Fetch pipeline executor.
//!
//! Sequences one cycle's fetch, align and transform steps. Fetches for all
//! tracked kinds run concurrently and are joined; a single failing kind fails
//! the whole run so the cursor never moves past data that was not fetched.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::models::{DataKind, PollCursor, RawBatch, TransformedBatch};
use super::session::Session;
use super::source::{Aligner, DataSource, PassThroughAligner, Transformer};
use crate::error::Result;

/// Result of a successful pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub records: TransformedBatch,
    /// Latest source timestamp per kind, for advancing the cursor.
    pub latest: BTreeMap<DataKind, DateTime<Utc>>,
    /// Raw records fetched across all kinds.
    pub fetched: usize,
}

/// Fetch, align and transform for one source.
pub struct FetchPipeline {
    source: Arc<dyn DataSource>,
    aligner: Arc<dyn Aligner>,
    transformer: Arc<dyn Transformer>,
    timezone_offset_ms: i64,
}

impl FetchPipeline {
    /// Pipeline with the default pass-through alignment step.
    #[must_use]
    pub fn new(
        source: Arc<dyn DataSource>,
        transformer: Arc<dyn Transformer>,
        timezone_offset_ms: i64,
    ) -> Self {
        Self {
            source,
            aligner: Arc::new(PassThroughAligner),
            transformer,
            timezone_offset_ms,
        }
    }

    /// Replace the alignment step.
    #[must_use]
    pub fn with_aligner(mut self, aligner: Arc<dyn Aligner>) -> Self {
        self.aligner = aligner;
        self
    }

    /// Name of the underlying data source.
    #[must_use]
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Run one cycle against `session`, bounded below by `cursor`.
    ///
    /// # Errors
    ///
    /// The first fetch error of any kind, or an alignment/transform error.
    pub async fn run(&self, session: &Session, cursor: &PollCursor) -> Result<PipelineOutput> {
        let start = Instant::now();
        let kinds = self.source.kinds();

        let fetches = kinds.iter().map(|&kind| {
            let since = cursor.since(kind);
            async move {
                let records = self.source.fetch(kind, &session.token, since).await?;
                tracing::debug!(
                    source = self.source.name(),
                    kind = %kind,
                    since = ?since,
                    count = records.len(),
                    "Fetched records"
                );
                Ok::<_, crate::error::BridgeError>((kind, records))
            }
        });
        let batch: RawBatch = futures::future::try_join_all(fetches)
            .await?
            .into_iter()
            .collect();

        let fetched = batch.len();
        let latest = batch.latest_timestamps();

        let aligned = self.aligner.align(batch, self.timezone_offset_ms)?;
        let records = self.transformer.transform(&aligned, self.timezone_offset_ms)?;

        tracing::info!(
            source = self.source.name(),
            fetched,
            entries = records.entries.len(),
            treatments = records.treatments.len(),
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Pipeline run complete"
        );

        Ok(PipelineOutput {
            records,
            latest,
            fetched,
        })
    }
}

impl std::fmt::Debug for FetchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPipeline")
            .field("source", &self.source.name())
            .field("timezone_offset_ms", &self.timezone_offset_ms)
            .finish_non_exhaustive()
    }
}
