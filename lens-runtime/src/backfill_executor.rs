//! Unit executor: backfill one project for one day
//!
//! A producer task streams historical jobs into a bounded queue; the consumer
//! buffers them and hands full buffers to the [`ThrottleAwareBatchWriter`].
//! The day window is flipped to done only after every record is durable, and
//! the project and sink progress are rolled up from the stored windows.

use crate::batch_writer::ThrottleAwareBatchWriter;
use crate::metrics::UNIT_DURATION;
use crate::{Error, Result};
use chrono::Utc;
use futures::StreamExt;
use lens_core::{
    AnalyticalQueryEngine, BackfillTaskUnit, BulkSinkFactory, ExternalResult, JobRecord,
    ProjectId, TableRef,
};
use lens_storage::ProgressTracker;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the unit executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Records buffered before each insert (default: 500)
    pub buffer_rows: usize,
    /// Records the producer may run ahead of the writer (default: 1000)
    pub queue_capacity: usize,
    /// Historical jobs table, inside the sink's source project
    pub dataset: String,
    pub table: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            buffer_rows: 500,
            queue_capacity: 1000,
            dataset: "lens_usage".to_string(),
            table: "historical_jobs".to_string(),
        }
    }
}

/// What one unit achieved
#[derive(Debug)]
pub struct UnitOutcome {
    pub written: usize,
    /// Project progress after this unit
    pub percent: u8,
    pub project_done: bool,
    pub remaining_projects: Vec<ProjectId>,
    /// Progress clean-up, present when this unit finished the whole sink
    pub cleanup: Option<JoinHandle<usize>>,
}

pub struct UnitExecutor {
    tracker: ProgressTracker,
    engine: Arc<dyn AnalyticalQueryEngine>,
    sinks: Arc<dyn BulkSinkFactory<JobRecord>>,
    config: ExecutorConfig,
}

impl UnitExecutor {
    pub fn new(
        tracker: ProgressTracker,
        engine: Arc<dyn AnalyticalQueryEngine>,
        sinks: Arc<dyn BulkSinkFactory<JobRecord>>,
        config: ExecutorConfig,
    ) -> Self {
        let config = ExecutorConfig {
            buffer_rows: config.buffer_rows.max(1),
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        Self {
            tracker,
            engine,
            sinks,
            config,
        }
    }

    /// Backfill one (project, day) unit
    ///
    /// Any failure leaves the window not done so a redelivery of the same
    /// unit resumes it; records already written may be written again.
    #[instrument(
        skip(self, unit, cancel),
        fields(sink_id = %unit.sink_id, project = %unit.project, date = %unit.date)
    )]
    pub async fn execute(
        &self,
        unit: &BackfillTaskUnit,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome> {
        let started = Instant::now();
        let result = self.run_unit(unit, cancel).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(outcome) => {
                UNIT_DURATION.with_label_values(&["success"]).observe(elapsed);
                info!(
                    written = outcome.written,
                    percent = outcome.percent,
                    remaining = outcome.remaining_projects.len(),
                    duration_secs = elapsed,
                    "Backfill unit completed"
                );
            }
            Err(e) => {
                UNIT_DURATION.with_label_values(&["failure"]).observe(elapsed);
                error!(error = %e, duration_secs = elapsed, "Backfill unit failed");
            }
        }
        result
    }

    async fn run_unit(
        &self,
        unit: &BackfillTaskUnit,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome> {
        let sink = self.tracker.get_sink(&unit.sink_id).await?;
        let tracked = self
            .tracker
            .touch_day_window(&unit.sink_id, &unit.project, unit.date, &unit.window, Utc::now())
            .await?;
        if !tracked {
            warn!("Unit has no stored window, progress was collected or pruned");
        }

        let table = TableRef::new(
            sink.source_project.as_str(),
            &self.config.dataset,
            &self.config.table,
        );
        let writer = ThrottleAwareBatchWriter::new(self.sinks.sink_for(&table), "historical_jobs")
            .with_cancellation(cancel.clone());

        let stream = self.engine.list_jobs(&unit.project, &unit.window).await?;
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let producer = tokio::spawn(produce(stream, tx, cancel.clone()));

        let consumed = self.consume(rx, &writer).await;
        if let Err(e) = producer.await {
            warn!(error = %e, "Job producer task panicked");
        }
        let written = consumed?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.tracker
            .complete_day_window(&unit.sink_id, &unit.project, unit.date, &unit.window, Utc::now())
            .await?;
        let progress = self
            .tracker
            .roll_up_project(&unit.sink_id, &unit.project)
            .await?;
        let (remaining_projects, cleanup) = self.tracker.roll_up_remaining(&unit.sink_id).await?;

        Ok(UnitOutcome {
            written,
            percent: progress.percent,
            project_done: progress.done,
            remaining_projects,
            cleanup,
        })
    }

    /// Drain the queue through the writer; returns records written
    ///
    /// An error item flushes what is buffered once more, then is returned.
    async fn consume(
        &self,
        mut rx: mpsc::Receiver<ExternalResult<JobRecord>>,
        writer: &ThrottleAwareBatchWriter<JobRecord>,
    ) -> Result<usize> {
        let mut buffer: Vec<JobRecord> = Vec::with_capacity(self.config.buffer_rows);
        let mut written = 0;

        while let Some(item) = rx.recv().await {
            match item {
                Ok(mut record) => {
                    record.ts = Some(Utc::now());
                    buffer.push(record);
                    if buffer.len() >= self.config.buffer_rows {
                        written += writer.insert(&buffer).await?.written;
                        buffer.clear();
                    }
                }
                Err(e) => {
                    match writer.insert(&buffer).await {
                        Ok(report) => written += report.written,
                        Err(flush) => {
                            warn!(error = %flush, buffered = buffer.len(), "Flush after stream error failed");
                        }
                    }
                    debug!(written, "Job stream failed after partial write");
                    return Err(e.into());
                }
            }
        }

        if !buffer.is_empty() {
            written += writer.insert(&buffer).await?.written;
        }
        Ok(written)
    }
}

/// Forward stream items into the queue until it ends, errors or is cancelled
async fn produce(
    mut stream: lens_core::RecordStream<JobRecord>,
    tx: mpsc::Sender<ExternalResult<JobRecord>>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };
        let Some(item) = item else {
            break;
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}
