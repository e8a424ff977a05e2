//! Adaptive bulk writer for rate-limited sinks
//!
//! The writer walks a cursor `[start, end)` over the input. A successful put
//! advances `start` to `end`; a capacity error halves the current batch size
//! and retries from the same `start`. Every call starts from the full input
//! length, nothing is remembered between calls.

use crate::metrics::{BATCH_ROWS_WRITTEN_TOTAL, BATCH_WRITE_ATTEMPTS_TOTAL};
use crate::{Error, Result};
use lens_core::BulkSink;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Summary of one `insert` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Records durably accepted by the sink
    pub written: usize,
    /// Number of `put` calls
    pub attempts: usize,
    /// Number of `put` calls rejected for capacity
    pub throttled: usize,
}

pub struct ThrottleAwareBatchWriter<T: Send + Sync> {
    sink: Arc<dyn BulkSink<T>>,
    destination: String,
    cancel: CancellationToken,
}

impl<T: Send + Sync> ThrottleAwareBatchWriter<T> {
    /// `destination` labels logs and metrics
    pub fn new(sink: Arc<dyn BulkSink<T>>, destination: impl Into<String>) -> Self {
        Self {
            sink,
            destination: destination.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop issuing puts once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Write all records, shrinking the batch on capacity errors
    ///
    /// On a non-capacity error the records before the failing batch are
    /// durable and reported through [`Error::WriteAborted`].
    pub async fn insert(&self, records: &[T]) -> Result<WriteReport> {
        let len = records.len();
        let mut report = WriteReport::default();
        let mut start = 0;
        let mut size = len;
        let mut end = len;

        while start < len {
            if self.cancel.is_cancelled() {
                warn!(
                    destination = %self.destination,
                    written = start,
                    total = len,
                    "Bulk write cancelled"
                );
                return Err(Error::Cancelled);
            }

            report.attempts += 1;
            match self.sink.put(&records[start..end]).await {
                Ok(()) => {
                    BATCH_WRITE_ATTEMPTS_TOTAL
                        .with_label_values(&[self.destination.as_str(), "ok"])
                        .inc();
                    BATCH_ROWS_WRITTEN_TOTAL
                        .with_label_values(&[self.destination.as_str()])
                        .inc_by((end - start) as u64);
                    start = end;
                    end = (start + size).min(len);
                }
                Err(e) if e.is_capacity_exceeded() => {
                    BATCH_WRITE_ATTEMPTS_TOTAL
                        .with_label_values(&[self.destination.as_str(), "throttled"])
                        .inc();
                    report.throttled += 1;
                    size = ((end - start) / 2).max(1);
                    end = start + size;
                    debug!(
                        destination = %self.destination,
                        start,
                        batch_size = size,
                        error = %e,
                        "Sink capacity exceeded, halving batch"
                    );
                }
                Err(e) => {
                    BATCH_WRITE_ATTEMPTS_TOTAL
                        .with_label_values(&[self.destination.as_str(), "failed"])
                        .inc();
                    warn!(
                        destination = %self.destination,
                        written = start,
                        total = len,
                        error = %e,
                        "Bulk write aborted"
                    );
                    return Err(Error::WriteAborted {
                        written: start,
                        source: e,
                    });
                }
            }
        }

        report.written = start;
        Ok(report)
    }
}
