//! Prometheus metrics for backfill and discovery runtime operations

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

lazy_static! {
    /// Bulk sink `put` calls
    ///
    /// Labels:
    /// - destination: writer label, e.g. "historical_jobs", "tables_discovery"
    /// - outcome: "ok", "throttled", "failed"
    pub static ref BATCH_WRITE_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_batch_write_attempts_total",
        "Total number of bulk sink put calls",
        &["destination", "outcome"]
    )
    .expect("lens_batch_write_attempts_total metric registration");

    /// Rows durably written through the batch writer
    pub static ref BATCH_ROWS_WRITTEN_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_batch_rows_written_total",
        "Total number of rows accepted by bulk sinks",
        &["destination"]
    )
    .expect("lens_batch_rows_written_total metric registration");

    /// Worker pool probe results
    ///
    /// Labels:
    /// - outcome: "retained", "filtered", "failed", "denylisted"
    pub static ref POOL_PROBES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_pool_probes_total",
        "Total number of resources probed by the discovery worker pool",
        &["outcome"]
    )
    .expect("lens_pool_probes_total metric registration");

    /// Backfill scheduler state transitions
    ///
    /// Labels:
    /// - from_state, to_state: BackfillState names
    /// - status: "ok", "rejected"
    pub static ref STATE_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_backfill_state_transitions_total",
        "Total number of backfill scheduler state transitions",
        &["from_state", "to_state", "status"]
    )
    .expect("lens_backfill_state_transitions_total metric registration");

    /// Task unit enqueue outcomes
    ///
    /// Labels:
    /// - status: "success", "failure", "skipped_done"
    pub static ref DISPATCH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_backfill_dispatch_total",
        "Total number of backfill task units dispatched",
        &["status"]
    )
    .expect("lens_backfill_dispatch_total metric registration");

    /// Unit executor duration
    ///
    /// Labels:
    /// - status: "success", "failure"
    pub static ref UNIT_DURATION: HistogramVec = register_histogram_vec!(
        "lens_backfill_unit_duration_seconds",
        "Duration of one backfill unit (project x day)",
        &["status"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .expect("lens_backfill_unit_duration_seconds metric registration");

    /// Discovery chunk outcomes
    ///
    /// Labels:
    /// - outcome: "written", "skipped", "forbidden", "failed"
    pub static ref DISCOVERY_CHUNKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_discovery_chunks_total",
        "Total number of discovery query chunks by outcome",
        &["outcome"]
    )
    .expect("lens_discovery_chunks_total metric registration");
}
