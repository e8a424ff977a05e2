//! Prometheus metrics for progress storage
//!
//! This module defines metrics for:
//! - Store operations by backend
//! - PostgreSQL operation latency
//! - Garbage-collected progress documents

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};

lazy_static! {
    /// Store operations counter
    ///
    /// Labels:
    /// - backend: "memory" or "postgres"
    /// - operation: get, set, merge, delete, list_children, delete_many
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_progress_store_operations_total",
        "Total number of progress store operations",
        &["backend", "operation"]
    )
    .expect("Failed to register progress_store_operations_total metric");

    /// PostgreSQL operation latency
    ///
    /// Labels:
    /// - operation: get, set, merge, delete, list_children, delete_many
    pub static ref STORE_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "lens_progress_store_operation_duration_seconds",
        "Latency of PostgreSQL progress store operations",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register progress_store_operation_duration metric");

    /// Documents removed by garbage collection of completed sinks
    pub static ref GC_DELETED_DOCUMENTS_TOTAL: IntCounter = register_int_counter!(
        "lens_progress_gc_deleted_documents_total",
        "Total number of progress documents removed after sink completion"
    )
    .expect("Failed to register progress_gc_deleted_documents_total metric");
}
