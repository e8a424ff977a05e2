//! Prometheus metrics for the GCP adapters

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    /// Duration of task enqueue operations in seconds
    ///
    /// Labels:
    /// - operation: "api" (one Cloud Tasks API call), "total" (end-to-end)
    pub static ref ENQUEUE_DURATION: HistogramVec = register_histogram_vec!(
        "lens_enqueue_duration_seconds",
        "Duration of task enqueue operations",
        &["operation"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("lens_enqueue_duration_seconds metric registration");

    /// Labels:
    /// - status: "success", "failure", "rate_limit"
    pub static ref ENQUEUE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_enqueue_total",
        "Total number of task enqueue attempts",
        &["status"]
    )
    .expect("lens_enqueue_total metric registration");

    /// Labels:
    /// - reason: "5xx", "429"
    pub static ref ENQUEUE_RETRIES: IntCounterVec = register_int_counter_vec!(
        "lens_enqueue_retries_total",
        "Number of retry attempts for Cloud Tasks API calls",
        &["reason"]
    )
    .expect("lens_enqueue_retries_total metric registration");

    pub static ref TOKEN_ACQUISITION_DURATION: HistogramVec = register_histogram_vec!(
        "lens_token_acquisition_duration_seconds",
        "Duration of OAuth2 token acquisition",
        &["cache_hit"],
        vec![0.001, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("lens_token_acquisition_duration_seconds metric registration");

    /// BigQuery REST calls
    ///
    /// Labels:
    /// - operation: "query", "query_page", "jobs_list", "tables_get", "tables_insert",
    ///   "datasets_list", "datasets_get", "datasets_insert", "insert_all"
    /// - outcome: "ok" or the error kind
    pub static ref BIGQUERY_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_bigquery_requests_total",
        "Total number of BigQuery API requests",
        &["operation", "outcome"]
    )
    .expect("lens_bigquery_requests_total metric registration");

    /// Rows sent through tabledata.insertAll
    ///
    /// Labels:
    /// - outcome: "ok", "throttled", "failed"
    pub static ref BIGQUERY_INSERT_ROWS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_bigquery_insert_rows_total",
        "Rows sent to BigQuery insertAll",
        &["outcome"]
    )
    .expect("lens_bigquery_insert_rows_total metric registration");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = ENQUEUE_DURATION.with_label_values(&["api"]);
        let _ = ENQUEUE_TOTAL.with_label_values(&["success"]);
        let _ = ENQUEUE_RETRIES.with_label_values(&["5xx"]);
        let _ = TOKEN_ACQUISITION_DURATION.with_label_values(&["true"]);
        let _ = BIGQUERY_REQUESTS_TOTAL.with_label_values(&["query", "ok"]);
        let _ = BIGQUERY_INSERT_ROWS_TOTAL.with_label_values(&["ok"]);
    }
}
