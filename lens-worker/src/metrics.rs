//! Prometheus metrics for the worker's HTTP surface
//!
//! Every collector registered in the default registry, including those of
//! the runtime, storage and GCP crates, is rendered at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Labels:
    /// - route: "schedule", "execute", "discovery"
    /// - status: HTTP status code
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lens_worker_requests_total",
        "Task requests handled by the worker",
        &["route", "status"]
    )
    .expect("lens_worker_requests_total metric registration");

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "lens_worker_request_duration_seconds",
        "Duration of task requests",
        &["route"],
        vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0]
    )
    .expect("lens_worker_request_duration_seconds metric registration");
}

pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[route, &status.to_string()])
        .inc();
    REQUEST_DURATION
        .with_label_values(&[route])
        .observe(duration_secs);
}

/// Default registry in the Prometheus text format
pub fn render() -> String {
    let families = prometheus::gather();
    let mut out = Vec::new();
    if TextEncoder::new().encode(&families, &mut out).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_requests_are_rendered() {
        record_request("schedule", 200, 0.01);
        let text = render();
        assert!(text.contains("lens_worker_requests_total"));
        assert!(text.contains("route=\"schedule\""));
    }
}
