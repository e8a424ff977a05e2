//! Assertion helpers for worker responses and stored progress

use axum::body::Body;
use chrono::NaiveDate;
use http::{Response, StatusCode};
use http_body_util::BodyExt;
use lens_core::{ProjectId, SinkId};
use lens_storage::ProgressTracker;
use serde_json::Value;

/// Collect a response into its status and parsed JSON body
///
/// Non-JSON bodies come back as a JSON string.
pub async fn read_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

pub async fn assert_status(response: Response<Body>, expected: StatusCode) -> Value {
    let (status, body) = read_json(response).await;
    assert_eq!(status, expected, "unexpected status, body: {body}");
    body
}

/// Dates of a project's stored windows, split into (done, pending)
pub async fn window_dates(
    tracker: &ProgressTracker,
    sink: &SinkId,
    project: &str,
) -> (Vec<NaiveDate>, Vec<NaiveDate>) {
    let dates = tracker
        .get_project_dates(sink, &ProjectId::new(project))
        .await
        .unwrap();
    let (done, pending): (Vec<_>, Vec<_>) = dates.into_iter().partition(|d| d.window.done);
    (
        done.into_iter().map(|d| d.date).collect(),
        pending.into_iter().map(|d| d.date).collect(),
    )
}

/// Assert every stored window lies inside `[lower, upper]` with `min <= max`
pub async fn assert_windows_clipped(
    tracker: &ProgressTracker,
    sink: &SinkId,
    project: &str,
    lower: chrono::DateTime<chrono::Utc>,
    upper: chrono::DateTime<chrono::Utc>,
) {
    for dated in tracker
        .get_project_dates(sink, &ProjectId::new(project))
        .await
        .unwrap()
    {
        let w = &dated.window;
        assert!(
            lower <= w.min_creation_time
                && w.min_creation_time <= w.max_creation_time
                && w.max_creation_time <= upper,
            "window for {} escapes bounds: {:?}",
            dated.date,
            w
        );
    }
}
