//! Test data factories for lens types
//!
//! Fixed dates keep scenarios reproducible; every factory returns owned
//! values that tests tweak with struct update syntax.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lens_core::{BackfillTaskUnit, JobRecord, ProjectId, Row, Sink, SinkId, TenantId, TimeWindow};
use lens_storage::{InMemoryProgressStore, ProgressTracker};
use serde_json::{json, Value};
use std::sync::Arc;

/// Midnight UTC of 2024-01-`day`
pub fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

pub fn projects(ids: &[&str]) -> Vec<ProjectId> {
    ids.iter().map(|p| ProjectId::new(*p)).collect()
}

/// Sink fixtures
pub mod sink {
    use super::*;

    /// Sink `sink-1` of tenant `tenant-1`, capturing into `host-project`
    pub fn simple() -> Sink {
        Sink {
            id: SinkId::new("sink-1"),
            tenant_id: TenantId::new("tenant-1"),
            source_project: ProjectId::new("host-project"),
            source_location: "US".to_string(),
            remaining_projects: Vec::new(),
            backfill_done: false,
        }
    }

    pub fn with_id(id: &str) -> Sink {
        Sink {
            id: SinkId::new(id),
            ..simple()
        }
    }
}

/// Tracker over a fresh in-memory store, with the store handle for assertions
pub async fn tracker_with(sinks: &[Sink]) -> (ProgressTracker, InMemoryProgressStore) {
    let store = InMemoryProgressStore::new();
    let tracker = ProgressTracker::new(Arc::new(store.clone()));
    for s in sinks {
        tracker.register_sink(s).await.unwrap();
    }
    (tracker, store)
}

/// Unit for `project` covering the whole of 2024-01-`day`
pub fn unit(sink: &Sink, project: &str, day: u32) -> BackfillTaskUnit {
    BackfillTaskUnit {
        sink_id: sink.id.clone(),
        tenant_id: sink.tenant_id.clone(),
        project: ProjectId::new(project),
        date: date(day),
        window: TimeWindow::for_day(date(day)),
    }
}

/// `count` jobs of `project` created a minute apart from 2024-01-`day` 00:00
pub fn jobs(project: &str, day: u32, count: usize) -> Vec<JobRecord> {
    (0..count)
        .map(|i| JobRecord {
            job_id: format!("{project}-job-{day:02}-{i:04}"),
            project_id: project.to_string(),
            location: Some("US".to_string()),
            state: Some("DONE".to_string()),
            creation_time: Some(jan(day) + chrono::Duration::minutes(i as i64)),
            job_type: Some("QUERY".to_string()),
            total_bytes_billed: Some(10_485_760),
            ..JobRecord::default()
        })
        .collect()
}

/// One table-metadata row as the regional query would return it
pub fn table_row(project: &str, dataset: &str, table: &str) -> Row {
    let value: Value = json!({
        "project_id": project,
        "dataset_id": dataset,
        "table_id": table,
        "location": "US",
        "total_logical_bytes": 2_147_483_648_i64,
        "physical_cost": 0.08,
        "logical_cost": 0.04,
    });
    match value {
        Value::Object(row) => row,
        _ => Row::new(),
    }
}
