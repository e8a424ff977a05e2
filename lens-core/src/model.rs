//! Backfill progress and discovery records

use crate::ids::{ProjectId, SinkId, TenantId};
use crate::window::TimeWindow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A flat record as returned by an analytical query
pub type Row = serde_json::Map<String, Value>;

/// Root of one tenant's backfill job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sink {
    pub id: SinkId,
    pub tenant_id: TenantId,
    /// Project hosting the live capture sink and its destination dataset
    pub source_project: ProjectId,
    /// Location (region) of the sink's destination dataset
    pub source_location: String,
    /// Projects whose backfill has not completed yet
    #[serde(default)]
    pub remaining_projects: Vec<ProjectId>,
    #[serde(default)]
    pub backfill_done: bool,
}

/// Per-(sink, project) completion state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProgress {
    pub project: ProjectId,
    pub done: bool,
    pub percent: u8,
}

impl ProjectProgress {
    /// Build progress for `percent`, clamped to 100; `done` iff 100
    pub fn new(project: ProjectId, percent: u8) -> Self {
        let percent = percent.min(100);
        Self {
            project,
            done: percent == 100,
            percent,
        }
    }

    /// `done_days / total_days * 100`, rounded down. A project with no
    /// days has nothing left to do and counts as complete.
    pub fn percent_of(done_days: usize, total_days: usize) -> u8 {
        if total_days == 0 {
            return 100;
        }
        ((done_days.min(total_days) * 100) / total_days) as u8
    }
}

/// The window of one (sink, project, date) and its processing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayWindow {
    pub min_creation_time: DateTime<Utc>,
    pub max_creation_time: DateTime<Utc>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_last_update_time: Option<DateTime<Utc>>,
}

impl DayWindow {
    /// A freshly scheduled, not yet processed window
    pub fn pending(window: TimeWindow) -> Self {
        Self {
            min_creation_time: window.start,
            max_creation_time: window.end,
            done: false,
            process_end_time: None,
            process_last_update_time: None,
        }
    }

    pub fn time_window(&self) -> TimeWindow {
        TimeWindow::new(self.min_creation_time, self.max_creation_time)
    }
}

/// A day window together with the calendar day it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedWindow {
    pub date: NaiveDate,
    pub window: DayWindow,
}

/// Immutable dispatch payload: backfill one project for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillTaskUnit {
    pub sink_id: SinkId,
    pub tenant_id: TenantId,
    pub project: ProjectId,
    pub date: NaiveDate,
    pub window: TimeWindow,
}

/// Attributes discovered for one project
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectAttributes {
    /// Regions (locations) in which the project holds datasets
    pub regions: Vec<String>,
    /// Dataset id -> storage billing model ("LOGICAL" / "PHYSICAL")
    pub storage_billing_models: HashMap<String, String>,
}

/// One historical analytical job, as written to the backfill destination table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Time the record was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "creationTime", default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(rename = "totalBytesProcessed", default, skip_serializing_if = "Option::is_none")]
    pub total_bytes_processed: Option<i64>,
    #[serde(rename = "totalBytesBilled", default, skip_serializing_if = "Option::is_none")]
    pub total_bytes_billed: Option<i64>,
    #[serde(rename = "totalSlotMs", default, skip_serializing_if = "Option::is_none")]
    pub total_slot_ms: Option<i64>,
    #[serde(rename = "jobType", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(rename = "cacheHit", default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(rename = "referencedTables", default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    #[serde(rename = "errorReason", default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(rename = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One table-metadata record produced by discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveryRow(pub Row);

impl DiscoveryRow {
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }
}

impl From<Row> for DiscoveryRow {
    fn from(row: Row) -> Self {
        Self(row)
    }
}
