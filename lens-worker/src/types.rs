//! Request and response bodies of the worker HTTP API

use chrono::NaiveDate;
use lens_core::{BackfillTaskUnit, ProjectId, SinkId, TenantId};
use lens_runtime::{BackfillState, DiscoveryOutcome, ScheduleOutcome, UnitOutcome};
use serde::{Deserialize, Serialize};

/// Body of `POST /tasks/backfill/schedule`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub sink_id: SinkId,
    /// Persist progress only, dispatch nothing
    #[serde(default)]
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub sink_id: SinkId,
    pub state: BackfillState,
    pub projects: Vec<ProjectId>,
    pub dispatched: usize,
    pub dispatch_failures: usize,
}

impl ScheduleResponse {
    pub fn new(sink_id: SinkId, outcome: ScheduleOutcome) -> Self {
        Self {
            sink_id,
            state: outcome.state,
            projects: outcome.projects,
            dispatched: outcome.dispatched,
            dispatch_failures: outcome.dispatch_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub sink_id: SinkId,
    pub project: ProjectId,
    pub date: NaiveDate,
    pub written: usize,
    /// Project progress after this unit
    pub percent: u8,
    pub project_done: bool,
    pub remaining_projects: usize,
}

impl ExecuteResponse {
    pub fn new(unit: BackfillTaskUnit, outcome: &UnitOutcome) -> Self {
        Self {
            sink_id: unit.sink_id,
            project: unit.project,
            date: unit.date,
            written: outcome.written,
            percent: outcome.percent,
            project_done: outcome.project_done,
            remaining_projects: outcome.remaining_projects.len(),
        }
    }
}

/// Body of `POST /tasks/discovery/tables`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub tenant_id: TenantId,
    /// Project the discovery table is written into
    pub destination_project: ProjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub tenant_id: TenantId,
    pub projects: usize,
    pub regions: Vec<String>,
    pub failed_projects: Vec<ProjectId>,
    pub chunks: usize,
    pub rows_written: usize,
    pub skipped_chunks: usize,
    pub forbidden_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl DiscoveryResponse {
    pub fn new(tenant_id: TenantId, outcome: DiscoveryOutcome) -> Self {
        Self {
            tenant_id,
            projects: outcome.projects,
            regions: outcome.regions,
            failed_projects: outcome.failed_projects,
            chunks: outcome.groups.chunks,
            rows_written: outcome.groups.rows_written,
            skipped_chunks: outcome.groups.skipped_chunks,
            forbidden_chunks: outcome.groups.forbidden_chunks,
            destination: outcome.destination.map(|t| t.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Classification of the collaborator failure behind a 500
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}
