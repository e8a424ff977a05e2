//! Traits for the external systems the backfill and discovery flows talk to
//!
//! Implementations live in adapter crates (`lens-cloud-gcp`) and in the
//! in-memory fakes of `lens-tests`. Every method reports failures as an
//! [`ExternalError`](crate::ExternalError) that is already classified.

use crate::error::ExternalResult;
use crate::ids::{ProjectId, TenantId};
use crate::model::{JobRecord, ProjectAttributes, Row, Sink};
use crate::schema::{TableRef, TableSchema};
use crate::window::TimeWindow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

/// A lazily produced sequence of records; an `Err` item ends the stream
pub type RecordStream<T> = BoxStream<'static, ExternalResult<T>>;

/// Lists the projects a tenant owns
#[async_trait]
pub trait ResourceEnumerator: Send + Sync {
    async fn list_projects(&self, tenant: &TenantId) -> ExternalResult<Vec<ProjectId>>;
}

/// Per-project probes used to filter and classify resources
#[async_trait]
pub trait UsageProbe: Send + Sync {
    /// Whether the project ran any analytical job inside `window`
    async fn has_usage(&self, project: &ProjectId, window: &TimeWindow) -> ExternalResult<bool>;

    /// Regions the project holds data in and per-dataset storage billing model
    async fn discover_attributes(&self, project: &ProjectId) -> ExternalResult<ProjectAttributes>;
}

/// Analytical warehouse: queries, historical job listing and table management
#[async_trait]
pub trait AnalyticalQueryEngine: Send + Sync {
    /// Run `sql`, optionally pinned to a location, streaming result rows
    async fn run_query(&self, sql: &str, location: Option<&str>) -> ExternalResult<RecordStream<Row>>;

    /// Create `table` with `schema` if it does not exist yet
    async fn ensure_destination_schema(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> ExternalResult<TableRef>;

    /// Historical jobs of `project` created inside `window`
    async fn list_jobs(
        &self,
        project: &ProjectId,
        window: &TimeWindow,
    ) -> ExternalResult<RecordStream<JobRecord>>;

    /// Creation time of the earliest record the sink's live capture already holds
    async fn earliest_captured_record(&self, sink: &Sink) -> ExternalResult<Option<DateTime<Utc>>>;
}

/// Rate-limited bulk destination
#[async_trait]
pub trait BulkSink<T: Send + Sync>: Send + Sync {
    /// Persist the whole batch or fail; capacity errors come back as `Throttled`
    async fn put(&self, batch: &[T]) -> ExternalResult<()>;
}

/// Hands out bulk sinks bound to a destination table
pub trait BulkSinkFactory<T: Send + Sync>: Send + Sync {
    fn sink_for(&self, table: &TableRef) -> Arc<dyn BulkSink<T>>;
}

/// One HTTP task to hand to the dispatch queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// Worker route the task is delivered to
    pub path: String,
    pub body: Vec<u8>,
    pub dispatch_deadline: Duration,
}

/// Asynchronous task queue
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Enqueue one task, returning the queue's handle for it
    async fn enqueue(&self, task: TaskRequest) -> ExternalResult<String>;
}
