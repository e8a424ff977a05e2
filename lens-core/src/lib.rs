//! # Lens Core
//!
//! Domain model for historical usage backfill and table discovery, plus the
//! narrow collaborator contracts (resource enumeration, usage probing,
//! analytical queries, bulk sinks, task dispatch) the runtime is written against.

pub mod collaborators;
pub mod error;
pub mod ids;
pub mod model;
pub mod schema;
pub mod window;

// Re-export commonly used types
pub use collaborators::{
    AnalyticalQueryEngine, BulkSink, BulkSinkFactory, RecordStream, ResourceEnumerator,
    TaskDispatcher, TaskRequest, UsageProbe,
};
pub use error::{ErrorKind, ExternalError, ExternalResult};
pub use ids::{ProjectId, SinkId, TenantId};
pub use model::{
    BackfillTaskUnit, DatedWindow, DayWindow, DiscoveryRow, JobRecord, ProjectAttributes,
    ProjectProgress, Row, Sink,
};
pub use schema::{FieldMode, FieldSchema, FieldType, TableRef, TableSchema};
pub use window::{BackfillBounds, TimeWindow};
