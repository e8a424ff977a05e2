//! # Lens Runtime
//!
//! Backfill scheduling and unit execution, adaptive bulk writes, bounded
//! discovery fan-out and the tables-discovery cycle.

pub mod backfill_executor;
pub mod batch_writer;
pub mod concurrency;
pub mod discovery;
pub mod metrics;
pub mod scheduler;
pub mod schemas;
pub mod state_machine;
pub mod worker_pool;

// Re-export commonly used types
pub use backfill_executor::{ExecutorConfig, UnitExecutor, UnitOutcome};
pub use batch_writer::{ThrottleAwareBatchWriter, WriteReport};
pub use concurrency::ConcurrencyLimiter;
pub use discovery::{
    BatcherConfig, DiscoveryOutcome, RegionQueryBatcher, TablesDiscovery, TablesDiscoveryConfig,
};
pub use scheduler::{BackfillScheduler, ScheduleOutcome, SchedulerConfig};
pub use state_machine::{BackfillState, BackfillStateMachine};
pub use worker_pool::{DiscoveryWorkerPool, PoolReport};

use lens_core::{ErrorKind, ExternalError};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("External error: {0}")]
    External(#[from] ExternalError),

    #[error("Bulk write aborted after {written} records: {source}")]
    WriteAborted {
        written: usize,
        #[source]
        source: ExternalError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] lens_storage::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classification of the underlying collaborator failure, if any
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::External(e) | Error::WriteAborted { source: e, .. } => Some(e.kind),
            _ => None,
        }
    }
}
