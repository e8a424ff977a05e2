//! # Lens Storage
//!
//! Hierarchical, mergeable document storage for backfill progress, and the
//! [`ProgressTracker`] that maps sinks, projects and day windows onto it.
//!
//! Two backends implement [`ProgressStore`]: an in-memory map used by tests
//! and local runs, and PostgreSQL with one JSONB document per key.

pub mod document;
pub mod memory;
pub mod metrics;
pub mod postgres;
pub mod store;
pub mod tracker;

// Re-export commonly used types
pub use document::{Document, DocumentKey};
pub use memory::InMemoryProgressStore;
pub use postgres::{PoolConfig, PostgresProgressStore};
pub use store::ProgressStore;
pub use tracker::ProgressTracker;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed document at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
