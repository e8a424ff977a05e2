//! # Lens Cloud GCP
//!
//! Google Cloud adapters for the lens collaborator traits: BigQuery for
//! queries, job history, bulk inserts and usage probing, Cloud Resource
//! Manager for project enumeration, and Cloud Tasks for unit dispatch.
//!
//! HTTP failures are classified into [`lens_core::ErrorKind`] here and
//! nowhere else.

pub mod auth;
pub mod bigquery;
pub mod config;
mod http;
pub mod metrics;
pub mod queue;
pub mod resource_manager;
pub mod signing;

// Re-export commonly used types
pub use auth::GcpAuth;
pub use bigquery::{BigQueryClient, BigQueryTableSink, LiveCaptureTable};
pub use config::GcpConfig;
pub use queue::CloudTasksQueue;
pub use resource_manager::ResourceManagerClient;

use lens_core::{ErrorKind, ExternalError};

/// Result type for GCP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for GCP operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("GCP API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Map an HTTP status onto the closed error classification
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        404 => ErrorKind::NotFound,
        400 => ErrorKind::BadRequest,
        403 => ErrorKind::Forbidden,
        413 | 429 => ErrorKind::Throttled,
        _ => ErrorKind::Other,
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Api { status, message } => {
                // insertAll reports oversized requests as 400
                if *status == 400 && message.to_ascii_lowercase().contains("payload size exceeds") {
                    ErrorKind::Throttled
                } else {
                    classify_status(*status)
                }
            }
            Error::Http(e) => e
                .status()
                .map(|s| classify_status(s.as_u16()))
                .unwrap_or(ErrorKind::Other),
            Error::Auth(_) | Error::Configuration(_) | Error::Internal(_) => ErrorKind::Other,
        }
    }
}

impl From<Error> for ExternalError {
    fn from(err: Error) -> Self {
        ExternalError::new(err.kind(), err.to_string())
    }
}
