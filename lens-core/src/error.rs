//! Classified errors returned by external collaborators
//!
//! Adapters translate vendor-specific failures (HTTP status codes, API error
//! payloads) into [`ErrorKind`] exactly once, at the adapter boundary. Nothing
//! past that boundary inspects vendor error shapes.

use std::fmt;

/// Result type for collaborator calls
pub type ExternalResult<T> = std::result::Result<T, ExternalError>;

/// Closed classification of collaborator failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The tenant lacks the resource or feature
    NotFound,

    /// The request was rejected as malformed for this tenant (usually also a missing feature)
    BadRequest,

    /// Permission gap on the tenant side
    Forbidden,

    /// Capacity exceeded: payload too large or too many requests
    Throttled,

    /// Anything else; fatal for the current unit of work
    Other,
}

impl ErrorKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Throttled => "throttled",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced by a collaborator adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExternalError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExternalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttled, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    /// Payload too large or too many requests: shrink and retry
    pub fn is_capacity_exceeded(&self) -> bool {
        self.kind == ErrorKind::Throttled
    }

    /// The tenant lacks the resource or feature; skip without logging noise
    pub fn is_missing_feature(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound | ErrorKind::BadRequest)
    }
}
