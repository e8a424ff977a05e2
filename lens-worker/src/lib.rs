//! Lens worker library
//!
//! Routes, request/response types and signature checks for the worker
//! binary, exposed as a library so the router can be driven in tests.

pub mod config;
pub mod handler;
pub mod metrics;
pub mod security;
pub mod types;

pub use handler::{router, AppState};
