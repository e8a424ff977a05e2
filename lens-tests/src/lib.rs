//! Shared test utilities for lens crates
//!
//! - **Fixtures**: sinks, task units, job records and table rows with fixed dates
//! - **Mocks**: in-memory fakes for every collaborator trait, plus a metadata
//!   token server for the GCP adapters
//! - **Builders**: signed worker requests
//! - **Assertions**: response and stored-progress checks
//!
//! # Example
//!
//! ```ignore
//! use lens_tests::{fixtures, mocks::ThrottlingSink};
//!
//! #[tokio::test]
//! async fn test_unit() {
//!     let sink = fixtures::sink::simple();
//!     let (tracker, _store) = fixtures::tracker_with(&[sink.clone()]).await;
//!     let jobs = ThrottlingSink::with_limit(40);
//!     // ...
//! }
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod mocks;

pub use builders::ExecuteRequestBuilder;
pub use fixtures::sink;
pub use mocks::{
    MockTokenServer, RecordingDispatcher, ScriptedQueryEngine, ScriptedUsageProbe, SinkFactory,
    StaticEnumerator, ThrottlingSink,
};
