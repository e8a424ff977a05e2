//! Document keys and bodies
//!
//! Keys are slash-separated paths alternating collection and id:
//! `sink/{sinkID}/project/{projectID}/day/{YYYY-MM-DD}`.

use chrono::NaiveDate;
use lens_core::{ProjectId, SinkId};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored document: a flat JSON object merged key by key
pub type Document = serde_json::Map<String, Value>;

pub const SINKS: &str = "sink";
pub const PROJECTS: &str = "project";
pub const DAYS: &str = "day";

/// Path of one document in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    path: String,
}

impl DocumentKey {
    /// Root document of a sink
    pub fn sink(sink: &SinkId) -> Self {
        Self {
            path: format!("{}/{}", SINKS, sink),
        }
    }

    /// Progress document of one project under a sink
    pub fn project(sink: &SinkId, project: &ProjectId) -> Self {
        Self::sink(sink).child(PROJECTS, project.as_str())
    }

    /// Day window document of one (sink, project, date)
    pub fn day(sink: &SinkId, project: &ProjectId, date: NaiveDate) -> Self {
        Self::project(sink, project).child(DAYS, &date.format("%Y-%m-%d").to_string())
    }

    pub fn child(&self, collection: &str, id: &str) -> Self {
        Self {
            path: format!("{}/{}/{}", self.path, collection, id),
        }
    }

    /// Rebuild a key from a stored path
    pub fn from_path(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the collection holding this document (`sink/s1/project`)
    pub fn collection_path(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }

    /// Last path segment
    pub fn id(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// Collection path for children of `self` named `collection`
    pub fn children_path(&self, collection: &str) -> String {
        format!("{}/{}", self.path, collection)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Serialize a value into a document; non-object values are rejected
pub fn to_document<T: Serialize>(key: &DocumentKey, value: &T) -> crate::Result<Document> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(crate::Error::ValidationError(format!(
            "document at {} must be an object, got {}",
            key, other
        ))),
        Err(source) => Err(crate::Error::Malformed {
            path: key.path().to_string(),
            source,
        }),
    }
}

pub fn from_document<T: DeserializeOwned>(key: &DocumentKey, doc: Document) -> crate::Result<T> {
    serde_json::from_value(Value::Object(doc)).map_err(|source| crate::Error::Malformed {
        path: key.path().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = DocumentKey::day(
            &SinkId::new("s1"),
            &ProjectId::new("proj-a"),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        );
        assert_eq!(key.path(), "sink/s1/project/proj-a/day/2024-01-02");
        assert_eq!(key.collection_path(), "sink/s1/project/proj-a/day");
        assert_eq!(key.id(), "2024-01-02");
    }

    #[test]
    fn test_children_path() {
        let key = DocumentKey::sink(&SinkId::new("s1"));
        assert_eq!(key.children_path(PROJECTS), "sink/s1/project");
        assert_eq!(
            DocumentKey::project(&SinkId::new("s1"), &ProjectId::new("p")).collection_path(),
            key.children_path(PROJECTS)
        );
    }

    #[test]
    fn test_to_document_rejects_scalars() {
        let key = DocumentKey::from_path("sink/s1");
        assert!(to_document(&key, &42).is_err());
        assert!(to_document(&key, &serde_json::json!({"a": 1})).is_ok());
    }
}
