//! Identifier newtypes
//!
//! Tenants, sinks and projects are all opaque strings handed to us by
//! external systems. Wrapping them keeps the three from being mixed up in
//! function signatures that take several of them.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Tenant (customer) identifier
    TenantId
);

string_id!(
    /// Identifier of a tenant's live capture sink; the root of one backfill job
    SinkId
);

string_id!(
    /// Cloud project identifier
    ProjectId
);

impl ProjectId {
    /// Whether this project starts with any of the given prefixes
    pub fn has_prefix_in(&self, prefixes: &[&str]) -> bool {
        prefixes.iter().any(|p| self.0.starts_with(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = ProjectId::new("my-project");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"my-project\"");

        let back: SinkId = serde_json::from_str("\"sink-1\"").unwrap();
        assert_eq!(back.as_str(), "sink-1");
    }

    #[test]
    fn test_prefix_match() {
        let id = ProjectId::new("sys-12345");
        assert!(id.has_prefix_in(&["sys-"]));
        assert!(!ProjectId::new("prod-sys-1").has_prefix_in(&["sys-"]));
    }
}
