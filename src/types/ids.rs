//! Newtype wrappers for queue identifiers.
//!
//! These types prevent accidental mixing of the engine's own item IDs with the
//! job IDs handed back by the external workflow execution service.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a queue item, generated at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        ItemId(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(s: impl Into<String>) -> Self {
        ItemId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (8-character) version of the ID for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

/// Identifier assigned by the workflow execution service when a job is triggered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(s: impl Into<String>) -> Self {
        JobId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod item_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn serde_roundtrip(s in "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}") {
                let id = ItemId::new(&s);
                let json = serde_json::to_string(&id).unwrap();
                prop_assert_eq!(&json, &format!("\"{}\"", s));
                let parsed: ItemId = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(id, parsed);
            }

            #[test]
            fn short_is_prefix(s in "[0-9a-f]{8,36}") {
                let id = ItemId::new(&s);
                prop_assert_eq!(id.short(), &s[..8]);
            }
        }

        #[test]
        fn generate_is_unique() {
            let a = ItemId::generate();
            let b = ItemId::generate();
            assert_ne!(a, b);
            assert_eq!(a.as_str().len(), 36);
        }

        #[test]
        fn short_handles_short_input() {
            assert_eq!(ItemId::new("abc").short(), "abc");
        }
    }

    mod job_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn display_matches_underlying(s in "[a-zA-Z0-9_-]{1,40}") {
                let id = JobId::new(&s);
                prop_assert_eq!(format!("{}", id), s);
            }
        }
    }
}
