//! History record types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// The workflow service finished the document.
    Processed,
    /// The document failed terminally.
    Failed,
    /// A transient failure; the item will be retried.
    Retried,
    /// No callback arrived within the timeout budget.
    TimedOut,
    /// A user corrected the output (reported through callback metadata).
    Corrected,
    ConflictDetected,
    ConflictResolved,
    /// The item was removed from the live queue by the cleanup sweep.
    Archived,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HistoryAction::Processed => "processed",
            HistoryAction::Failed => "failed",
            HistoryAction::Retried => "retried",
            HistoryAction::TimedOut => "timed_out",
            HistoryAction::Corrected => "corrected",
            HistoryAction::ConflictDetected => "conflict_detected",
            HistoryAction::ConflictResolved => "conflict_resolved",
            HistoryAction::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingHistoryRecord {
    pub deal_name: String,
    pub document_path: String,
    #[serde(default)]
    pub template_id: Option<String>,
    pub action: HistoryAction,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingHistoryRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        deal_name: impl Into<String>,
        document_path: impl Into<String>,
        action: HistoryAction,
    ) -> Self {
        ProcessingHistoryRecord {
            deal_name: deal_name.into(),
            document_path: document_path.into(),
            template_id: None,
            action,
            confidence: None,
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_template(mut self, template_id: Option<String>) -> Self {
        self.template_id = template_id;
        self
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_details(mut self, details: impl IntoIterator<Item = (String, String)>) -> Self {
        self.details.extend(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let record = ProcessingHistoryRecord::new("Acme", "A.pdf", HistoryAction::Processed)
            .with_template(Some("loi-v2".to_string()))
            .with_confidence(Some(0.92))
            .with_detail("duration_secs", "42");

        assert_eq!(record.template_id.as_deref(), Some("loi-v2"));
        assert_eq!(record.confidence, Some(0.92));
        assert_eq!(record.details["duration_secs"], "42");
    }

    #[test]
    fn action_serializes_snake_case() {
        let json = serde_json::to_string(&HistoryAction::ConflictResolved).unwrap();
        assert_eq!(json, "\"conflict_resolved\"");
        assert_eq!(HistoryAction::TimedOut.to_string(), "timed_out");
    }
}
