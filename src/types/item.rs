//! Queue items and their lifecycle.
//!
//! A [`QueueItem`] is one document's unit of scheduled work. Its [`ItemStatus`]
//! follows a small state machine:
//!
//! ```text
//! Pending ──► Processing ──► Completed
//!    ▲            │    └───► Failed
//!    │            ▼            ▲
//!    └─────── Retrying ────────┘
//! ```
//!
//! `Completed` and `Failed` are terminal.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ItemId, JobId};

/// Caller-supplied context attached to an item.
///
/// A `BTreeMap` keeps serialization order stable, which the snapshot checksum
/// relies on.
pub type Metadata = BTreeMap<String, String>;

/// Scheduling priority.
///
/// The derived ordering is the dispatch order: `High < Normal < Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 5] = [
        ItemStatus::Pending,
        ItemStatus::Processing,
        ItemStatus::Completed,
        ItemStatus::Failed,
        ItemStatus::Retrying,
    ];

    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    /// Returns true for the statuses covered by the duplicate-admission check.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if the state machine permits moving from `self` to `next`.
    ///
    /// Self-transitions are not listed here; callers treat them as no-ops.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Retrying)
                | (Retrying, Pending)
                | (Retrying, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown status: {s}"))
    }
}

/// One document's unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub deal_name: String,
    pub document_path: String,
    pub document_name: String,
    pub priority: Priority,
    pub status: ItemStatus,

    /// Admission order, assigned by the store. Final FIFO tie-break.
    #[serde(default)]
    pub sequence: u64,

    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Earliest time a `Retrying` item may return to `Pending`.
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Expected processing time, used by the timeout sweep.
    pub estimated_duration_secs: u64,

    /// Job ID of the most recent trigger, if the trigger has returned.
    #[serde(default)]
    pub job_id: Option<JobId>,

    /// Job IDs of earlier attempts, oldest first. Callbacks for these are
    /// stale.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded_jobs: Vec<JobId>,

    /// Most recent failure detail.
    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl QueueItem {
    /// Creates a new `Pending` item with a fresh ID.
    pub fn new(
        deal_name: impl Into<String>,
        document_path: impl Into<String>,
        document_name: impl Into<String>,
        priority: Priority,
        metadata: Metadata,
        max_retries: u32,
        estimated_duration: Duration,
    ) -> Self {
        QueueItem {
            id: ItemId::generate(),
            deal_name: deal_name.into(),
            document_path: document_path.into(),
            document_name: document_name.into(),
            priority,
            status: ItemStatus::Pending,
            sequence: 0,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_at: None,
            retry_count: 0,
            max_retries,
            estimated_duration_secs: estimated_duration.num_seconds().max(0) as u64,
            job_id: None,
            superseded_jobs: Vec::new(),
            last_error: None,
            metadata,
        }
    }

    /// The duplicate-admission key.
    pub fn key(&self) -> (String, String) {
        (self.deal_name.clone(), self.document_path.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn estimated_duration(&self) -> Duration {
        Duration::seconds(self.estimated_duration_secs as i64)
    }

    /// Returns true if another attempt is allowed after a transient failure.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Time between enqueue and dispatch, if dispatched.
    pub fn wait_time(&self) -> Option<Duration> {
        self.started_at.map(|started| started - self.enqueued_at)
    }

    /// Time between dispatch and completion, if both happened.
    pub fn processing_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item() -> QueueItem {
        QueueItem::new(
            "Acme",
            "/deals/Acme/A.pdf",
            "A.pdf",
            Priority::Normal,
            Metadata::new(),
            3,
            Duration::minutes(10),
        )
    }

    #[test]
    fn priority_sort_order_is_high_normal_low() {
        let mut priorities = vec![Priority::Low, Priority::High, Priority::Normal];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::High, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn status_terminality() {
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(ItemStatus::Pending.is_active());
        assert!(ItemStatus::Processing.is_active());
        assert!(ItemStatus::Retrying.is_active());
    }

    #[test]
    fn state_machine_rejects_skips() {
        assert!(!ItemStatus::Pending.can_transition_to(ItemStatus::Completed));
        assert!(!ItemStatus::Pending.can_transition_to(ItemStatus::Retrying));
        assert!(!ItemStatus::Retrying.can_transition_to(ItemStatus::Processing));
        assert!(ItemStatus::Processing.can_transition_to(ItemStatus::Retrying));
        assert!(ItemStatus::Retrying.can_transition_to(ItemStatus::Pending));
    }

    proptest! {
        #[test]
        fn terminal_statuses_have_no_exits(
            from in prop::sample::select(vec![ItemStatus::Completed, ItemStatus::Failed]),
            to in prop::sample::select(ItemStatus::ALL.to_vec()),
        ) {
            prop_assert!(!from.can_transition_to(to));
        }

        #[test]
        fn status_display_parses_back(status in prop::sample::select(ItemStatus::ALL.to_vec())) {
            prop_assert_eq!(status.to_string().parse::<ItemStatus>().unwrap(), status);
        }
    }

    #[test]
    fn new_item_is_pending_with_no_timestamps() {
        let item = item();
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(item.started_at.is_none());
        assert!(item.completed_at.is_none());
        assert_eq!(item.estimated_duration(), Duration::minutes(10));
        assert!(item.has_retries_left());
    }

    #[test]
    fn durations_derive_from_timestamps() {
        let mut item = item();
        let start = item.enqueued_at + Duration::seconds(30);
        item.started_at = Some(start);
        item.completed_at = Some(start + Duration::seconds(90));
        assert_eq!(item.wait_time(), Some(Duration::seconds(30)));
        assert_eq!(item.processing_time(), Some(Duration::seconds(90)));
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let mut json = serde_json::to_value(item()).unwrap();
        let obj = json.as_object_mut().unwrap();
        for field in [
            "sequence",
            "retry_at",
            "job_id",
            "superseded_jobs",
            "last_error",
            "metadata",
        ] {
            obj.remove(field);
        }
        let parsed: QueueItem = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.sequence, 0);
        assert!(parsed.superseded_jobs.is_empty());
        assert!(parsed.metadata.is_empty());
    }
}
