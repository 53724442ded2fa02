//! Item state transitions and their side effects.
//!
//! Every status change, whatever triggered it (a dispatch error, the
//! timeout sweep, a workflow callback, an administrative update), goes
//! through [`QueueManager::apply_change`]. The store is mutated under its
//! write lock; the mirror and ledger are updated afterwards with the lock
//! released.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{QueueManager, file_state_for, to_chrono};
use crate::error::{EngineError, Result};
use crate::history::{HistoryAction, ProcessingHistoryRecord};
use crate::types::{ItemId, ItemStatus, Metadata, QueueItem};

/// What made a processing attempt fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The trigger call itself errored.
    Dispatch,
    /// No callback arrived within the timeout budget.
    Timeout,
    /// The workflow service or an operator asked for a retry.
    Reported,
}

/// A requested status change.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    /// Pending → Processing.
    Start,
    /// Processing → Completed.
    Complete,
    /// Processing or Retrying → Failed, regardless of retries left.
    Fail {
        error: Option<String>,
        attempt: Option<DateTime<Utc>>,
    },
    /// Processing → Retrying, or → Failed once retries are exhausted.
    Transient {
        cause: FailureCause,
        error: String,
        attempt: Option<DateTime<Utc>>,
    },
    /// Retrying → Pending, counting one retry. The previous job ID is
    /// dropped, so its callbacks are stale from here on.
    Promote,
}

impl Change {
    fn cause(&self) -> Option<FailureCause> {
        match self {
            Change::Transient { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    /// With an attempt set, the change only applies if the item is still on
    /// the attempt that started at that instant.
    fn attempt(&self) -> Option<DateTime<Utc>> {
        match self {
            Change::Fail { attempt, .. } | Change::Transient { attempt, .. } => *attempt,
            _ => None,
        }
    }
}

/// Result of [`QueueManager::apply_change`].
#[derive(Debug, Clone)]
pub(crate) struct Applied {
    pub item: QueueItem,
    pub previous: ItemStatus,
    pub changed: bool,
}

impl QueueManager {
    /// Applies `change` to an item and performs the mirror and ledger side
    /// effects.
    pub(crate) async fn apply_change(
        &self,
        id: &ItemId,
        change: Change,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        let applied = {
            let mut store = self.store.write().await;
            let current = store
                .get(id)
                .ok_or_else(|| EngineError::NotFound(format!("queue item {id}")))?;
            let previous = current.status;

            if let Some(started) = change.attempt()
                && (previous != ItemStatus::Processing || current.started_at != Some(started))
            {
                debug!(item_id = %id, status = %previous, "Attempt already superseded");
                return Ok(Applied {
                    item: current.clone(),
                    previous,
                    changed: false,
                });
            }

            let target = match &change {
                Change::Start => ItemStatus::Processing,
                Change::Complete => ItemStatus::Completed,
                Change::Fail { .. } => ItemStatus::Failed,
                Change::Promote => ItemStatus::Pending,
                Change::Transient { .. } if previous != ItemStatus::Processing => {
                    ItemStatus::Retrying
                }
                Change::Transient { .. } if current.has_retries_left() => ItemStatus::Retrying,
                Change::Transient { .. } => ItemStatus::Failed,
            };

            if target == previous {
                return Ok(Applied {
                    item: current.clone(),
                    previous,
                    changed: false,
                });
            }
            if !previous.can_transition_to(target) {
                return Err(EngineError::InvalidTransition {
                    id: id.clone(),
                    from: previous,
                    to: target,
                });
            }

            let retry = self.config.retry;
            let item = store
                .modify(id, |item| {
                    item.status = target;
                    match (&change, target) {
                        (Change::Start, _) => {
                            item.started_at = Some(now);
                            item.completed_at = None;
                        }
                        (Change::Promote, _) => {
                            item.retry_count += 1;
                            item.retry_at = None;
                            item.started_at = None;
                            item.job_id = None;
                        }
                        (Change::Transient { error, .. }, ItemStatus::Retrying) => {
                            let delay = retry.delay_for_attempt(item.retry_count);
                            item.retry_at = Some(now + to_chrono(delay));
                            item.last_error = Some(error.clone());
                        }
                        (Change::Transient { error, .. }, _) => {
                            item.completed_at = Some(now);
                            item.retry_at = None;
                            item.last_error = Some(error.clone());
                        }
                        (Change::Fail { error, .. }, _) => {
                            item.completed_at = Some(now);
                            item.retry_at = None;
                            if error.is_some() {
                                item.last_error = error.clone();
                            }
                        }
                        (Change::Complete, _) => {
                            item.completed_at = Some(now);
                            item.retry_at = None;
                        }
                    }
                    item.metadata.extend(metadata);
                    item.clone()
                })
                .ok_or_else(|| EngineError::NotFound(format!("queue item {id}")))?;

            Applied {
                item,
                previous,
                changed: true,
            }
        };

        self.after_transition(&applied, change.cause()).await;
        Ok(applied)
    }

    /// Feeds a failed attempt through the retry policy.
    ///
    /// Transient errors (`TransientDispatch`, `Timeout`) retry while the item
    /// has retries left; anything else fails the item outright.
    pub(crate) async fn fail_attempt(&self, item: &QueueItem, error: EngineError) -> Option<Applied> {
        let attempt = item.started_at;
        let change = match &error {
            EngineError::Timeout { .. } => Change::Transient {
                cause: FailureCause::Timeout,
                error: error.to_string(),
                attempt,
            },
            e if e.is_transient() => Change::Transient {
                cause: FailureCause::Dispatch,
                error: error.to_string(),
                attempt,
            },
            _ => Change::Fail {
                error: Some(error.to_string()),
                attempt,
            },
        };
        match self
            .apply_change(&item.id, change, Metadata::new(), Utc::now())
            .await
        {
            Ok(applied) => Some(applied),
            Err(e) => {
                debug!(item_id = %item.id, error = %e, "Could not record failed attempt");
                None
            }
        }
    }

    async fn after_transition(&self, applied: &Applied, cause: Option<FailureCause>) {
        if !applied.changed {
            return;
        }
        let item = &applied.item;

        match item.status {
            ItemStatus::Retrying => warn!(
                item_id = %item.id,
                retry_count = item.retry_count,
                retry_at = ?item.retry_at,
                error = item.last_error.as_deref().unwrap_or(""),
                "Attempt failed; will retry"
            ),
            ItemStatus::Failed => warn!(
                item_id = %item.id,
                retry_count = item.retry_count,
                error = item.last_error.as_deref().unwrap_or(""),
                "Item failed"
            ),
            status => info!(
                item_id = %item.id,
                from = %applied.previous,
                to = %status,
                "Item status changed"
            ),
        }

        self.mirrors
            .mark_file_processing_state(
                &item.deal_name,
                &item.document_path,
                file_state_for(item.status),
            )
            .await;

        if let Some(record) = history_for(item, cause) {
            self.history.record(record).await;
        }
    }
}

/// The ledger entry a transition into `item.status` produces, if any.
fn history_for(item: &QueueItem, cause: Option<FailureCause>) -> Option<ProcessingHistoryRecord> {
    let timed_out = cause == Some(FailureCause::Timeout);
    let action = match item.status {
        ItemStatus::Completed => HistoryAction::Processed,
        ItemStatus::Failed if timed_out => HistoryAction::TimedOut,
        ItemStatus::Failed => HistoryAction::Failed,
        ItemStatus::Retrying if timed_out => HistoryAction::TimedOut,
        ItemStatus::Retrying => HistoryAction::Retried,
        ItemStatus::Pending | ItemStatus::Processing => return None,
    };

    let mut record = ProcessingHistoryRecord::new(&item.deal_name, &item.document_path, action)
        .with_template(item.metadata.get("template_id").cloned())
        .with_confidence(item.metadata.get("confidence").and_then(|c| c.parse().ok()))
        .with_detail("item_id", item.id.as_str())
        .with_detail("status", item.status.as_str())
        .with_detail("retry_count", item.retry_count.to_string());

    if let Some(job_id) = &item.job_id {
        record = record.with_detail("job_id", job_id.as_str());
    }
    if let Some(duration) = item.processing_time() {
        record = record.with_detail("duration_secs", duration.num_seconds().to_string());
    }
    if let Some(error) = &item.last_error
        && item.status != ItemStatus::Completed
    {
        record = record.with_detail("error", error.clone());
    }
    if let Some(retry_at) = item.retry_at {
        record = record.with_detail("retry_at", retry_at.to_rfc3339());
    }
    Some(record)
}
