//! Reconciles workflow service callbacks into queue, mirror and ledger state.
//!
//! Callbacks may arrive late, twice, or out of order. Anything that cannot
//! move the item forward is reported as a no-op outcome rather than an
//! error; only an unknown job is an error.
//!
//! A callback can also beat the trigger call that produced its job ID. While
//! any dispatched item is still waiting on its trigger, an unknown job's
//! callback is held in [`EarlyCallbacks`] and applied when the ID is attached.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::history::{HistoryAction, ProcessingHistoryRecord};
use crate::manager::{Change, FailureCause, QueueManager};
use crate::queue::QueueStore;
use crate::types::{ItemId, ItemStatus, JobId, Metadata, QueueItem};

/// Metadata key carrying a user correction to the workflow output.
pub const CORRECTION_KEY: &str = "correction";

/// Status reported by the workflow execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    Processing,
    Completed,
    Failed,
    Retry,
}

impl ExternalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalStatus::Processing => "processing",
            ExternalStatus::Completed => "completed",
            ExternalStatus::Failed => "failed",
            ExternalStatus::Retry => "retry",
        }
    }
}

impl fmt::Display for ExternalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExternalStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "processing" => Ok(ExternalStatus::Processing),
            "completed" => Ok(ExternalStatus::Completed),
            "failed" => Ok(ExternalStatus::Failed),
            "retry" => Ok(ExternalStatus::Retry),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// What a callback did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The item moved to `status`.
    Applied { item_id: ItemId, status: ItemStatus },
    /// The item was already in the reported status.
    Unchanged { item_id: ItemId, status: ItemStatus },
    /// The job belongs to an attempt that has since been superseded.
    Stale { item_id: ItemId },
    /// The item's current status cannot take the reported one (for example a
    /// late `processing` after `completed`).
    Ignored { item_id: ItemId, status: ItemStatus },
    /// The job ID is not known yet because its trigger call has not returned.
    /// The callback is applied once it does.
    Deferred { job_id: JobId },
}

/// How long a callback for a not-yet-attached job is held.
const EARLY_CALLBACK_TTL_SECS: i64 = 600;

/// Most callbacks held at once across all jobs.
const MAX_EARLY_CALLBACKS: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct EarlyCallback {
    pub status: ExternalStatus,
    pub metadata: Metadata,
    received_at: DateTime<Utc>,
}

/// Callbacks that arrived before their job ID was attached, by job ID, in
/// arrival order.
#[derive(Debug, Default)]
pub(crate) struct EarlyCallbacks {
    held: HashMap<JobId, Vec<EarlyCallback>>,
}

impl EarlyCallbacks {
    /// Holds a callback. Expired entries are dropped first; returns false if
    /// the buffer is still full.
    fn hold(
        &mut self,
        job_id: &JobId,
        status: ExternalStatus,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> bool {
        let cutoff = now - Duration::seconds(EARLY_CALLBACK_TTL_SECS);
        self.held.retain(|_, callbacks| {
            callbacks.retain(|c| c.received_at >= cutoff);
            !callbacks.is_empty()
        });
        if self.len() >= MAX_EARLY_CALLBACKS {
            return false;
        }
        self.held
            .entry(job_id.clone())
            .or_default()
            .push(EarlyCallback {
                status,
                metadata,
                received_at: now,
            });
        true
    }

    /// Removes and returns everything held for `job_id`.
    pub(crate) fn take(&mut self, job_id: &JobId) -> Vec<EarlyCallback> {
        self.held.remove(job_id).unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.held.values().map(Vec::len).sum()
    }
}

/// Where a callback's job ID points.
enum Resolved {
    /// The item, and whether the job is its current attempt.
    Item(QueueItem, bool),
    /// Unknown, but some dispatched item has no job ID yet.
    Awaiting,
    Unknown,
}

/// Looks `job_id` up among issued job IDs and then as an item ID.
fn resolve(store: &QueueStore, job_id: &JobId) -> Resolved {
    if let Some(item) = store.find_by_job(job_id) {
        let current = item.job_id.as_ref() == Some(job_id);
        return Resolved::Item(item.clone(), current);
    }
    if let Some(item) = store.get(&ItemId::new(job_id.as_str())) {
        return Resolved::Item(item.clone(), true);
    }
    let awaiting = store
        .iter()
        .any(|item| item.status == ItemStatus::Processing && item.job_id.is_none());
    if awaiting {
        Resolved::Awaiting
    } else {
        Resolved::Unknown
    }
}

#[derive(Debug, Clone)]
pub struct StateSynchronizer {
    manager: Arc<QueueManager>,
}

impl StateSynchronizer {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        StateSynchronizer { manager }
    }

    /// Applies a workflow callback.
    ///
    /// `job_id` is looked up among issued job IDs first and then, failing
    /// that, taken as an item ID. An unknown ID is held as `Deferred` while a
    /// trigger call is outstanding, and is `NotFound` otherwise.
    ///
    /// `processing` only confirms an item that is already Processing; it
    /// never starts one.
    #[instrument(skip(self, metadata), fields(job_id = %job_id, status = %status))]
    pub async fn synchronize_workflow_state(
        &self,
        job_id: &JobId,
        status: ExternalStatus,
        metadata: Metadata,
    ) -> Result<SyncOutcome> {
        let (item, current) = {
            // Held across the lookup so attach_job cannot slip in between the
            // miss and the hold.
            let mut early = self.manager.early_callbacks().lock().await;
            let resolved = resolve(&*self.manager.store().read().await, job_id);
            match resolved {
                Resolved::Item(item, current) => (item, current),
                Resolved::Awaiting => {
                    if !early.hold(job_id, status, metadata, Utc::now()) {
                        warn!("Early callback buffer full; dropping callback");
                        return Err(EngineError::NotFound(format!("job {job_id}")));
                    }
                    info!("Holding callback until its trigger call returns");
                    return Ok(SyncOutcome::Deferred {
                        job_id: job_id.clone(),
                    });
                }
                Resolved::Unknown => return Err(EngineError::NotFound(format!("job {job_id}"))),
            }
        };
        if !current {
            info!(item_id = %item.id, current_job = ?item.job_id, "Ignoring callback for superseded attempt");
            return Ok(SyncOutcome::Stale { item_id: item.id });
        }

        let error = metadata.get("error").cloned();
        let change = match status {
            ExternalStatus::Processing if item.status == ItemStatus::Processing => {
                debug!(item_id = %item.id, "Workflow confirmed processing");
                return Ok(SyncOutcome::Unchanged {
                    item_id: item.id,
                    status: item.status,
                });
            }
            ExternalStatus::Processing => {
                warn!(item_id = %item.id, status = %item.status, "Processing callback for an item not in flight; ignoring");
                return Ok(SyncOutcome::Ignored {
                    item_id: item.id,
                    status: item.status,
                });
            }
            ExternalStatus::Completed => Change::Complete,
            ExternalStatus::Failed => Change::Fail {
                error,
                attempt: None,
            },
            ExternalStatus::Retry => Change::Transient {
                cause: FailureCause::Reported,
                error: error.unwrap_or_else(|| "workflow requested retry".to_string()),
                attempt: None,
            },
        };
        let correction = metadata.get(CORRECTION_KEY).cloned();

        match self
            .manager
            .apply_change(&item.id, change, metadata, Utc::now())
            .await
        {
            Ok(applied) if applied.changed => {
                if let Some(correction) = correction {
                    self.record_correction(&applied.item, correction).await;
                }
                Ok(SyncOutcome::Applied {
                    item_id: applied.item.id,
                    status: applied.item.status,
                })
            }
            Ok(applied) => {
                debug!(item_id = %applied.item.id, "Duplicate callback; no change");
                Ok(SyncOutcome::Unchanged {
                    item_id: applied.item.id,
                    status: applied.item.status,
                })
            }
            Err(EngineError::InvalidTransition { id, from, to }) => {
                warn!(item_id = %id, from = %from, to = %to, "Callback does not apply to current status; ignoring");
                Ok(SyncOutcome::Ignored {
                    item_id: id,
                    status: from,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn record_correction(&self, item: &QueueItem, correction: String) {
        let record = ProcessingHistoryRecord::new(
            &item.deal_name,
            &item.document_path,
            HistoryAction::Corrected,
        )
        .with_template(item.metadata.get("template_id").cloned())
        .with_detail("item_id", item.id.as_str())
        .with_detail(CORRECTION_KEY, correction);
        self.manager.history().record(record).await;
    }
}
