//! The queue manager: admission, dispatch, and the periodic sweeps.
//!
//! [`QueueManager`] owns the [`QueueStore`] behind a single `RwLock` and
//! composes it with the deal mirrors, the history ledger and the workflow
//! trigger. No lock is held across a trigger call, a folder walk or a disk
//! write.
//!
//! # Background tasks
//!
//! [`QueueManager::start`] spawns:
//!
//! - `concurrency` dispatch workers that pop the head of the queue, mark it
//!   `Processing` and call the trigger outside the lock
//! - a timeout sweep that fails Processing items nobody called back about
//! - a persistence loop that writes a snapshot on a fixed cadence
//! - a cleanup sweep that archives old terminal items and prunes history
//!
//! [`QueueManager::stop`] cancels them, waits for in-flight trigger calls,
//! and writes one final snapshot.

use std::path::{Component, Path};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::history::{HistoryAction, HistoryLedger, ProcessingHistoryRecord};
use crate::mirror::{
    DealFolderMirror, FileProcessingState, MirrorRegistry, SyncReport, validate_deal_name,
};
use crate::queue::{QueryPage, QueueFilter, QueueStats, QueueStore, estimate_duration};
use crate::sync::EarlyCallbacks;
use crate::trigger::WorkflowTrigger;
use crate::types::{ItemId, ItemStatus, Metadata, Priority, QueueItem};

mod config;
mod dispatch;
mod lifecycle;
mod persist;
mod tasks;

pub use config::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, ManagerConfig, RetryConfig};
pub use lifecycle::FailureCause;
pub(crate) use lifecycle::{Applied, Change};
pub use persist::LoadOutcome;
pub use tasks::CleanupReport;

pub(crate) use config::to_chrono;

pub struct QueueManager {
    config: ManagerConfig,
    store: RwLock<QueueStore>,
    mirrors: Arc<MirrorRegistry>,
    history: Arc<HistoryLedger>,
    trigger: Arc<dyn WorkflowTrigger>,
    /// Callbacks whose job ID was not attached yet when they arrived.
    early_callbacks: Mutex<EarlyCallbacks>,
    /// Signalled on every admission so an idle worker picks it up at once.
    wake: Notify,
    running: Mutex<Option<tasks::Running>>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    pub fn new(
        config: ManagerConfig,
        mirrors: Arc<MirrorRegistry>,
        history: Arc<HistoryLedger>,
        trigger: Arc<dyn WorkflowTrigger>,
    ) -> Self {
        QueueManager {
            config,
            store: RwLock::new(QueueStore::new()),
            mirrors,
            history,
            trigger,
            early_callbacks: Mutex::new(EarlyCallbacks::default()),
            wake: Notify::new(),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn mirrors(&self) -> &Arc<MirrorRegistry> {
        &self.mirrors
    }

    pub fn history(&self) -> &Arc<HistoryLedger> {
        &self.history
    }

    pub(crate) fn store(&self) -> &RwLock<QueueStore> {
        &self.store
    }

    pub(crate) fn early_callbacks(&self) -> &Mutex<EarlyCallbacks> {
        &self.early_callbacks
    }

    /// Admits a document for processing.
    ///
    /// `document_path` may be deal-relative or absolute under the deal
    /// folder; the item stores its normalised deal-relative form, so
    /// `A.pdf`, `./A.pdf` and `<root>/<deal>/A.pdf` are the same document.
    /// Fails with `DuplicateActiveJob` while another item for the same
    /// (deal, document) pair is Pending, Processing or Retrying.
    #[instrument(skip(self, metadata), fields(deal = %deal_name, path = %document_path))]
    pub async fn enqueue(
        &self,
        deal_name: &str,
        document_path: &str,
        document_name: &str,
        priority: Priority,
        metadata: Metadata,
    ) -> Result<QueueItem> {
        validate_deal_name(deal_name)?;
        if document_path.trim().is_empty() || document_path.contains('\0') {
            return Err(EngineError::Validation(format!(
                "invalid document path: {document_path:?}"
            )));
        }
        let document_path = self.mirrors.document_key(deal_name, document_path);
        validate_document_path(&document_path)?;

        let document_name = if document_name.trim().is_empty() {
            Path::new(&document_path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&document_path)
                .to_string()
        } else {
            document_name.to_string()
        };

        let estimate = estimate_duration(&document_path);
        let item = QueueItem::new(
            deal_name,
            document_path,
            document_name,
            priority,
            metadata,
            self.config.max_retries,
            estimate,
        );

        let item = {
            let mut store = self.store.write().await;
            store.insert(item)?.clone()
        };
        self.wake.notify_one();

        info!(
            item_id = %item.id,
            priority = %item.priority,
            estimated_secs = item.estimated_duration_secs,
            "Enqueued document"
        );
        self.mirrors
            .mark_file_processing_state(deal_name, &item.document_path, FileProcessingState::Queued)
            .await;
        Ok(item)
    }

    /// Pops the next item and marks it `Processing`.
    ///
    /// Used by the dispatch workers. Returns `None` when nothing is Pending.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        let item = self.store.write().await.dispatch_next(Utc::now())?;
        debug!(item_id = %item.id, deal = %item.deal_name, path = %item.document_path, "Dequeued item");
        self.mirrors
            .mark_file_processing_state(
                &item.deal_name,
                &item.document_path,
                FileProcessingState::Processing,
            )
            .await;
        Some(item)
    }

    pub async fn get_item(&self, id: &ItemId) -> Option<QueueItem> {
        self.store.read().await.get(id).cloned()
    }

    pub async fn get_queue_status(&self) -> QueueStats {
        let store = self.store.read().await;
        QueueStats::compute(
            store.iter(),
            Utc::now(),
            to_chrono(self.config.throughput_window),
        )
    }

    pub async fn query_queue(&self, filter: &QueueFilter) -> Result<QueryPage> {
        filter.validate()?;
        let store = self.store.read().await;
        Ok(filter.apply(store.iter()))
    }

    /// Moves an item to `status`, merging `metadata` into it.
    ///
    /// Re-applying the current status is a no-op. Transitions the state
    /// machine does not allow fail with `InvalidTransition`. Asking for
    /// `Retrying` on an item with no retries left fails it instead.
    #[instrument(skip(self, metadata), fields(item_id = %id, status = %status))]
    pub async fn update_item_status(
        &self,
        id: &ItemId,
        status: ItemStatus,
        metadata: Metadata,
    ) -> Result<QueueItem> {
        let error = metadata.get("error").cloned();
        let change = match status {
            ItemStatus::Pending => Change::Promote,
            ItemStatus::Processing => Change::Start,
            ItemStatus::Completed => Change::Complete,
            ItemStatus::Failed => Change::Fail {
                error,
                attempt: None,
            },
            ItemStatus::Retrying => Change::Transient {
                cause: FailureCause::Reported,
                error: error.unwrap_or_else(|| "retry requested".to_string()),
                attempt: None,
            },
        };
        let applied = self.apply_change(id, change, metadata, Utc::now()).await?;
        Ok(applied.item)
    }

    /// Removes an item from the live queue.
    ///
    /// Allowed for terminal items and for Pending items that have not been
    /// dispatched yet. Processing and Retrying items cannot be removed.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn remove_item(&self, id: &ItemId) -> Result<QueueItem> {
        let removed = {
            let mut store = self.store.write().await;
            let item = store
                .get(id)
                .ok_or_else(|| EngineError::NotFound(format!("queue item {id}")))?;
            if !(item.status.is_terminal() || item.status == ItemStatus::Pending) {
                return Err(EngineError::Validation(format!(
                    "cannot remove item {id} while {}",
                    item.status
                )));
            }
            store.remove_by_id(id)
        }
        .ok_or_else(|| EngineError::NotFound(format!("queue item {id}")))?;

        info!(status = %removed.status, "Removed queue item");
        if removed.status == ItemStatus::Pending {
            self.mirrors
                .mark_file_processing_state(
                    &removed.deal_name,
                    &removed.document_path,
                    FileProcessingState::Idle,
                )
                .await;
        }
        Ok(removed)
    }

    /// Walks the deal folder and reconciles its mirror.
    ///
    /// Newly detected conflicts are recorded in the history ledger. Files
    /// seen for the first time pick up the processing state of any live
    /// queue item for them.
    #[instrument(skip(self))]
    pub async fn sync_deal(&self, deal_name: &str) -> Result<(DealFolderMirror, SyncReport)> {
        let known_conflicts: Vec<String> = self
            .mirrors
            .get(deal_name)
            .await
            .map(|m| m.unresolved_conflicts().map(|c| c.path.clone()).collect())
            .unwrap_or_default();

        let (mut mirror, report) = self.mirrors.sync(deal_name).await?;

        for path in &report.conflicted {
            if known_conflicts.contains(path) {
                continue;
            }
            let reason = mirror
                .unresolved_conflicts()
                .find(|c| &c.path == path)
                .map(|c| c.reason.to_string())
                .unwrap_or_default();
            self.history
                .record(
                    ProcessingHistoryRecord::new(deal_name, path, HistoryAction::ConflictDetected)
                        .with_detail("reason", reason),
                )
                .await;
        }

        if !report.new.is_empty() {
            let live: Vec<(String, ItemStatus)> = {
                let store = self.store.read().await;
                store
                    .iter()
                    .filter(|item| item.deal_name == deal_name && item.is_active())
                    .map(|item| (item.document_path.clone(), item.status))
                    .collect()
            };
            let mut seeded = false;
            for (path, status) in live {
                let key = self.mirrors.document_key(deal_name, &path);
                if report.new.contains(&key) {
                    self.mirrors
                        .mark_file_processing_state(deal_name, &path, file_state_for(status))
                        .await;
                    seeded = true;
                }
            }
            if seeded && let Some(updated) = self.mirrors.get(deal_name).await {
                mirror = updated;
            }
        }

        Ok((mirror, report))
    }

    pub async fn get_mirror(&self, deal_name: &str) -> Option<DealFolderMirror> {
        self.mirrors.get(deal_name).await
    }

    /// Accepts the on-disk content of `path` and clears its conflicts.
    #[instrument(skip(self))]
    pub async fn resolve_conflict(&self, deal_name: &str, path: &str) -> Result<usize> {
        let resolved = self.mirrors.resolve_conflict(deal_name, path).await?;
        if resolved > 0 {
            let key = self.mirrors.document_key(deal_name, path);
            self.history
                .record(
                    ProcessingHistoryRecord::new(deal_name, key, HistoryAction::ConflictResolved)
                        .with_detail("resolved", resolved.to_string()),
                )
                .await;
        } else {
            warn!("No unresolved conflicts to resolve");
        }
        Ok(resolved)
    }

    /// Most recent history for a deal, newest first.
    pub async fn get_history(&self, deal_name: &str, limit: usize) -> Vec<ProcessingHistoryRecord> {
        self.history.query(deal_name, limit).await
    }
}

/// Mirror processing state that corresponds to a queue status.
pub(crate) fn file_state_for(status: ItemStatus) -> FileProcessingState {
    match status {
        ItemStatus::Pending | ItemStatus::Retrying => FileProcessingState::Queued,
        ItemStatus::Processing => FileProcessingState::Processing,
        ItemStatus::Completed => FileProcessingState::Completed,
        ItemStatus::Failed => FileProcessingState::Failed,
    }
}

/// Checks a normalised document key.
fn validate_document_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(EngineError::Validation("document path is empty".to_string()));
    }
    let path = Path::new(path);
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(EngineError::Validation(format!(
            "document path is outside the deal folder: {}",
            path.display()
        )));
    }
    Ok(())
}
