//! Shared test utilities: proptest generators and a scriptable workflow trigger.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proptest::prelude::*;
use tokio::sync::Notify;

use crate::history::HistoryLedger;
use crate::manager::{ManagerConfig, QueueManager};
use crate::mirror::{
    Conflict, ConflictReason, DealFolderMirror, FileEntry, FileProcessingState, MirrorRegistry,
    SyncStatus,
};
use crate::trigger::{TriggerError, WorkflowTrigger};
use crate::types::{ItemId, ItemStatus, JobId, Priority, QueueItem};

pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 2020-01-01 .. 2030-01-01
    (1_577_836_800i64..1_893_456_000i64)
        .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_default())
}

pub fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::High),
        Just(Priority::Normal),
        Just(Priority::Low)
    ]
}

pub fn arb_status() -> impl Strategy<Value = ItemStatus> {
    prop::sample::select(ItemStatus::ALL.to_vec())
}

pub fn arb_queue_item() -> impl Strategy<Value = QueueItem> {
    (
        ("[A-Z][a-z]{2,8}", "[a-z]{1,8}/[a-z0-9_]{1,12}\\.(pdf|xlsx|txt)"),
        (arb_priority(), arb_status(), any::<u64>()),
        (
            arb_timestamp(),
            prop::option::of(arb_timestamp()),
            prop::option::of(arb_timestamp()),
        ),
        (0u32..5, 0u32..5, 0u64..7200),
        (
            prop::option::of("[a-z0-9-]{8,16}"),
            prop::option::of("[a-z ]{1,30}"),
        ),
        prop::collection::btree_map("[a-z_]{1,10}", "[a-zA-Z0-9 ]{0,20}", 0..3),
    )
        .prop_map(
            |(
                (deal, path),
                (priority, status, sequence),
                (enqueued_at, started_at, completed_at),
                (retry_count, max_retries, estimated_duration_secs),
                (job_id, last_error),
                metadata,
            )| {
                let document_name = path.rsplit('/').next().unwrap_or(&path).to_string();
                QueueItem {
                    id: ItemId::generate(),
                    deal_name: deal,
                    document_path: path,
                    document_name,
                    priority,
                    status,
                    sequence,
                    enqueued_at,
                    started_at,
                    completed_at,
                    retry_at: None,
                    retry_count,
                    max_retries,
                    estimated_duration_secs,
                    job_id: job_id.map(JobId::new),
                    superseded_jobs: Vec::new(),
                    last_error,
                    metadata,
                }
            },
        )
}

pub fn arb_file_state() -> impl Strategy<Value = FileProcessingState> {
    prop_oneof![
        Just(FileProcessingState::Idle),
        Just(FileProcessingState::Queued),
        Just(FileProcessingState::Processing),
        Just(FileProcessingState::Completed),
        Just(FileProcessingState::Failed),
    ]
}

pub fn arb_file_entry() -> impl Strategy<Value = FileEntry> {
    (
        "[0-9a-f]{64}",
        any::<u32>(),
        arb_timestamp(),
        arb_file_state(),
        arb_timestamp(),
    )
        .prop_map(
            |(checksum, size, modified_at, processing_state, last_synced_at)| FileEntry {
                checksum,
                size: u64::from(size),
                modified_at,
                processing_state,
                last_synced_at,
            },
        )
}

pub fn arb_conflict() -> impl Strategy<Value = Conflict> {
    (
        "[a-z]{1,8}\\.pdf",
        prop_oneof![
            Just(ConflictReason::ModifiedWhileProcessing),
            Just(ConflictReason::DeletedWhileProcessing)
        ],
        arb_timestamp(),
        any::<bool>(),
    )
        .prop_map(|(path, reason, detected_at, resolved)| Conflict {
            path,
            reason,
            detected_at,
            resolved,
        })
}

pub fn arb_mirror() -> impl Strategy<Value = DealFolderMirror> {
    (
        "[A-Z][a-z]{2,8}",
        prop::collection::btree_map("[a-z]{1,8}/[a-z]{1,8}\\.pdf", arb_file_entry(), 0..5),
        prop_oneof![
            Just(SyncStatus::InSync),
            Just(SyncStatus::Stale),
            Just(SyncStatus::Conflicted)
        ],
        prop::collection::vec(arb_conflict(), 0..3),
        prop::option::of(arb_timestamp()),
    )
        .prop_map(
            |(deal, files, sync_status, conflicts, last_synced_at)| DealFolderMirror {
                root_path: PathBuf::from("/deals").join(&deal),
                deal_name: deal,
                files,
                sync_status,
                conflicts,
                last_synced_at,
            },
        )
}

/// A workflow trigger that records every call and can be scripted to fail
/// or to block until released.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    calls: Mutex<Vec<QueueItem>>,
    failures: Mutex<VecDeque<TriggerError>>,
    gate: Option<Arc<Notify>>,
    called: Notify,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits for `gate` to be notified before returning.
    pub fn gated(gate: Arc<Notify>) -> Self {
        RecordingTrigger {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// The next call fails as unavailable with `message`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap()
            .push_back(TriggerError::Unavailable(message.into()));
    }

    /// The next call rejects the item with `message`.
    pub fn reject_next(&self, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap()
            .push_back(TriggerError::Rejected(message.into()));
    }

    pub fn calls(&self) -> Vec<QueueItem> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Waits until at least `n` calls have been made.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.called.notified();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }

    pub fn job_id_for(item: &QueueItem, attempt: usize) -> JobId {
        JobId::new(format!("job-{}-{attempt}", item.id))
    }
}

#[async_trait]
impl WorkflowTrigger for RecordingTrigger {
    async fn trigger(&self, item: &QueueItem) -> Result<JobId, TriggerError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(item.clone());
            calls.iter().filter(|c| c.id == item.id).count()
        };
        self.called.notify_waiters();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(Self::job_id_for(item, attempt)),
        }
    }
}

/// A manager over a temporary deals root and in-memory history.
pub fn test_manager(
    config: ManagerConfig,
    deals_root: impl Into<PathBuf>,
    trigger: Arc<dyn WorkflowTrigger>,
) -> Arc<QueueManager> {
    Arc::new(QueueManager::new(
        config,
        Arc::new(MirrorRegistry::new(deals_root)),
        Arc::new(HistoryLedger::in_memory()),
        trigger,
    ))
}
