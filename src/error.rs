//! Caller-visible error taxonomy for the engine.
//!
//! Admission and query errors are returned synchronously. Processing-lifecycle
//! failures are absorbed into item state and never surface through the call
//! that admitted the item. Persistence failures only reach the log, except for
//! an explicit [`crate::manager::QueueManager::save_snapshot`] call.

use thiserror::Error;

use crate::mirror::SyncError;
use crate::trigger::TriggerError;
use crate::types::{ItemId, ItemStatus};

/// Result type alias using the engine error type.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A live item already exists for this (deal, document) pair.
    #[error("duplicate active job for {deal}/{path}: {existing}")]
    DuplicateActiveJob {
        deal: String,
        path: String,
        existing: ItemId,
    },

    /// Unknown item, job or deal.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed enqueue or query arguments.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested status change skips a required intermediate state.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },

    /// The workflow trigger call failed; the item re-enters the retry policy.
    #[error("transient dispatch failure: {0}")]
    TransientDispatch(String),

    /// The timeout sweep gave up waiting for a callback.
    #[error("no callback for {id} within {budget_secs}s")]
    Timeout { id: ItemId, budget_secs: i64 },

    /// Writing durable state failed. Retried on the next cycle.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A snapshot failed checksum or decoding on load.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true for errors that the retry policy absorbs into item state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::TransientDispatch(_) | EngineError::Timeout { .. }
        )
    }
}

impl From<SyncError> for EngineError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidDealName(_) => EngineError::Validation(err.to_string()),
            SyncError::FolderMissing(_) | SyncError::UnknownDeal(_) => {
                EngineError::NotFound(err.to_string())
            }
            SyncError::Io(e) => EngineError::Io(e),
            SyncError::Join(e) => EngineError::Io(std::io::Error::other(e)),
        }
    }
}

impl From<TriggerError> for EngineError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Unavailable(_) => EngineError::TransientDispatch(err.to_string()),
            TriggerError::Rejected(_) => EngineError::Validation(err.to_string()),
        }
    }
}
