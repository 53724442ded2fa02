//! Checksummed state snapshots.
//!
//! A snapshot captures every live queue item and every deal mirror so the
//! engine can resume after a restart.
//!
//! # File Format
//!
//! A single JSON document:
//!
//! ```text
//! {
//!   "schema_version": 1,
//!   "saved_at": "...",
//!   "checksum": "<sha256 hex of the body>",
//!   "queue_items": [...],
//!   "deal_mirrors": {...}
//! }
//! ```
//!
//! The checksum covers the canonical serialization of every other field. All
//! maps in the body are `BTreeMap`s, so re-serializing a decoded snapshot
//! reproduces the bytes that were hashed.
//!
//! # Atomic Writes
//!
//! Snapshots are written with [`write_atomic`]: temp file in the same
//! directory, fsync, rename, fsync the directory. A crash mid-write leaves the
//! previous snapshot intact.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::checksum::checksum_bytes;
use super::fsync::write_atomic;
use crate::mirror::DealFolderMirror;
use crate::types::QueueItem;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    #[error("checksum mismatch: recorded {recorded}, computed {computed}")]
    ChecksumMismatch { recorded: String, computed: String },
}

impl SnapshotError {
    /// Returns true if the file exists but cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SnapshotError::Json(_)
                | SnapshotError::SchemaMismatch { .. }
                | SnapshotError::ChecksumMismatch { .. }
        )
    }
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// The persisted superset of live engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub checksum: String,
    pub queue_items: Vec<QueueItem>,
    pub deal_mirrors: BTreeMap<String, DealFolderMirror>,
}

/// Borrowed view of the checksummed fields, in serialization order.
#[derive(Serialize)]
struct SnapshotBody<'a> {
    schema_version: u32,
    saved_at: &'a DateTime<Utc>,
    queue_items: &'a [QueueItem],
    deal_mirrors: &'a BTreeMap<String, DealFolderMirror>,
}

impl StateSnapshot {
    /// Builds a snapshot stamped with the current time and its checksum.
    pub fn new(
        queue_items: Vec<QueueItem>,
        deal_mirrors: BTreeMap<String, DealFolderMirror>,
    ) -> Result<Self> {
        let mut snapshot = StateSnapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            checksum: String::new(),
            queue_items,
            deal_mirrors,
        };
        snapshot.checksum = snapshot.compute_checksum()?;
        Ok(snapshot)
    }

    /// An empty snapshot, used when nothing trustworthy is on disk.
    pub fn empty() -> Self {
        let mut snapshot = StateSnapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            checksum: String::new(),
            queue_items: Vec::new(),
            deal_mirrors: BTreeMap::new(),
        };
        snapshot.checksum = snapshot.compute_checksum().unwrap_or_default();
        snapshot
    }

    /// Hashes the canonical serialization of every field except `checksum`.
    pub fn compute_checksum(&self) -> Result<String> {
        let body = SnapshotBody {
            schema_version: self.schema_version,
            saved_at: &self.saved_at,
            queue_items: &self.queue_items,
            deal_mirrors: &self.deal_mirrors,
        };
        Ok(checksum_bytes(&serde_json::to_vec(&body)?))
    }

    /// Checks the schema version and recorded checksum.
    pub fn verify(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(SnapshotError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: self.schema_version,
            });
        }
        let computed = self.compute_checksum()?;
        if computed != self.checksum {
            return Err(SnapshotError::ChecksumMismatch {
                recorded: self.checksum.clone(),
                computed,
            });
        }
        Ok(())
    }
}

/// Saves a snapshot atomically to disk.
///
/// Blocking; call from `spawn_blocking` when on the async runtime.
pub fn save_snapshot_atomic(path: &Path, snapshot: &StateSnapshot) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Loads and verifies a snapshot from disk.
///
/// # Errors
///
/// Returns an error if:
/// - The file doesn't exist or can't be read
/// - The JSON is malformed or truncated
/// - The schema version is incompatible
/// - The recorded checksum doesn't match the contents
pub fn load_snapshot(path: &Path) -> Result<StateSnapshot> {
    let bytes = std::fs::read(path)?;
    let snapshot: StateSnapshot = serde_json::from_slice(&bytes)?;
    snapshot.verify()?;
    Ok(snapshot)
}

/// Attempts to load a snapshot, returning None if the file doesn't exist.
///
/// Other errors (malformed JSON, checksum mismatch) are propagated.
pub fn try_load_snapshot(path: &Path) -> Result<Option<StateSnapshot>> {
    match load_snapshot(path) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
