//! Deal folder mirrors.
//!
//! Each deal has an in-memory model of its folder tree: every file's checksum,
//! size, modification time and processing state. Syncing walks the live folder
//! and classifies each file against the stored model.
//!
//! # Conflict Policy
//!
//! A file is conflicted when its on-disk checksum differs from the stored one
//! **and** its processing state is not terminal, i.e. it changed while the
//! engine still owned it. Conflicts are recorded, never resolved, by sync;
//! resolution is an explicit call.
//!
//! # Locking
//!
//! Every mirror sits behind its own `RwLock`. Sync and the state synchronizer
//! both take the per-deal lock, so syncs of unrelated deals never contend.
//! The filesystem walk happens before the lock is taken.

mod folder;
mod registry;
mod scan;

pub use folder::{
    Conflict, ConflictReason, DealFolderMirror, FileEntry, FileProcessingState, SyncReport,
    SyncStatus,
};
pub use registry::{MirrorRegistry, SyncError, validate_deal_name};
pub use scan::{ScannedFile, scan_folder};
