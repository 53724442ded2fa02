//! Persistence layer for the queue engine.
//!
//! - **Checksums**: SHA-256 digests for deal files and snapshot bodies
//! - **Snapshots**: periodic, checksummed full-state captures for crash recovery
//! - **Atomic writes**: write-to-temp-then-rename with file and directory fsync
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   queue-state.json   # latest snapshot (queue items + deal mirrors)
//!   history.jsonl      # processing history ledger (see `history`)
//! ```
//!
//! # Recovery
//!
//! On startup the snapshot is loaded and verified. A missing file means a
//! fresh start; an unreadable, truncated or checksum-mismatched file is logged
//! and the engine starts empty rather than refusing to boot.

pub mod checksum;
pub mod fsync;
pub mod snapshot;

pub use checksum::{checksum_bytes, checksum_file};
pub use fsync::{fsync_dir, fsync_file, write_atomic};
pub use snapshot::{
    SCHEMA_VERSION, SnapshotError, StateSnapshot, load_snapshot, save_snapshot_atomic,
    try_load_snapshot,
};
