//! Core domain types for the document processing queue.
//!
//! This module contains the identifiers and queue item types used throughout
//! the engine, designed to encode the item lifecycle via the type system.

pub mod ids;
pub mod item;

// Re-export commonly used types at the module level
pub use ids::{ItemId, JobId};
pub use item::{ItemStatus, Metadata, Priority, QueueItem};
