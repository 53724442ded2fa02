//! Deal Queue - document processing queue and deal-folder state engine.
//!
//! Documents that are ready for downstream processing are admitted into a
//! priority queue, dispatched to an external workflow service, and tracked
//! through callbacks until they complete or fail. Alongside the queue the
//! engine keeps a checksummed mirror of every deal folder and an append-only
//! processing history.

pub mod config;
pub mod error;
pub mod history;
pub mod manager;
pub mod mirror;
pub mod persistence;
pub mod queue;
pub mod server;
pub mod sync;
pub mod trigger;
pub mod types;

#[cfg(test)]
pub mod test_utils;
