//! The in-memory queue: items plus the indices that keep scheduling cheap.
//!
//! Three indices sit beside the item map:
//!
//! - `ready`: Pending items ordered by (priority, enqueued_at, sequence),
//!   so the head is the next item to dispatch.
//! - `active`: (deal, document) → item for every non-terminal item. This is
//!   what makes the duplicate-admission check O(1).
//! - `jobs`: external job ID → item, for correlating workflow callbacks.
//!   Earlier attempts' job IDs are kept on the item (`superseded_jobs`) and
//!   stay mapped until the item leaves the store, so a late callback from a
//!   superseded attempt is recognised as stale, across restarts too.
//!
//! The store does no locking of its own; the manager wraps it in a single
//! `RwLock` and never holds that lock across I/O.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::types::{ItemId, ItemStatus, JobId, Priority, QueueItem};

/// Ordering key for Pending items. Field order is the dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Priority,
    enqueued_at: DateTime<Utc>,
    sequence: u64,
    id: ItemId,
}

impl ReadyKey {
    fn of(item: &QueueItem) -> Self {
        ReadyKey {
            priority: item.priority,
            enqueued_at: item.enqueued_at,
            sequence: item.sequence,
            id: item.id.clone(),
        }
    }
}

type ActiveKey = (String, String);

#[derive(Debug, Default)]
pub struct QueueStore {
    items: HashMap<ItemId, QueueItem>,
    ready: BTreeSet<ReadyKey>,
    active: HashMap<ActiveKey, ItemId>,
    jobs: HashMap<JobId, ItemId>,
    next_sequence: u64,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Inserts a new item, assigning its admission sequence.
    ///
    /// Fails with `DuplicateActiveJob` if the item is non-terminal and another
    /// non-terminal item already holds its (deal, document) key.
    pub fn insert(&mut self, mut item: QueueItem) -> Result<&QueueItem> {
        if item.is_active()
            && let Some(existing) = self.active.get(&item.key())
        {
            return Err(EngineError::DuplicateActiveJob {
                deal: item.deal_name,
                path: item.document_path,
                existing: existing.clone(),
            });
        }
        item.sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = item.id.clone();
        self.index(&item);
        Ok(self.items.entry(id).or_insert(item))
    }

    pub fn get(&self, id: &ItemId) -> Option<&QueueItem> {
        self.items.get(id)
    }

    /// The Pending item that would be dispatched next.
    pub fn peek_next(&self) -> Option<&QueueItem> {
        self.ready.first().and_then(|key| self.items.get(&key.id))
    }

    /// Takes the head of the ready set and marks it `Processing`.
    ///
    /// The item stays in the store (and in the active index) so duplicate
    /// detection keeps covering it while the trigger call is in flight.
    pub fn dispatch_next(&mut self, now: DateTime<Utc>) -> Option<QueueItem> {
        let id = self.ready.first()?.id.clone();
        self.modify(&id, |item| {
            item.status = ItemStatus::Processing;
            item.started_at = Some(now);
            item.completed_at = None;
            item.job_id = None;
            item.clone()
        })
    }

    pub fn find_active_by_key(&self, deal_name: &str, document_path: &str) -> Option<&QueueItem> {
        self.active
            .get(&(deal_name.to_string(), document_path.to_string()))
            .and_then(|id| self.items.get(id))
    }

    /// Finds the item a job ID was issued for, current attempt or not.
    pub fn find_by_job(&self, job_id: &JobId) -> Option<&QueueItem> {
        self.jobs.get(job_id).and_then(|id| self.items.get(id))
    }

    /// Applies `f` to the item and rebuilds its index entries.
    ///
    /// A job ID that `f` replaces or clears moves to `superseded_jobs`.
    /// Returns `None` if the item does not exist.
    pub fn modify<R>(&mut self, id: &ItemId, f: impl FnOnce(&mut QueueItem) -> R) -> Option<R> {
        let mut item = self.items.remove(id)?;
        self.unindex(&item);
        let previous_job = item.job_id.clone();
        let result = f(&mut item);
        if let Some(previous) = previous_job
            && item.job_id.as_ref() != Some(&previous)
            && !item.superseded_jobs.contains(&previous)
        {
            item.superseded_jobs.push(previous);
        }
        if item.is_active()
            && let Some(holder) = self.active.get(&item.key())
            && holder != &item.id
        {
            // A status rewind onto a key another item now holds. Keep the
            // existing holder authoritative.
            warn!(item_id = %item.id, holder = %holder, "Active key already held");
        }
        self.index(&item);
        self.items.insert(item.id.clone(), item);
        Some(result)
    }

    pub fn remove_by_id(&mut self, id: &ItemId) -> Option<QueueItem> {
        let item = self.items.remove(id)?;
        self.unindex(&item);
        for job_id in item.job_id.iter().chain(&item.superseded_jobs) {
            if self.jobs.get(job_id) == Some(id) {
                self.jobs.remove(job_id);
            }
        }
        Some(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.values()
    }

    /// All items in admission order.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self.items.values().cloned().collect();
        items.sort_by_key(|item| item.sequence);
        items
    }

    /// Replaces the store's contents, rebuilding every index.
    ///
    /// Sequences are kept as persisted. A second non-terminal item for an
    /// already-held key is dropped with a warning.
    pub fn restore(&mut self, items: Vec<QueueItem>) {
        *self = QueueStore::new();
        for item in items {
            if item.is_active()
                && let Some(existing) = self.active.get(&item.key())
            {
                warn!(
                    item_id = %item.id,
                    existing = %existing,
                    deal = %item.deal_name,
                    path = %item.document_path,
                    "Dropping duplicate active item from restored state"
                );
                continue;
            }
            self.next_sequence = self.next_sequence.max(item.sequence.saturating_add(1));
            self.index(&item);
            self.items.insert(item.id.clone(), item);
        }
    }

    fn index(&mut self, item: &QueueItem) {
        if item.status == ItemStatus::Pending {
            self.ready.insert(ReadyKey::of(item));
        }
        if item.is_active() {
            self.active
                .entry(item.key())
                .or_insert_with(|| item.id.clone());
        }
        for job_id in item.job_id.iter().chain(&item.superseded_jobs) {
            self.jobs
                .entry(job_id.clone())
                .or_insert_with(|| item.id.clone());
        }
    }

    fn unindex(&mut self, item: &QueueItem) {
        self.ready.remove(&ReadyKey::of(item));
        let key = item.key();
        if self.active.get(&key) == Some(&item.id) {
            self.active.remove(&key);
        }
    }
}
