//! Queue statistics, recomputed on demand from the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ItemStatus, Priority, QueueItem};

/// A point-in-time projection of the queue. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub by_status: BTreeMap<ItemStatus, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
    /// Mean enqueue→start time over items that have started.
    pub avg_wait_secs: Option<f64>,
    /// Mean start→complete time over completed items.
    pub avg_processing_secs: Option<f64>,
    /// Completions within the throughput window, scaled to one hour.
    pub throughput_per_hour: f64,
    pub computed_at: DateTime<Utc>,
}

impl QueueStats {
    /// Computes stats over `items`, counting completions inside `window`
    /// ending at `now`.
    pub fn compute<'a>(
        items: impl IntoIterator<Item = &'a QueueItem>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        let mut by_status: BTreeMap<ItemStatus, usize> =
            ItemStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut by_priority: BTreeMap<Priority, usize> =
            Priority::ALL.into_iter().map(|p| (p, 0)).collect();
        let mut total = 0;
        let mut wait = Mean::default();
        let mut processing = Mean::default();
        let mut completed_in_window = 0usize;
        let window_start = now - window;

        for item in items {
            total += 1;
            *by_status.entry(item.status).or_default() += 1;
            *by_priority.entry(item.priority).or_default() += 1;

            if let Some(w) = item.wait_time() {
                wait.add(w);
            }
            if item.status == ItemStatus::Completed {
                if let Some(p) = item.processing_time() {
                    processing.add(p);
                }
                if item.completed_at.is_some_and(|at| at >= window_start) {
                    completed_in_window += 1;
                }
            }
        }

        let window_hours = window.num_milliseconds() as f64 / 3_600_000.0;
        let throughput_per_hour = if window_hours > 0.0 {
            completed_in_window as f64 / window_hours
        } else {
            0.0
        };

        QueueStats {
            total,
            by_status,
            by_priority,
            avg_wait_secs: wait.value(),
            avg_processing_secs: processing.value(),
            throughput_per_hour,
            computed_at: now,
        }
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Default)]
struct Mean {
    sum_ms: i64,
    n: u32,
}

impl Mean {
    fn add(&mut self, d: Duration) {
        self.sum_ms += d.num_milliseconds();
        self.n += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum_ms as f64 / 1000.0 / f64::from(self.n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;

    fn item(priority: Priority) -> QueueItem {
        QueueItem::new(
            "Acme",
            "a.pdf",
            "a.pdf",
            priority,
            Metadata::new(),
            3,
            Duration::minutes(5),
        )
    }

    #[test]
    fn empty_queue_has_zero_counts_and_no_averages() {
        let stats = QueueStats::compute(std::iter::empty(), Utc::now(), Duration::hours(1));
        assert_eq!(stats.total, 0);
        assert_eq!(stats.count(ItemStatus::Pending), 0);
        assert_eq!(stats.by_priority.len(), 3);
        assert_eq!(stats.avg_wait_secs, None);
        assert_eq!(stats.throughput_per_hour, 0.0);
    }

    #[test]
    fn averages_and_throughput() {
        let now = Utc::now();

        let mut done = item(Priority::High);
        done.status = ItemStatus::Completed;
        done.enqueued_at = now - Duration::minutes(30);
        done.started_at = Some(now - Duration::minutes(20));
        done.completed_at = Some(now - Duration::minutes(10));

        let mut old = item(Priority::Normal);
        old.status = ItemStatus::Completed;
        old.enqueued_at = now - Duration::hours(5);
        old.started_at = Some(now - Duration::hours(5) + Duration::minutes(10));
        old.completed_at = Some(now - Duration::hours(4));

        let mut running = item(Priority::Normal);
        running.status = ItemStatus::Processing;
        running.enqueued_at = now - Duration::minutes(3);
        running.started_at = Some(now - Duration::minutes(2));

        let pending = item(Priority::Low);

        let items = [done, old, running, pending];
        let stats = QueueStats::compute(&items, now, Duration::hours(1));

        assert_eq!(stats.total, 4);
        assert_eq!(stats.count(ItemStatus::Completed), 2);
        assert_eq!(stats.count(ItemStatus::Processing), 1);
        assert_eq!(stats.count(ItemStatus::Pending), 1);
        assert_eq!(stats.by_priority[&Priority::Normal], 2);
        // (600 + 600 + 60) / 3
        assert_eq!(stats.avg_wait_secs, Some(420.0));
        // (600 + 3000) / 2
        assert_eq!(stats.avg_processing_secs, Some(1800.0));
        assert_eq!(stats.throughput_per_hour, 1.0);
    }

    #[test]
    fn throughput_scales_to_hourly_rate() {
        let now = Utc::now();
        let mut done = item(Priority::Normal);
        done.status = ItemStatus::Completed;
        done.started_at = Some(now - Duration::minutes(2));
        done.completed_at = Some(now - Duration::minutes(1));

        let stats = QueueStats::compute([&done], now, Duration::minutes(30));
        assert_eq!(stats.throughput_per_hour, 2.0);
    }
}
