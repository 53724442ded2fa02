//! Query filters, sorting and pagination over queue items.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{ItemStatus, Priority, QueueItem};

/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    EnqueuedAt,
    Priority,
    Status,
    Deal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Criteria for [`crate::manager::QueueManager::query_queue`].
///
/// Every criterion is optional; an empty filter matches everything. The
/// time range applies to `enqueued_at` and is inclusive on both ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueFilter {
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    pub deal: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub sort: SortKey,
    pub order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// One page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPage {
    /// Matches before pagination.
    pub total: usize,
    pub offset: usize,
    pub items: Vec<QueueItem>,
}

impl QueueFilter {
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_deal(mut self, deal: impl Into<String>) -> Self {
        self.deal = Some(deal.into());
        self
    }

    pub fn with_range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn sorted_by(mut self, sort: SortKey, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.from, self.to)
            && from > to
        {
            return Err(EngineError::Validation(format!(
                "time range is inverted: from {from} is after to {to}"
            )));
        }
        if self.limit == Some(0) {
            return Err(EngineError::Validation("limit must be positive".to_string()));
        }
        if let Some(deal) = &self.deal
            && deal.trim().is_empty()
        {
            return Err(EngineError::Validation("deal filter is empty".to_string()));
        }
        Ok(())
    }

    pub fn matches(&self, item: &QueueItem) -> bool {
        self.status.is_none_or(|s| item.status == s)
            && self.priority.is_none_or(|p| item.priority == p)
            && self.deal.as_deref().is_none_or(|d| item.deal_name == d)
            && self.from.is_none_or(|from| item.enqueued_at >= from)
            && self.to.is_none_or(|to| item.enqueued_at <= to)
    }

    fn compare(&self, a: &QueueItem, b: &QueueItem) -> Ordering {
        let primary = match self.sort {
            SortKey::EnqueuedAt => a.enqueued_at.cmp(&b.enqueued_at),
            SortKey::Priority => a.priority.cmp(&b.priority),
            SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
            SortKey::Deal => a.deal_name.cmp(&b.deal_name),
        };
        let ordering = primary
            .then(a.enqueued_at.cmp(&b.enqueued_at))
            .then(a.sequence.cmp(&b.sequence));
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }

    /// Filters, sorts and paginates. Call [`QueueFilter::validate`] first.
    pub fn apply<'a>(&self, items: impl IntoIterator<Item = &'a QueueItem>) -> QueryPage {
        let mut matching: Vec<&QueueItem> = items.into_iter().filter(|i| self.matches(i)).collect();
        matching.sort_by(|a, b| self.compare(a, b));

        let total = matching.len();
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        let items = matching
            .into_iter()
            .skip(self.offset)
            .take(limit)
            .cloned()
            .collect();

        QueryPage {
            total,
            offset: self.offset,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;
    use chrono::Duration;

    fn item(deal: &str, path: &str, priority: Priority, minutes_ago: i64) -> QueueItem {
        let mut it = QueueItem::new(
            deal,
            path,
            path,
            priority,
            Metadata::new(),
            3,
            Duration::minutes(5),
        );
        it.enqueued_at = Utc::now() - Duration::minutes(minutes_ago);
        it
    }

    fn sample() -> Vec<QueueItem> {
        let mut done = item("Globex", "done.pdf", Priority::Normal, 30);
        done.status = ItemStatus::Completed;
        vec![
            item("Acme", "a.pdf", Priority::Low, 10),
            item("Acme", "b.pdf", Priority::High, 20),
            item("Globex", "c.pdf", Priority::Normal, 5),
            done,
        ]
    }

    fn paths(page: &QueryPage) -> Vec<&str> {
        page.items.iter().map(|i| i.document_path.as_str()).collect()
    }

    #[test]
    fn empty_filter_matches_all_oldest_first() {
        let items = sample();
        let page = QueueFilter::default().apply(&items);
        assert_eq!(page.total, 4);
        assert_eq!(paths(&page), vec!["done.pdf", "b.pdf", "a.pdf", "c.pdf"]);
    }

    #[test]
    fn filters_combine() {
        let items = sample();
        let page = QueueFilter::default()
            .with_deal("Acme")
            .with_priority(Priority::High)
            .apply(&items);
        assert_eq!(paths(&page), vec!["b.pdf"]);

        let page = QueueFilter::default()
            .with_status(ItemStatus::Completed)
            .apply(&items);
        assert_eq!(paths(&page), vec!["done.pdf"]);
    }

    #[test]
    fn time_range_is_inclusive() {
        let items = sample();
        let from = items[0].enqueued_at;
        let to = items[2].enqueued_at;
        let page = QueueFilter::default().with_range(Some(from), Some(to)).apply(&items);
        assert_eq!(paths(&page), vec!["a.pdf", "c.pdf"]);
    }

    #[test]
    fn inverted_range_is_a_validation_error() {
        let now = Utc::now();
        let filter = QueueFilter::default().with_range(Some(now), Some(now - Duration::hours(1)));
        assert!(matches!(filter.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn sort_by_priority_descending() {
        let items = sample();
        let page = QueueFilter::default()
            .sorted_by(SortKey::Priority, SortOrder::Desc)
            .apply(&items);
        assert_eq!(paths(&page), vec!["a.pdf", "c.pdf", "done.pdf", "b.pdf"]);
    }

    #[test]
    fn pagination_reports_total_before_slicing() {
        let items = sample();
        let page = QueueFilter::default().page(1, 2).apply(&items);
        assert_eq!(page.total, 4);
        assert_eq!(page.offset, 1);
        assert_eq!(paths(&page), vec!["b.pdf", "a.pdf"]);
    }

    #[test]
    fn oversized_limit_is_capped() {
        let items: Vec<QueueItem> = (0..1200)
            .map(|i| item("Acme", &format!("{i}.pdf"), Priority::Normal, 0))
            .collect();
        let page = QueueFilter::default().page(0, 5000).apply(&items);
        assert_eq!(page.total, 1200);
        assert_eq!(page.items.len(), MAX_PAGE_SIZE);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let filter = QueueFilter::default().page(0, 0);
        assert!(filter.validate().is_err());
    }

    #[test]
    fn filter_deserializes_from_query_fields() {
        let filter: QueueFilter = serde_json::from_value(serde_json::json!({
            "status": "pending",
            "priority": "high",
            "sort": "deal",
            "order": "desc",
            "limit": 10
        }))
        .unwrap();
        assert_eq!(filter.status, Some(ItemStatus::Pending));
        assert_eq!(filter.priority, Some(Priority::High));
        assert_eq!(filter.sort, SortKey::Deal);
        assert_eq!(filter.order, SortOrder::Desc);
        assert_eq!(filter.limit, Some(10));
    }
}
