//! The outbound collaborator: starting a workflow for a queue item.
//!
//! The engine only needs a job ID back; the transport behind the trait is
//! up to the embedder. [`NoopTrigger`] is used when the binary runs without a
//! workflow service attached.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::types::{JobId, QueueItem};

#[derive(Debug, Error)]
pub enum TriggerError {
    /// The workflow service could not be reached or refused the request.
    #[error("workflow service unavailable: {0}")]
    Unavailable(String),

    /// The workflow service rejected this particular item.
    #[error("workflow rejected item: {0}")]
    Rejected(String),
}

/// Starts processing for a dispatched item.
///
/// Called outside every lock. Implementations may take as long as they need;
/// a slow call only occupies one dispatch slot. `Unavailable` is a transient
/// dispatch failure and goes through the item's retry policy; `Rejected`
/// fails the item without retrying.
///
/// The workflow service may call back with the returned job ID before this
/// call returns. Such callbacks are held and applied once the ID is known.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    async fn trigger(&self, item: &QueueItem) -> Result<JobId, TriggerError>;
}

/// Accepts every item and hands back a job ID derived from the item ID.
#[derive(Debug, Clone, Default)]
pub struct NoopTrigger;

#[async_trait]
impl WorkflowTrigger for NoopTrigger {
    async fn trigger(&self, item: &QueueItem) -> Result<JobId, TriggerError> {
        debug!(item_id = %item.id, deal = %item.deal_name, "No workflow service; accepting item");
        Ok(JobId::new(format!("noop-{}", item.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Metadata, Priority};

    #[tokio::test]
    async fn noop_trigger_returns_item_derived_job() {
        let item = QueueItem::new(
            "Acme",
            "a.pdf",
            "a.pdf",
            Priority::Normal,
            Metadata::new(),
            3,
            chrono::Duration::minutes(5),
        );
        let job = NoopTrigger.trigger(&item).await.unwrap();
        assert_eq!(job.as_str(), format!("noop-{}", item.id));
    }
}
