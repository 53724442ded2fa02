//! Dispatch workers.
//!
//! Each worker drains the queue until it is empty, then parks until an
//! admission wakes it or the idle poll elapses (so due retries still get
//! promoted with no new admissions). Shutdown is only observed between
//! items: a trigger call that has started always runs to completion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::QueueManager;
use crate::error::EngineError;
use crate::sync::StateSynchronizer;
use crate::types::{ItemStatus, JobId, QueueItem};

impl QueueManager {
    pub(super) async fn dispatch_worker(self: Arc<Self>, worker: usize, shutdown: CancellationToken) {
        info!(worker, "Dispatch worker started");
        loop {
            while !shutdown.is_cancelled() {
                self.promote_due_retries(Utc::now()).await;
                let Some(item) = self.dequeue().await else {
                    break;
                };
                self.dispatch(worker, item).await;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.dispatch_idle_poll) => {}
            }
        }
        info!(worker, "Dispatch worker stopped");
    }

    /// Calls the trigger for an item already marked `Processing`.
    async fn dispatch(self: &Arc<Self>, worker: usize, item: QueueItem) {
        debug!(worker, item_id = %item.id, "Triggering workflow");
        match self.trigger.trigger(&item).await {
            Ok(job_id) => self.attach_job(&item, job_id).await,
            Err(e) => {
                warn!(worker, item_id = %item.id, error = %e, "Workflow trigger failed");
                self.fail_attempt(&item, EngineError::from(e)).await;
            }
        }
    }

    /// Records the job ID on the attempt it was issued for, then applies any
    /// callbacks that arrived for it first.
    pub(super) async fn attach_job(self: &Arc<Self>, item: &QueueItem, job_id: JobId) {
        let attempt = item.started_at;
        let attached = self
            .store
            .write()
            .await
            .modify(&item.id, |current| {
                if current.status == ItemStatus::Processing && current.started_at == attempt {
                    current.job_id = Some(job_id.clone());
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        let early = self.early_callbacks.lock().await.take(&job_id);

        if !attached {
            debug!(item_id = %item.id, job_id = %job_id, dropped = early.len(), "Item moved on before trigger returned");
            return;
        }
        debug!(item_id = %item.id, job_id = %job_id, "Workflow started");

        let synchronizer = StateSynchronizer::new(Arc::clone(self));
        for callback in early {
            info!(item_id = %item.id, job_id = %job_id, status = %callback.status, "Applying callback received before trigger returned");
            if let Err(e) = synchronizer
                .synchronize_workflow_state(&job_id, callback.status, callback.metadata)
                .await
            {
                warn!(item_id = %item.id, job_id = %job_id, error = %e, "Early callback could not be applied");
            }
        }
    }

    /// Returns every Retrying item whose backoff has elapsed to `Pending`.
    pub async fn promote_due_retries(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<_> = {
            let store = self.store.read().await;
            store
                .iter()
                .filter(|item| {
                    item.status == ItemStatus::Retrying && item.retry_at.is_none_or(|at| at <= now)
                })
                .map(|item| item.id.clone())
                .collect()
        };

        let mut promoted = 0;
        for id in due {
            match self
                .apply_change(&id, super::Change::Promote, Default::default(), now)
                .await
            {
                Ok(applied) if applied.changed => promoted += 1,
                Ok(_) => {}
                Err(e) => debug!(item_id = %id, error = %e, "Retry promotion skipped"),
            }
        }
        if promoted > 0 {
            debug!(promoted, "Promoted due retries");
        }
        promoted
    }

    /// Fails every Processing item that has outlived its timeout budget.
    ///
    /// Returns the number of items timed out.
    pub async fn check_timeouts(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<(QueueItem, chrono::Duration)> = {
            let store = self.store.read().await;
            store
                .iter()
                .filter(|item| item.status == ItemStatus::Processing)
                .filter_map(|item| {
                    let started = item.started_at?;
                    let budget = self.config.timeout_for(item.estimated_duration());
                    (now - started > budget).then(|| (item.clone(), budget))
                })
                .collect()
        };

        let mut timed_out = 0;
        for (item, budget) in expired {
            let error = EngineError::Timeout {
                id: item.id.clone(),
                budget_secs: budget.num_seconds(),
            };
            if self
                .fail_attempt(&item, error)
                .await
                .is_some_and(|applied| applied.changed)
            {
                timed_out += 1;
            }
        }
        if timed_out > 0 {
            warn!(timed_out, "Timed out processing items");
        }
        timed_out
    }
}
