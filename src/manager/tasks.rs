//! Starting and stopping the background tasks, and the periodic sweeps.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{QueueManager, to_chrono};
use crate::history::{HistoryAction, ProcessingHistoryRecord};
use crate::types::QueueItem;

/// Handles for a started manager.
pub(super) struct Running {
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// What one cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Terminal items folded into the ledger and removed from the queue.
    pub archived: usize,
    /// History records past retention.
    pub pruned: usize,
}

impl QueueManager {
    /// Spawns the dispatch workers and the periodic loops.
    ///
    /// Returns false if the manager is already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("Queue manager already running");
            return false;
        }

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        for worker in 0..self.config.concurrency {
            let manager = Arc::clone(self);
            tasks.push((
                "dispatch",
                tokio::spawn(manager.dispatch_worker(worker, shutdown.child_token())),
            ));
        }

        tasks.push((
            "timeout",
            self.spawn_periodic(
                "timeout",
                self.config.timeout_check_interval,
                shutdown.child_token(),
                |m| async move {
                    m.check_timeouts(Utc::now()).await;
                },
            ),
        ));
        tasks.push((
            "persistence",
            self.spawn_periodic(
                "persistence",
                self.config.persistence_interval,
                shutdown.child_token(),
                |m| async move {
                    if let Err(e) = m.save_snapshot().await {
                        warn!(error = %e, "Periodic snapshot failed; will retry next cycle");
                    }
                },
            ),
        ));
        tasks.push((
            "cleanup",
            self.spawn_periodic(
                "cleanup",
                self.config.cleanup_interval,
                shutdown.child_token(),
                |m| async move {
                    m.cleanup(Utc::now()).await;
                },
            ),
        ));

        info!(
            concurrency = self.config.concurrency,
            tasks = tasks.len(),
            "Queue manager started"
        );
        *running = Some(Running { shutdown, tasks });
        true
    }

    /// Stops admitting dispatches, waits for in-flight trigger calls, and
    /// writes a final snapshot.
    ///
    /// Returns false if the manager was not running.
    pub async fn stop(&self) -> bool {
        let Some(Running { shutdown, tasks }) = self.running.lock().await.take() else {
            debug!("Queue manager not running");
            return false;
        };

        info!("Stopping queue manager");
        shutdown.cancel();
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Background task ended abnormally");
            }
        }

        if let Err(e) = self.history.flush().await {
            warn!(error = %e, "Failed to flush history on shutdown");
        }
        match self.save_snapshot().await {
            Ok(()) => info!("Queue manager stopped"),
            Err(e) => error!(error = %e, "Final snapshot failed"),
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    fn spawn_periodic<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        shutdown: CancellationToken,
        tick: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<QueueManager>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so a fresh start
            // does not sweep before anything has happened.
            ticker.tick().await;
            debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => tick(Arc::clone(&manager)).await,
                }
            }
            debug!(task = name, "Periodic task stopped");
        })
    }

    /// Archives terminal items older than the retention window and prunes
    /// expired history.
    ///
    /// Each item is recorded in the ledger before it leaves the queue.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> CleanupReport {
        let cutoff = now - to_chrono(self.config.completed_retention);
        let expired: Vec<QueueItem> = {
            let store = self.store.read().await;
            store
                .iter()
                .filter(|item| {
                    item.status.is_terminal() && item.completed_at.unwrap_or(item.enqueued_at) < cutoff
                })
                .cloned()
                .collect()
        };

        for item in &expired {
            let mut record =
                ProcessingHistoryRecord::new(&item.deal_name, &item.document_path, HistoryAction::Archived)
                    .with_detail("item_id", item.id.as_str())
                    .with_detail("status", item.status.as_str())
                    .with_detail("retry_count", item.retry_count.to_string());
            if let Some(error) = &item.last_error {
                record = record.with_detail("error", error.clone());
            }
            self.history.record(record).await;
        }

        let archived = {
            let mut store = self.store.write().await;
            expired
                .iter()
                .filter(|item| store.remove_by_id(&item.id).is_some())
                .count()
        };

        let pruned = self
            .history
            .prune(now - to_chrono(self.config.history_retention))
            .await;

        if archived > 0 || pruned > 0 {
            info!(archived, pruned, "Cleanup sweep finished");
        }
        CleanupReport { archived, pruned }
    }
}
