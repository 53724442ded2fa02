//! Snapshot save and load for the manager's live state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use super::QueueManager;
use crate::error::{EngineError, Result};
use crate::persistence::{StateSnapshot, save_snapshot_atomic, try_load_snapshot};

/// What [`QueueManager::load_snapshot`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Restored { items: usize, mirrors: usize },
    /// No snapshot file (or no snapshot path configured); started empty.
    Missing,
    /// The file failed decoding or verification; started empty.
    Corrupt,
}

impl QueueManager {
    /// Writes the queue and every mirror to the snapshot path atomically.
    ///
    /// A manager with no snapshot path configured treats this as a no-op.
    #[instrument(skip(self))]
    pub async fn save_snapshot(&self) -> Result<()> {
        let Some(path) = self.config.snapshot_path.clone() else {
            debug!("No snapshot path configured; skipping save");
            return Ok(());
        };

        let queue_items = self.store.read().await.snapshot();
        let deal_mirrors = self.mirrors.snapshot().await;
        let (items, mirrors) = (queue_items.len(), deal_mirrors.len());

        let snapshot = StateSnapshot::new(queue_items, deal_mirrors)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        tokio::task::spawn_blocking(move || save_snapshot_atomic(&path, &snapshot))
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        debug!(items, mirrors, "Snapshot saved");
        Ok(())
    }

    /// Replaces live state with the snapshot on disk.
    ///
    /// Never fails: a missing or corrupt snapshot leaves the manager empty and
    /// is reported through the returned outcome and the log.
    #[instrument(skip(self))]
    pub async fn load_snapshot(&self) -> LoadOutcome {
        let Some(path) = self.config.snapshot_path.clone() else {
            self.reset().await;
            return LoadOutcome::Missing;
        };

        let shown_path = path.display().to_string();
        match read_snapshot(path).await {
            Ok(Some(snapshot)) => {
                let items = snapshot.queue_items.len();
                let mirrors = snapshot.deal_mirrors.len();
                self.store.write().await.restore(snapshot.queue_items);
                self.mirrors.restore(snapshot.deal_mirrors).await;
                info!(path = %shown_path, items, mirrors, saved_at = %snapshot.saved_at, "Restored snapshot");
                LoadOutcome::Restored { items, mirrors }
            }
            Ok(None) => {
                info!(path = %shown_path, "No snapshot found; starting empty");
                self.reset().await;
                LoadOutcome::Missing
            }
            Err(e) => {
                warn!(path = %shown_path, error = %e, "Snapshot unusable; starting empty");
                self.reset().await;
                LoadOutcome::Corrupt
            }
        }
    }

    async fn reset(&self) {
        self.store.write().await.restore(Vec::new());
        self.mirrors.restore(BTreeMap::new()).await;
    }
}

/// Reads the snapshot at `path` on the blocking pool.
///
/// Checksum and decoding failures are `CorruptSnapshot`; anything else that
/// stops the read is `Persistence`.
async fn read_snapshot(path: PathBuf) -> Result<Option<StateSnapshot>> {
    let loaded = tokio::task::spawn_blocking(move || try_load_snapshot(&path))
        .await
        .map_err(|e| EngineError::Persistence(e.to_string()))?;
    match loaded {
        Ok(snapshot) => Ok(snapshot),
        Err(e) if e.is_corruption() => Err(EngineError::CorruptSnapshot(e.to_string())),
        Err(e) => Err(EngineError::Persistence(e.to_string())),
    }
}
