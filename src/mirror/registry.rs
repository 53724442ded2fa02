//! Owned set of deal mirrors, one lock per deal.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::folder::{DealFolderMirror, FileProcessingState, SyncReport};
use super::scan::{ScannedFile, normalize_key, relative_key, scan_folder};

/// Errors that can occur while syncing a deal mirror.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The deal name is empty or would escape the deals root.
    #[error("invalid deal name: {0:?}")]
    InvalidDealName(String),

    /// No folder exists for the deal.
    #[error("deal folder not found: {}", .0.display())]
    FolderMissing(PathBuf),

    /// No mirror exists for the deal (it has never been synced).
    #[error("no mirror for deal: {0}")]
    UnknownDeal(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The blocking walk task panicked or was cancelled.
    #[error("scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for mirror operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Rejects deal names that are not a single, plain path component.
pub fn validate_deal_name(deal: &str) -> Result<()> {
    let invalid = deal.is_empty()
        || deal == "."
        || deal == ".."
        || deal.contains('/')
        || deal.contains('\\')
        || deal.contains('\0');
    if invalid {
        Err(SyncError::InvalidDealName(deal.to_string()))
    } else {
        Ok(())
    }
}

/// All deal mirrors, each behind its own lock.
///
/// The outer map lock is held only long enough to look up or insert a
/// mirror's handle; all reads and writes of a mirror go through its own lock.
#[derive(Debug)]
pub struct MirrorRegistry {
    deals_root: PathBuf,
    mirrors: RwLock<HashMap<String, Arc<RwLock<DealFolderMirror>>>>,
}

impl MirrorRegistry {
    pub fn new(deals_root: impl Into<PathBuf>) -> Self {
        MirrorRegistry {
            deals_root: deals_root.into(),
            mirrors: RwLock::new(HashMap::new()),
        }
    }

    pub fn deals_root(&self) -> &Path {
        &self.deals_root
    }

    /// Returns the folder for a deal.
    pub fn root_for(&self, deal: &str) -> PathBuf {
        self.deals_root.join(deal)
    }

    /// Converts a document path (absolute under the deal folder, or
    /// deal-relative) to a mirror key. An absolute path outside the deal
    /// folder comes back unchanged.
    pub fn document_key(&self, deal: &str, document_path: &str) -> String {
        let path = Path::new(document_path);
        if path.is_absolute() {
            return relative_key(&self.root_for(deal), path)
                .unwrap_or_else(|| document_path.to_string());
        }
        normalize_key(document_path)
    }

    async fn handle(&self, deal: &str) -> Option<Arc<RwLock<DealFolderMirror>>> {
        self.mirrors.read().await.get(deal).cloned()
    }

    async fn handle_or_create(&self, deal: &str) -> Arc<RwLock<DealFolderMirror>> {
        if let Some(handle) = self.handle(deal).await {
            return handle;
        }
        let mut mirrors = self.mirrors.write().await;
        mirrors
            .entry(deal.to_string())
            .or_insert_with(|| {
                debug!(deal = %deal, "Creating deal mirror");
                Arc::new(RwLock::new(DealFolderMirror::new(deal, self.root_for(deal))))
            })
            .clone()
    }

    /// Walks the deal folder and reconciles the mirror against it.
    ///
    /// The walk runs on the blocking pool with no lock held; only the
    /// classification step takes the deal's write lock.
    #[instrument(skip(self))]
    pub async fn sync(&self, deal: &str) -> Result<(DealFolderMirror, SyncReport)> {
        validate_deal_name(deal)?;
        let root = self.root_for(deal);

        let scan_root = root.clone();
        let scanned = match tokio::task::spawn_blocking(move || scan_folder(&scan_root)).await? {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::FolderMissing(root));
            }
            Err(e) => return Err(e.into()),
        };

        let handle = self.handle_or_create(deal).await;
        let mut mirror = handle.write().await;
        let report = mirror.apply_scan(&scanned, Utc::now());

        if report.conflicted.is_empty() {
            info!(
                deal = %deal,
                files = mirror.files.len(),
                changed = report.changed(),
                "Deal mirror synced"
            );
        } else {
            warn!(
                deal = %deal,
                conflicts = ?report.conflicted,
                "Deal mirror synced with conflicts"
            );
        }

        Ok((mirror.clone(), report))
    }

    /// Returns a copy of the deal's mirror without touching the filesystem.
    pub async fn get(&self, deal: &str) -> Option<DealFolderMirror> {
        let handle = self.handle(deal).await?;
        let mirror = handle.read().await;
        Some(mirror.clone())
    }

    /// Records a file's processing state. A deal that has never been synced
    /// has no mirror, in which case this is a no-op returning false.
    pub async fn mark_file_processing_state(
        &self,
        deal: &str,
        document_path: &str,
        state: FileProcessingState,
    ) -> bool {
        let Some(handle) = self.handle(deal).await else {
            debug!(deal = %deal, "No mirror for deal; skipping processing state update");
            return false;
        };
        let key = self.document_key(deal, document_path);
        let mut mirror = handle.write().await;
        let known = mirror.set_processing_state(&key, state);
        if !known {
            debug!(deal = %deal, path = %key, "Processing state for untracked file; mirror is stale");
        }
        known
    }

    /// Resolves conflicts on `path` by accepting whatever is on disk now.
    ///
    /// Returns the number of conflicts resolved.
    #[instrument(skip(self))]
    pub async fn resolve_conflict(&self, deal: &str, path: &str) -> Result<usize> {
        validate_deal_name(deal)?;
        let handle = self
            .handle(deal)
            .await
            .ok_or_else(|| SyncError::UnknownDeal(deal.to_string()))?;
        let key = self.document_key(deal, path);
        let full_path = self.root_for(deal).join(&key);

        let current = tokio::task::spawn_blocking(move || scan_one(&full_path, key)).await??;

        let key = self.document_key(deal, path);
        let mut mirror = handle.write().await;
        let resolved = mirror.resolve_conflicts(&key, current.as_ref(), Utc::now());
        info!(deal = %deal, path = %key, resolved, "Resolved mirror conflicts");
        Ok(resolved)
    }

    /// Copies every mirror, keyed by deal name.
    pub async fn snapshot(&self) -> BTreeMap<String, DealFolderMirror> {
        let handles: Vec<_> = self
            .mirrors
            .read()
            .await
            .iter()
            .map(|(deal, handle)| (deal.clone(), handle.clone()))
            .collect();

        let mut out = BTreeMap::new();
        for (deal, handle) in handles {
            out.insert(deal, handle.read().await.clone());
        }
        out
    }

    /// Replaces all mirrors with restored copies.
    pub async fn restore(&self, restored: BTreeMap<String, DealFolderMirror>) {
        let mut mirrors = self.mirrors.write().await;
        mirrors.clear();
        for (deal, mirror) in restored {
            mirrors.insert(deal, Arc::new(RwLock::new(mirror)));
        }
    }
}

/// Checksums a single file, returning `None` if it does not exist.
fn scan_one(path: &Path, rel_path: String) -> io::Result<Option<ScannedFile>> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let checksum = crate::persistence::checksum::checksum_file(path)?;
    let modified_at = metadata
        .modified()
        .map(chrono::DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(Some(ScannedFile {
        rel_path,
        checksum,
        size: metadata.len(),
        modified_at,
    }))
}
