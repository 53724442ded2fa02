//! The per-deal mirror model and its sync classification.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scan::ScannedFile;

/// Where a file is in the processing pipeline, as far as the mirror knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileProcessingState {
    /// Not owned by any job.
    #[default]
    Idle,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl FileProcessingState {
    /// Terminal states mean the engine no longer owns the file.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileProcessingState::Idle | FileProcessingState::Completed | FileProcessingState::Failed
        )
    }
}

/// One file in a deal folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Content checksum as of `last_synced_at`.
    pub checksum: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub processing_state: FileProcessingState,
    pub last_synced_at: DateTime<Utc>,
}

impl FileEntry {
    fn from_scan(file: &ScannedFile, now: DateTime<Utc>) -> Self {
        FileEntry {
            checksum: file.checksum.clone(),
            size: file.size,
            modified_at: file.modified_at,
            processing_state: FileProcessingState::Idle,
            last_synced_at: now,
        }
    }

    fn accept(&mut self, file: &ScannedFile, now: DateTime<Utc>) {
        self.checksum = file.checksum.clone();
        self.size = file.size;
        self.modified_at = file.modified_at;
        self.last_synced_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InSync,
    /// A job referenced a file the mirror has never seen; the next sync
    /// brings it back in line.
    Stale,
    Conflicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    ModifiedWhileProcessing,
    DeletedWhileProcessing,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::ModifiedWhileProcessing => f.write_str("modified while processing"),
            ConflictReason::DeletedWhileProcessing => f.write_str("deleted while processing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub reason: ConflictReason,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
}

/// Per-file classification produced by a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub unchanged: Vec<String>,
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub conflicted: Vec<String>,
    pub deleted: Vec<String>,
}

impl SyncReport {
    pub fn changed(&self) -> usize {
        self.new.len() + self.modified.len() + self.conflicted.len() + self.deleted.len()
    }
}

/// The engine's cached model of one deal folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealFolderMirror {
    pub deal_name: String,
    pub root_path: PathBuf,
    /// Keyed by `/`-separated path relative to `root_path`.
    pub files: BTreeMap<String, FileEntry>,
    pub sync_status: SyncStatus,
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl DealFolderMirror {
    pub fn new(deal_name: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        DealFolderMirror {
            deal_name: deal_name.into(),
            root_path: root_path.into(),
            files: BTreeMap::new(),
            sync_status: SyncStatus::InSync,
            conflicts: Vec::new(),
            last_synced_at: None,
        }
    }

    /// Classifies a fresh scan against the stored model and updates it.
    ///
    /// Conflicted files keep their stored checksum so the mismatch persists
    /// until resolved.
    pub fn apply_scan(&mut self, scanned: &[ScannedFile], now: DateTime<Utc>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut seen = HashSet::with_capacity(scanned.len());

        for file in scanned {
            seen.insert(file.rel_path.as_str());
            match self.files.get_mut(&file.rel_path) {
                None => {
                    self.files
                        .insert(file.rel_path.clone(), FileEntry::from_scan(file, now));
                    report.new.push(file.rel_path.clone());
                }
                Some(entry) if entry.checksum == file.checksum => {
                    entry.accept(file, now);
                    report.unchanged.push(file.rel_path.clone());
                }
                Some(entry) if entry.processing_state.is_terminal() => {
                    entry.accept(file, now);
                    report.modified.push(file.rel_path.clone());
                }
                Some(_) => {
                    self.record_conflict(&file.rel_path, ConflictReason::ModifiedWhileProcessing, now);
                    report.conflicted.push(file.rel_path.clone());
                }
            }
        }

        let missing: Vec<(String, bool)> = self
            .files
            .iter()
            .filter(|(path, _)| !seen.contains(path.as_str()))
            .map(|(path, entry)| (path.clone(), entry.processing_state.is_terminal()))
            .collect();

        for (path, terminal) in missing {
            if terminal {
                self.files.remove(&path);
                report.deleted.push(path);
            } else {
                self.record_conflict(&path, ConflictReason::DeletedWhileProcessing, now);
                report.conflicted.push(path);
            }
        }

        self.last_synced_at = Some(now);
        self.refresh_status();
        report
    }

    /// Updates a file's processing state.
    ///
    /// Returns false if the mirror has no entry for `path`; the mirror is then
    /// marked stale since a job references a file it has never seen.
    pub fn set_processing_state(&mut self, path: &str, state: FileProcessingState) -> bool {
        match self.files.get_mut(path) {
            Some(entry) => {
                entry.processing_state = state;
                true
            }
            None => {
                if self.sync_status == SyncStatus::InSync {
                    self.sync_status = SyncStatus::Stale;
                }
                false
            }
        }
    }

    /// Marks all unresolved conflicts for `path` resolved and accepts the
    /// file's current content (`None` if it no longer exists).
    ///
    /// Returns the number of conflicts resolved.
    pub fn resolve_conflicts(
        &mut self,
        path: &str,
        current: Option<&ScannedFile>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut resolved = 0;
        for conflict in self.conflicts.iter_mut() {
            if conflict.path == path && !conflict.resolved {
                conflict.resolved = true;
                resolved += 1;
            }
        }

        if resolved > 0 {
            match current {
                Some(file) => {
                    let entry = self
                        .files
                        .entry(path.to_string())
                        .or_insert_with(|| FileEntry::from_scan(file, now));
                    entry.accept(file, now);
                }
                None => {
                    self.files.remove(path);
                }
            }
            self.refresh_status();
        }
        resolved
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.resolved)
    }

    fn record_conflict(&mut self, path: &str, reason: ConflictReason, now: DateTime<Utc>) {
        let already_open = self
            .unresolved_conflicts()
            .any(|c| c.path == path && c.reason == reason);
        if !already_open {
            self.conflicts.push(Conflict {
                path: path.to_string(),
                reason,
                detected_at: now,
                resolved: false,
            });
        }
    }

    fn refresh_status(&mut self) {
        self.sync_status = if self.unresolved_conflicts().next().is_some() {
            SyncStatus::Conflicted
        } else {
            SyncStatus::InSync
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scanned(path: &str, checksum: &str) -> ScannedFile {
        ScannedFile {
            rel_path: path.to_string(),
            checksum: checksum.to_string(),
            size: 10,
            modified_at: Utc::now(),
        }
    }

    fn mirror_with(files: &[(&str, &str)]) -> DealFolderMirror {
        let mut mirror = DealFolderMirror::new("Acme", "/deals/Acme");
        let scan: Vec<_> = files.iter().map(|(p, c)| scanned(p, c)).collect();
        mirror.apply_scan(&scan, Utc::now());
        mirror
    }

    #[test]
    fn first_scan_reports_everything_new() {
        let mut mirror = DealFolderMirror::new("Acme", "/deals/Acme");
        let report = mirror.apply_scan(&[scanned("a.pdf", "x"), scanned("b.txt", "y")], Utc::now());

        assert_eq!(report.new, vec!["a.pdf", "b.txt"]);
        assert_eq!(mirror.files.len(), 2);
        assert_eq!(mirror.sync_status, SyncStatus::InSync);
        assert!(mirror.last_synced_at.is_some());
    }

    #[test]
    fn unchanged_file_updates_last_synced() {
        let mut mirror = mirror_with(&[("a.pdf", "x")]);
        let later = Utc::now() + Duration::minutes(5);
        let report = mirror.apply_scan(&[scanned("a.pdf", "x")], later);

        assert_eq!(report.unchanged, vec!["a.pdf"]);
        assert_eq!(mirror.files["a.pdf"].last_synced_at, later);
    }

    #[test]
    fn modified_idle_file_is_accepted() {
        let mut mirror = mirror_with(&[("a.pdf", "x")]);
        let report = mirror.apply_scan(&[scanned("a.pdf", "y")], Utc::now());

        assert_eq!(report.modified, vec!["a.pdf"]);
        assert_eq!(mirror.files["a.pdf"].checksum, "y");
        assert_eq!(mirror.sync_status, SyncStatus::InSync);
    }

    #[test]
    fn modified_file_with_live_job_is_conflicted() {
        let mut mirror = mirror_with(&[("report.xlsx", "X")]);
        assert!(mirror.set_processing_state("report.xlsx", FileProcessingState::Processing));

        let report = mirror.apply_scan(&[scanned("report.xlsx", "Y")], Utc::now());

        assert_eq!(report.conflicted, vec!["report.xlsx"]);
        assert_eq!(mirror.sync_status, SyncStatus::Conflicted);
        assert_eq!(mirror.conflicts.len(), 1);
        assert_eq!(mirror.conflicts[0].path, "report.xlsx");
        assert_eq!(mirror.conflicts[0].reason, ConflictReason::ModifiedWhileProcessing);
        // Stored checksum still reflects the last accepted content.
        assert_eq!(mirror.files["report.xlsx"].checksum, "X");
    }

    #[test]
    fn repeated_sync_does_not_duplicate_conflict() {
        let mut mirror = mirror_with(&[("report.xlsx", "X")]);
        mirror.set_processing_state("report.xlsx", FileProcessingState::Queued);

        mirror.apply_scan(&[scanned("report.xlsx", "Y")], Utc::now());
        mirror.apply_scan(&[scanned("report.xlsx", "Y")], Utc::now());

        assert_eq!(mirror.conflicts.len(), 1);
    }

    #[test]
    fn deleted_idle_file_is_dropped() {
        let mut mirror = mirror_with(&[("a.pdf", "x"), ("b.pdf", "y")]);
        let report = mirror.apply_scan(&[scanned("a.pdf", "x")], Utc::now());

        assert_eq!(report.deleted, vec!["b.pdf"]);
        assert!(!mirror.files.contains_key("b.pdf"));
    }

    #[test]
    fn deleted_file_with_live_job_is_conflicted() {
        let mut mirror = mirror_with(&[("a.pdf", "x")]);
        mirror.set_processing_state("a.pdf", FileProcessingState::Processing);

        let report = mirror.apply_scan(&[], Utc::now());

        assert_eq!(report.conflicted, vec!["a.pdf"]);
        assert_eq!(mirror.conflicts[0].reason, ConflictReason::DeletedWhileProcessing);
        assert!(mirror.files.contains_key("a.pdf"));
    }

    #[test]
    fn resolving_accepts_current_content() {
        let mut mirror = mirror_with(&[("report.xlsx", "X")]);
        mirror.set_processing_state("report.xlsx", FileProcessingState::Processing);
        mirror.apply_scan(&[scanned("report.xlsx", "Y")], Utc::now());

        let resolved =
            mirror.resolve_conflicts("report.xlsx", Some(&scanned("report.xlsx", "Y")), Utc::now());

        assert_eq!(resolved, 1);
        assert!(mirror.conflicts[0].resolved);
        assert_eq!(mirror.files["report.xlsx"].checksum, "Y");
        assert_eq!(mirror.sync_status, SyncStatus::InSync);
    }

    #[test]
    fn resolving_unknown_path_is_noop() {
        let mut mirror = mirror_with(&[("a.pdf", "x")]);
        assert_eq!(mirror.resolve_conflicts("nope.pdf", None, Utc::now()), 0);
        assert!(mirror.files.contains_key("a.pdf"));
    }

    #[test]
    fn unknown_path_marks_stale() {
        let mut mirror = mirror_with(&[("a.pdf", "x")]);
        assert!(!mirror.set_processing_state("ghost.pdf", FileProcessingState::Queued));
        assert_eq!(mirror.sync_status, SyncStatus::Stale);

        // The next sync brings it back in line.
        mirror.apply_scan(&[scanned("a.pdf", "x")], Utc::now());
        assert_eq!(mirror.sync_status, SyncStatus::InSync);
    }

    #[test]
    fn mirror_serde_roundtrip() {
        let mut mirror = mirror_with(&[("a.pdf", "x")]);
        mirror.set_processing_state("a.pdf", FileProcessingState::Processing);
        mirror.apply_scan(&[scanned("a.pdf", "y")], Utc::now());

        let json = serde_json::to_string(&mirror).unwrap();
        let parsed: DealFolderMirror = serde_json::from_str(&json).unwrap();
        assert_eq!(mirror, parsed);
    }
}
