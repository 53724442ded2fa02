//! Filesystem walk for deal folders.

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::persistence::checksum::checksum_file;

/// A file observed on disk during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// `/`-separated path relative to the deal root.
    pub rel_path: String,
    pub checksum: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Returns true for entries the mirror never tracks: dotfiles (including
/// editor swap files and `.DS_Store`) and our own in-flight temp files.
fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(".tmp") || name.starts_with("~$")
}

/// Converts a path under `root` to the mirror's key format.
pub(crate) fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Normalises a deal-relative path to the mirror's key format: `/`-separated
/// with empty and `.` segments dropped.
pub(crate) fn normalize_key(rel_path: &str) -> String {
    rel_path
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Walks `root` and checksums every tracked file.
///
/// Blocking, proportional to folder size. Files that vanish or become
/// unreadable mid-walk are skipped with a warning rather than failing the
/// whole sync.
pub fn scan_folder(root: &Path) -> io::Result<Vec<ScannedFile>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("deal folder not found: {}", root.display()),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel_path) = relative_key(root, entry.path()) else {
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %rel_path, error = %e, "Skipping file without metadata");
                continue;
            }
        };
        let checksum = match checksum_file(entry.path()) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %rel_path, error = %e, "Skipping unreadable file");
                continue;
            }
        };
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        files.push(ScannedFile {
            rel_path,
            checksum,
            size: metadata.len(),
            modified_at,
        });
    }

    debug!(root = %root.display(), files = files.len(), "Scanned deal folder");
    Ok(files)
}
