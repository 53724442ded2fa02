//! The ledger store: in-memory index plus a JSON Lines file.
//!
//! Appends never block the caller. Each record is pushed into memory and
//! handed to a dedicated writer thread over a bounded channel; if the channel
//! is full the record stays queryable but is not made durable, and a warning
//! is logged.
//!
//! # Recovery
//!
//! On open the file is replayed line by line. Lines that fail to parse are
//! skipped. A final line without a trailing newline (a crash mid-append) is
//! truncated away.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::record::ProcessingHistoryRecord;
use crate::persistence::fsync::{fsync_file, write_atomic};

/// Default bound on records waiting to be written.
pub const DEFAULT_WRITE_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The writer thread has exited.
    #[error("ledger writer is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, LedgerError>;

enum WriteCommand {
    Append(ProcessingHistoryRecord),
    Rewrite(Vec<ProcessingHistoryRecord>, oneshot::Sender<Result<()>>),
    Flush(oneshot::Sender<Result<()>>),
}

/// Append-only processing history.
#[derive(Debug)]
pub struct HistoryLedger {
    records: RwLock<Vec<ProcessingHistoryRecord>>,
    writer: Option<mpsc::Sender<WriteCommand>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for WriteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteCommand::Append(_) => f.write_str("Append"),
            WriteCommand::Rewrite(records, _) => write!(f, "Rewrite({})", records.len()),
            WriteCommand::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl HistoryLedger {
    /// A ledger with no backing file.
    pub fn in_memory() -> Self {
        HistoryLedger {
            records: RwLock::new(Vec::new()),
            writer: None,
            path: None,
        }
    }

    /// Opens (or creates) the ledger file, replays it, and starts the writer
    /// thread. Must be called from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>, buffer: usize) -> Result<(Self, JoinHandle<()>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let records = replay(&path)?;
        info!(path = %path.display(), records = records.len(), "Opened history ledger");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let writer_path = path.clone();
        let handle = tokio::task::spawn_blocking(move || writer_loop(rx, file, writer_path));

        Ok((
            HistoryLedger {
                records: RwLock::new(records),
                writer: Some(tx),
                path: Some(path),
            },
            handle,
        ))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends a record. Never fails the caller; storage trouble is logged.
    pub async fn record(&self, record: ProcessingHistoryRecord) {
        debug!(
            deal = %record.deal_name,
            path = %record.document_path,
            action = %record.action,
            "Recording history"
        );
        self.records.write().await.push(record.clone());

        if let Some(writer) = &self.writer {
            match writer.try_send(WriteCommand::Append(record)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("History write buffer full; record kept in memory only");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("History writer closed; record kept in memory only");
                }
            }
        }
    }

    /// Returns up to `limit` records for a deal, most recent first.
    pub async fn query(&self, deal_name: &str, limit: usize) -> Vec<ProcessingHistoryRecord> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .iter()
            .filter(|r| r.deal_name == deal_name)
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps; reverse gives
        // newest first.
        matching.sort_by_key(|r| r.timestamp);
        matching.reverse();
        matching.truncate(limit);
        matching
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Deletes records older than `older_than` and rewrites the file.
    ///
    /// The rewrite is queued before the records lock is released, so every
    /// later append lands after it. Returns the number of records removed.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> usize {
        let (removed, reply) = {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|r| r.timestamp >= older_than);
            let removed = before - records.len();
            if removed == 0 {
                return 0;
            }
            info!(removed, remaining = records.len(), "Pruned history ledger");

            let reply = match &self.writer {
                Some(writer) => {
                    let (tx, rx) = oneshot::channel();
                    match writer.send(WriteCommand::Rewrite(records.clone(), tx)).await {
                        Ok(()) => Some(rx),
                        Err(_) => {
                            warn!(error = %LedgerError::Closed, "Failed to rewrite history file after prune");
                            None
                        }
                    }
                }
                None => None,
            };
            (removed, reply)
        };

        if let Some(rx) = reply
            && let Err(e) = rx.await.unwrap_or(Err(LedgerError::Closed))
        {
            warn!(error = %e, "Failed to rewrite history file after prune");
        }
        removed
    }

    /// Waits until every record handed to the writer has been written and
    /// synced.
    pub async fn flush(&self) -> Result<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        writer
            .send(WriteCommand::Flush(tx))
            .await
            .map_err(|_| LedgerError::Closed)?;
        rx.await.map_err(|_| LedgerError::Closed)?
    }
}

/// Writer thread body. Exits when every sender is dropped.
fn writer_loop(mut rx: mpsc::Receiver<WriteCommand>, mut file: File, path: PathBuf) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            WriteCommand::Append(record) => {
                if let Err(e) = append_line(&mut file, &record) {
                    warn!(error = %e, "Failed to append history record; dropped");
                }
            }
            WriteCommand::Flush(reply) => {
                let _ = reply.send(fsync_file(&file).map_err(LedgerError::from));
            }
            WriteCommand::Rewrite(records, reply) => {
                let result = match rewrite(&path, &records) {
                    Ok(reopened) => {
                        file = reopened;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
        }
    }
    if let Err(e) = fsync_file(&file) {
        warn!(error = %e, "Failed to sync history file on close");
    }
    debug!("History writer stopped");
}

fn append_line(file: &mut File, record: &ProcessingHistoryRecord) -> Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    file.write_all(&line)?;
    Ok(())
}

/// Atomically replaces the file with `records` and returns a fresh append
/// handle.
fn rewrite(path: &Path, records: &[ProcessingHistoryRecord]) -> Result<File> {
    let mut bytes = Vec::new();
    for record in records {
        serde_json::to_writer(&mut bytes, record)?;
        bytes.push(b'\n');
    }
    write_atomic(path, &bytes)?;
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Reads every valid record from the file, truncating a partial final line.
fn replay(path: &Path) -> Result<Vec<ProcessingHistoryRecord>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut pos: u64 = 0;
    let mut valid_end: u64 = 0;
    let mut skipped = 0usize;

    loop {
        let mut line = String::new();
        let bytes_read = match reader.read_line(&mut line) {
            Ok(n) => n,
            // Non-UTF-8 garbage: stop here and truncate.
            Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
            Err(e) => return Err(e.into()),
        };
        if bytes_read == 0 {
            break;
        }
        pos += bytes_read as u64;

        if !line.ends_with('\n') {
            // Partial write from a crash; everything before it is kept.
            break;
        }
        valid_end = pos;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ProcessingHistoryRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "Skipped unparseable history lines");
    }
    if valid_end < file_len {
        warn!(
            path = %path.display(),
            truncated_bytes = file_len - valid_end,
            "Truncating partial history line"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_end)?;
        fsync_file(&file)?;
    }

    Ok(records)
}
