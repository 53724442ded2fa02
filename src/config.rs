//! Process configuration for the engine binary.
//!
//! Everything is read from `DEAL_QUEUE_*` environment variables. Absent or
//! unparseable values fall back to defaults:
//!
//! - `DEAL_QUEUE_STATE_DIR`: snapshot and history ledger directory (`./state`)
//! - `DEAL_QUEUE_DEALS_ROOT`: directory holding one folder per deal (`./deals`)
//! - `DEAL_QUEUE_CONCURRENCY`: dispatch workers (3)
//! - `DEAL_QUEUE_MAX_RETRIES`: retries after the first failure (3)
//! - `DEAL_QUEUE_BIND`: HTTP listen address (`0.0.0.0:3000`)
//! - `DEAL_QUEUE_CALLBACK_SECRET`: HMAC secret for workflow callbacks (unset
//!   disables verification)

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::manager::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, ManagerConfig};

const DEFAULT_STATE_DIR: &str = "state";
const DEFAULT_DEALS_ROOT: &str = "deals";
const DEFAULT_BIND: ([u8; 4], u16) = ([0, 0, 0, 0], 3000);

const SNAPSHOT_FILE: &str = "queue-state.json";
const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub state_dir: PathBuf,
    pub deals_root: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub bind: SocketAddr,
    /// Shared secret for `X-Signature-256` on workflow callbacks.
    pub callback_secret: Option<Vec<u8>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        EngineConfig {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            deals_root: PathBuf::from(DEFAULT_DEALS_ROOT),
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            bind: SocketAddr::from(DEFAULT_BIND),
            callback_secret: None,
        }
    }

    /// Creates an `EngineConfig` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates an `EngineConfig` from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        EngineConfig {
            state_dir: non_empty("DEAL_QUEUE_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            deals_root: non_empty("DEAL_QUEUE_DEALS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.deals_root),
            concurrency: non_empty("DEAL_QUEUE_CONCURRENCY")
                .and_then(|s| s.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            max_retries: non_empty("DEAL_QUEUE_MAX_RETRIES")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            bind: non_empty("DEAL_QUEUE_BIND")
                .and_then(|s| s.trim().parse::<SocketAddr>().ok())
                .unwrap_or(defaults.bind),
            callback_secret: non_empty("DEAL_QUEUE_CALLBACK_SECRET").map(String::into_bytes),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join(SNAPSHOT_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join(HISTORY_FILE)
    }

    /// The scheduler configuration this process runs with.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::default()
            .with_concurrency(self.concurrency)
            .with_max_retries(self.max_retries)
            .with_snapshot_path(self.snapshot_path())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config.state_dir, PathBuf::from("state"));
        assert_eq!(config.deals_root, PathBuf::from("deals"));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.bind, "0.0.0.0:3000".parse().unwrap());
        assert!(config.callback_secret.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DEAL_QUEUE_STATE_DIR", "/var/lib/deal-queue"),
            ("DEAL_QUEUE_DEALS_ROOT", "/srv/deals"),
            ("DEAL_QUEUE_CONCURRENCY", "8"),
            ("DEAL_QUEUE_MAX_RETRIES", "0"),
            ("DEAL_QUEUE_BIND", "127.0.0.1:8080"),
            ("DEAL_QUEUE_CALLBACK_SECRET", "s3cret"),
        ]));
        assert_eq!(config.deals_root, PathBuf::from("/srv/deals"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.callback_secret.as_deref(), Some(&b"s3cret"[..]));
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/lib/deal-queue/queue-state.json")
        );
        assert_eq!(
            config.history_path(),
            PathBuf::from("/var/lib/deal-queue/history.jsonl")
        );
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DEAL_QUEUE_CONCURRENCY", "lots"),
            ("DEAL_QUEUE_MAX_RETRIES", "-1"),
            ("DEAL_QUEUE_BIND", "localhost"),
            ("DEAL_QUEUE_CALLBACK_SECRET", "  "),
        ]));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.bind, SocketAddr::from(DEFAULT_BIND));
        assert!(config.callback_secret.is_none());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = EngineConfig::from_lookup(lookup(&[("DEAL_QUEUE_CONCURRENCY", "0")]));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn manager_config_carries_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DEAL_QUEUE_STATE_DIR", "/tmp/dq"),
            ("DEAL_QUEUE_CONCURRENCY", "5"),
            ("DEAL_QUEUE_MAX_RETRIES", "1"),
        ]));
        let manager = config.manager_config();
        assert_eq!(manager.concurrency, 5);
        assert_eq!(manager.max_retries, 1);
        assert_eq!(
            manager.snapshot_path,
            Some(PathBuf::from("/tmp/dq/queue-state.json"))
        );
    }
}
