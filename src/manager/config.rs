//! Scheduler configuration.
//!
//! Every cadence and threshold the manager uses lives here, with defaults
//! suited to a single-node deployment. Tests shrink the intervals to
//! milliseconds.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of concurrent dispatch workers.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default attempts allowed after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Exponential backoff between processing attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap for exponential growth.
    pub max_delay: Duration,

    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 30s, 60s, 120s, ... capped at 10 minutes.
    pub const DEFAULT: Self = Self {
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(600),
        backoff_multiplier: 2.0,
    };

    /// No waiting between attempts.
    pub const IMMEDIATE: Self = Self {
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    };

    pub fn new(initial_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Computes the delay for the given retry attempt (0-indexed).
    ///
    /// `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs.max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of dispatch workers.
    pub concurrency: usize,

    /// `max_retries` stamped onto newly admitted items.
    pub max_retries: u32,

    pub retry: RetryConfig,

    /// A Processing item times out after `estimated_duration * timeout_multiplier`,
    /// but never sooner than `timeout_floor`.
    pub timeout_multiplier: f64,
    pub timeout_floor: Duration,
    pub timeout_check_interval: Duration,

    pub persistence_interval: Duration,

    pub cleanup_interval: Duration,
    /// How long terminal items stay queryable before the cleanup sweep.
    pub completed_retention: Duration,
    pub history_retention: Duration,

    /// Window for `QueueStats::throughput_per_hour`.
    pub throughput_window: Duration,

    /// How long an idle dispatch worker sleeps before re-checking the queue.
    pub dispatch_idle_poll: Duration,

    /// Where snapshots are written. `None` keeps state in memory only.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        ManagerConfig {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry: RetryConfig::DEFAULT,
            timeout_multiplier: 3.0,
            timeout_floor: Duration::from_secs(30 * 60),
            timeout_check_interval: Duration::from_secs(60),
            persistence_interval: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            history_retention: Duration::from_secs(30 * 24 * 60 * 60),
            throughput_window: Duration::from_secs(60 * 60),
            dispatch_idle_poll: Duration::from_secs(1),
            snapshot_path: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, multiplier: f64, floor: Duration) -> Self {
        self.timeout_multiplier = multiplier;
        self.timeout_floor = floor;
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Shrinks every loop interval to `interval`. Used by tests.
    pub fn with_intervals(mut self, interval: Duration) -> Self {
        self.timeout_check_interval = interval;
        self.persistence_interval = interval;
        self.cleanup_interval = interval;
        self.dispatch_idle_poll = interval;
        self
    }

    /// Timeout threshold for an item with the given estimate.
    pub fn timeout_for(&self, estimated: chrono::Duration) -> chrono::Duration {
        let estimated_secs = estimated.num_milliseconds().max(0) as f64 / 1000.0;
        let scaled = Duration::from_secs_f64((estimated_secs * self.timeout_multiplier).max(0.0));
        to_chrono(scaled.max(self.timeout_floor))
    }
}

/// Converts a std duration to chrono, saturating on overflow.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_delays_double_from_30s() {
        let config = RetryConfig::DEFAULT;
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(120));
    }

    #[test]
    fn delays_are_capped() {
        let config = RetryConfig::DEFAULT;
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(600));
    }

    #[test]
    fn immediate_never_waits() {
        assert_eq!(RetryConfig::IMMEDIATE.delay_for_attempt(5), Duration::ZERO);
    }

    #[test]
    fn timeout_uses_floor_for_short_estimates() {
        let config = ManagerConfig::default();
        // 10 min * 3 = 30 min, equal to the floor
        assert_eq!(
            config.timeout_for(chrono::Duration::minutes(10)),
            chrono::Duration::minutes(30)
        );
        // 1 min * 3 = 3 min, below the floor
        assert_eq!(
            config.timeout_for(chrono::Duration::minutes(1)),
            chrono::Duration::minutes(30)
        );
        // 20 min * 3 = 60 min
        assert_eq!(
            config.timeout_for(chrono::Duration::minutes(20)),
            chrono::Duration::minutes(60)
        );
    }

    #[test]
    fn concurrency_is_at_least_one() {
        assert_eq!(ManagerConfig::default().with_concurrency(0).concurrency, 1);
    }

    proptest! {
        #[test]
        fn delays_never_exceed_cap(attempt in 0u32..64) {
            let config = RetryConfig::DEFAULT;
            prop_assert!(config.delay_for_attempt(attempt) <= config.max_delay);
        }

        #[test]
        fn delays_are_monotonic(attempt in 0u32..32) {
            let config = RetryConfig::DEFAULT;
            prop_assert!(config.delay_for_attempt(attempt) <= config.delay_for_attempt(attempt + 1));
        }
    }
}
