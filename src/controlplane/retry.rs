//! Per-claim retry delays
//!
//! Each failing claim gets its own exponential backoff so a broken claim
//! does not slow down retries of healthy ones.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Bounds of the retry delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Jitter applied around each delay, 0 disables it
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(300),
            multiplier: 2.0,
            randomization_factor: 0.1,
        }
    }
}

/// Tracks a backoff per claim UID
pub struct RetryTracker {
    config: RetryConfig,
    backoffs: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl RetryTracker {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next attempt for `key`
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut backoffs = self.backoffs.lock();
        let backoff = backoffs
            .entry(key.to_string())
            .or_insert_with(|| self.build());

        // never gives up: max_elapsed_time is unset
        backoff.next_backoff().unwrap_or(self.config.max_interval)
    }

    /// Forget the failures of `key` after a successful attempt
    pub fn reset(&self, key: &str) {
        self.backoffs.lock().remove(key);
    }

    pub fn tracked(&self) -> usize {
        self.backoffs.lock().len()
    }

    fn build(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_interval)
            .with_max_interval(self.config.max_interval)
            .with_multiplier(self.config.multiplier)
            .with_randomization_factor(self.config.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
