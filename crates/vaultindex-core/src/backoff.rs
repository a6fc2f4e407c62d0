//! Exponential backoff applied after a failed poll cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the error backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failed cycle (milliseconds).
    pub initial_ms: u64,
    /// Multiplier applied for each further consecutive failure.
    pub multiplier: f64,
    /// Cap on the delay (milliseconds).
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 10_000,
            multiplier: 2.0,
            max_ms: 60_000,
        }
    }
}

impl BackoffConfig {
    /// Backoff starting at twice the poll interval.
    pub fn for_poll_interval(poll_interval_ms: u64) -> Self {
        Self {
            initial_ms: poll_interval_ms.saturating_mul(2),
            ..Default::default()
        }
    }
}

/// Tracks consecutive failures and yields the next delay.
#[derive(Debug, Clone)]
pub struct ErrorBackoff {
    config: BackoffConfig,
    failures: u32,
}

impl ErrorBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, failures: 0 }
    }

    /// Record a failure and return how long to wait before the next cycle.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let exp = (self.failures - 1).min(32) as i32;
        let base_ms = self.config.initial_ms as f64 * self.config.multiplier.max(1.0).powi(exp);
        let capped = base_ms.min(self.config.max_ms.max(self.config.initial_ms) as f64);
        Duration::from_millis(capped as u64)
    }

    /// Clear the failure streak after a successful cycle.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_twice_poll_interval() {
        let mut b = ErrorBackoff::new(BackoffConfig::for_poll_interval(5_000));
        assert_eq!(b.next_delay(), Duration::from_millis(10_000));
        assert_eq!(b.next_delay(), Duration::from_millis(20_000));
        assert_eq!(b.next_delay(), Duration::from_millis(40_000));
        assert_eq!(b.next_delay(), Duration::from_millis(60_000));
        assert_eq!(b.next_delay(), Duration::from_millis(60_000));
        assert_eq!(b.failures(), 5);
    }

    #[test]
    fn reset_restarts_streak() {
        let mut b = ErrorBackoff::new(BackoffConfig {
            initial_ms: 100,
            multiplier: 3.0,
            max_ms: 10_000,
        });
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }
}
