//! Exponential backoff.
//!
//! Two callers: the node client retries single RPC calls up to
//! `max_retries` times, and the follower loop retries whole blocks forever
//! using the same curve.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff settings, as they appear in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// RPC retries after the first failed call.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay.
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Extra `jitter_fraction / 2` of the delay, added on top (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay after the `failures`-th consecutive failure (1-based), with no
    /// retry limit.
    pub fn backoff(&self, failures: u32) -> Duration {
        let cfg = &self.config;
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let ms = (cfg.initial_backoff_ms as f64 * cfg.multiplier.powi(exponent))
            .min(cfg.max_backoff_ms as f64);
        Duration::from_millis((ms * (1.0 + cfg.jitter_fraction / 2.0)) as u64)
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// retry budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (1..=self.config.max_retries)
            .contains(&attempt)
            .then(|| self.backoff(attempt))
    }
}
