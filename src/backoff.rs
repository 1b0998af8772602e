//! Per-key requeue backoff with exponential growth and jitter.
//!
//! The reconcile itself never retries. When it fails, the controller's error
//! policy asks this tracker how long to wait before the key is delivered
//! again. Consecutive failures of the same key grow the delay; a successful
//! reconcile resets it.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

use crate::object::ObjectKey;

/// Delay growth settings for failed reconciles
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

/// Tracks consecutive failures per reconcile key
#[derive(Debug, Default)]
pub struct Backoff {
    config: BackoffConfig,
    failures: DashMap<ObjectKey, u32>,
}

impl Backoff {
    /// Create a tracker with the given settings
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Un-jittered delay for the given (1-based) failure count
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.config.max_delay.as_secs_f64()))
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let failures = {
            let mut entry = self.failures.entry(key.clone()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };

        // Add jitter: 0.5x to 1.5x of the delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = self.base_delay(failures).as_secs_f64() * jitter;
        Duration::from_secs_f64(jittered.min(self.config.max_delay.as_secs_f64()))
    }

    /// Forget failures for `key` after a successful reconcile
    pub fn reset(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map(|v| *v).unwrap_or(0)
    }
}
