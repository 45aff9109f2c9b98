//! # Backoff Calculator
//!
//! Delay before re-running an attempt that failed with an unhandled error.
//! Explicit `retry()` requests never go through here; they carry their own delay.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Exponential delay for the given 1-based attempt number, capped and jittered
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let delay = (base * self.config.multiplier.powi(exponent)).min(max);

        let jitter = if self.config.jitter_enabled && self.config.max_jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.config.max_jitter) * delay
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter) as u64)
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
