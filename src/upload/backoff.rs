// src/upload/backoff.rs
//! Adaptive upload interval
//!
//! Multiplicative on both sides: the interval shrinks after a productive
//! tick and grows after a failure or an idle tick, clamped to
//! `[min_delay, max_delay]`.

use crate::utils::config::UploadConfig;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffState {
    current_ms: u64,
    min_ms: u64,
    max_ms: u64,
    decrease: f64,
    increase: f64,
}

impl BackoffState {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            current_ms: config
                .default_delay_ms
                .clamp(config.min_delay_ms, config.max_delay_ms),
            min_ms: config.min_delay_ms,
            max_ms: config.max_delay_ms,
            decrease: config.decrease_percent,
            increase: config.increase_percent,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    /// Shrink the interval, floored at the minimum
    pub fn decrease(&mut self) {
        self.current_ms = self.scaled(self.decrease);
    }

    /// Grow the interval, capped at the maximum
    pub fn increase(&mut self) {
        self.current_ms = self.scaled(self.increase);
    }

    fn scaled(&self, factor: f64) -> u64 {
        let next = (self.current_ms as f64 * factor).round() as u64;
        next.clamp(self.min_ms, self.max_ms)
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new(&UploadConfig::default())
    }
}
