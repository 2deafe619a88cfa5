//! Exponential backoff with jitter

use std::time::Duration;

use rand::Rng;

use crate::config::{RedisConfig, RoomConfig};

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Reconnect delays for Redis connections and subscribers
    pub fn for_reconnect(config: &RedisConfig) -> Self {
        Self {
            initial_delay_ms: config.backoff_initial_delay_ms,
            max_delay_ms: config.backoff_max_delay_ms,
            ..Default::default()
        }
    }

    /// Short, heavily jittered delays between conditional-write retries on one room.
    /// Jitter spreads out racers that lost the same version.
    pub fn for_contention(config: &RoomConfig) -> Self {
        Self {
            initial_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_base_delay_ms.saturating_mul(32).max(1),
            multiplier: 2.0,
            jitter_factor: 0.5,
        }
    }
}

pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_delay_ms: u64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let current_delay_ms = config.initial_delay_ms;
        Self {
            config,
            current_delay_ms,
            attempt: 0,
        }
    }

    /// First call returns the initial delay; later calls grow by the multiplier
    pub fn next_delay(&mut self) -> Duration {
        let base = if self.attempt == 0 {
            self.current_delay_ms as f64
        } else {
            self.current_delay_ms as f64 * self.config.multiplier
        };
        self.attempt += 1;

        let capped = base.min(self.config.max_delay_ms as f64);
        self.current_delay_ms = capped as u64;

        let spread = capped * self.config.jitter_factor;
        let jittered = if spread > 0.0 {
            capped + rand::rng().random_range(-spread..spread)
        } else {
            capped
        };

        Duration::from_millis(jittered.max(0.0) as u64)
    }

    /// Sleep for the next delay
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }

    pub fn reset(&mut self) {
        self.current_delay_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
