//! Redis link state as seen by the pool.
//!
//! The pool reports every connect attempt and breaker trip here; the health
//! and stats endpoints read a snapshot, and the connection gauge follows
//! every transition.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use crate::metrics::REDIS_CONNECTION_STATUS;

use super::current_time_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisHealthStatus {
    Healthy,
    Reconnecting,
    CircuitOpen,
}

impl RedisHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisHealthStatus::Healthy => "healthy",
            RedisHealthStatus::Reconnecting => "reconnecting",
            RedisHealthStatus::CircuitOpen => "circuit_open",
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            RedisHealthStatus::Healthy => 0,
            RedisHealthStatus::Reconnecting => 1,
            RedisHealthStatus::CircuitOpen => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => RedisHealthStatus::Healthy,
            2 => RedisHealthStatus::CircuitOpen,
            _ => RedisHealthStatus::Reconnecting,
        }
    }
}

pub struct RedisHealth {
    status: AtomicU8,
    /// When the current link came up; 0 while down
    connected_at_ms: AtomicI64,
    /// Connect attempts that failed since the last good one
    failed_connects: AtomicU32,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(RedisHealthStatus::Reconnecting.to_raw()),
            connected_at_ms: AtomicI64::new(0),
            failed_connects: AtomicU32::new(0),
        }
    }

    fn transition(&self, status: RedisHealthStatus) {
        self.status.store(status.to_raw(), Ordering::Release);
        REDIS_CONNECTION_STATUS.set(i64::from(status == RedisHealthStatus::Healthy));
    }

    /// A connect attempt is about to start
    pub fn begin_connect(&self) {
        self.connected_at_ms.store(0, Ordering::Release);
        self.transition(RedisHealthStatus::Reconnecting);
    }

    pub fn record_connected(&self) {
        self.connected_at_ms.store(current_time_ms(), Ordering::Release);
        self.failed_connects.store(0, Ordering::Release);
        self.transition(RedisHealthStatus::Healthy);
    }

    pub fn record_connect_failure(&self) {
        self.failed_connects.fetch_add(1, Ordering::AcqRel);
    }

    /// The breaker refused a request
    pub fn record_circuit_open(&self) {
        self.transition(RedisHealthStatus::CircuitOpen);
    }

    pub fn status(&self) -> RedisHealthStatus {
        RedisHealthStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    pub fn snapshot(&self) -> RedisHealthSnapshot {
        let status = self.status();
        let connected_at = self.connected_at_ms.load(Ordering::Acquire);
        let connected_for_secs = (status == RedisHealthStatus::Healthy && connected_at > 0)
            .then(|| (current_time_ms() - connected_at) / 1000);

        RedisHealthSnapshot {
            status,
            connected_for_secs,
            failed_connects: self.failed_connects.load(Ordering::Acquire),
        }
    }
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct RedisHealthSnapshot {
    pub status: RedisHealthStatus,
    pub connected_for_secs: Option<i64>,
    pub failed_connects: u32,
}
