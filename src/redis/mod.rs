//! Redis connectivity for the durable room store and connection registry.
//!
//! - `RedisPool`: shared multiplexed connection guarded by a circuit breaker
//! - `CircuitBreaker`: stops hammering Redis while it is unavailable
//! - `ExponentialBackoff`: delays for reconnects and contended conditional writes
//! - `RedisHealth`: connection status reported by `/health`

mod backoff;
mod circuit_breaker;
mod health;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use health::{RedisHealth, RedisHealthSnapshot, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};

/// Milliseconds since the Unix epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
