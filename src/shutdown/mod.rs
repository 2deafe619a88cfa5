//! Graceful shutdown handling for the room service.
//!
//! Sockets die with the instance, so before exiting:
//! 1. Every local connection is taken out of its room and its registry
//!    entry is dropped, telling the remaining members
//! 2. Sockets are asked to close
//! 3. Background tasks are signaled to stop
//! 4. Connections get a bounded wait to finish closing

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::connection_manager::ConnectionManager;
use crate::coordinator::RoomCoordinator;

/// Maximum number of disconnect cleanups running at once
const MAX_CONCURRENT_RELEASES: usize = 64;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time allowed for releasing every room membership (default: 10 seconds)
    pub release_timeout: Duration,
    /// Time to wait for sockets to close (default: 5 seconds)
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            release_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Handles graceful shutdown of the room service
pub struct GracefulShutdown {
    connection_manager: Arc<ConnectionManager>,
    coordinator: Arc<RoomCoordinator>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        coordinator: Arc<RoomCoordinator>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self::with_config(
            connection_manager,
            coordinator,
            shutdown_tx,
            ShutdownConfig::default(),
        )
    }

    pub fn with_config(
        connection_manager: Arc<ConnectionManager>,
        coordinator: Arc<RoomCoordinator>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            connection_manager,
            coordinator,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(local_connections = self.connection_manager.len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Releasing room memberships");
        let (released, failures) = self.release_memberships().await;
        result.members_released = released;
        result.release_failures = failures;

        tracing::info!("Phase 2: Closing sockets");
        for conn in self.connection_manager.get_all_connections() {
            conn.request_close();
        }

        tracing::info!("Phase 3: Signaling background tasks to stop");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 4: Waiting for connections to close");
        result.connections_closed = self.wait_for_connections_to_close().await;

        result.duration = start.elapsed();
        result.success = result.release_failures == 0;

        tracing::info!(
            members_released = result.members_released,
            release_failures = result.release_failures,
            connections_closed = result.connections_closed,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Run disconnect cleanup for every local connection. Returns
    /// `(released, failed)`; cleanups cut off by the timeout count as failed.
    async fn release_memberships(&self) -> (usize, usize) {
        let ids = self.connection_manager.get_all_connection_ids();
        let total = ids.len();

        if total == 0 {
            return (0, 0);
        }

        tracing::info!(total_connections = total, "Releasing room memberships");

        let mut released = 0;
        let mut failed = 0;

        let release_all = async {
            let mut futures = FuturesUnordered::new();

            for id in ids {
                let coordinator = self.coordinator.clone();
                futures.push(async move {
                    match coordinator.handle_disconnect(&id).await {
                        Ok(_) => true,
                        Err(e) => {
                            tracing::warn!(connection_id = %id, error = %e, "Failed to release membership");
                            false
                        }
                    }
                });

                while futures.len() >= MAX_CONCURRENT_RELEASES {
                    match futures.next().await {
                        Some(true) => released += 1,
                        Some(false) => failed += 1,
                        None => break,
                    }
                }
            }

            while let Some(ok) = futures.next().await {
                if ok {
                    released += 1;
                } else {
                    failed += 1;
                }
            }
        };

        if timeout(self.config.release_timeout, release_all).await.is_err() {
            tracing::warn!(
                released = released,
                failed = failed,
                total = total,
                "Membership release timed out"
            );
            failed = total - released;
        }

        (released, failed)
    }

    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.connection_manager.len();
        if initial == 0 {
            return 0;
        }

        let wait_future = async {
            while !self.connection_manager.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };

        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let final_count = self.connection_manager.len();
        if final_count > 0 {
            tracing::warn!(
                remaining_connections = final_count,
                "Some connections did not close gracefully"
            );
        }

        initial.saturating_sub(final_count)
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether every membership was released
    pub success: bool,
    /// Connections whose disconnect cleanup completed
    pub members_released: usize,
    pub release_failures: usize,
    /// Number of connections that closed before the drain timeout
    pub connections_closed: usize,
    pub duration: Duration,
}
