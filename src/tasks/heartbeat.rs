use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WebSocketConfig;
use crate::connection_manager::{ConnectionHandle, ConnectionManager};
use crate::websocket::OutboundMessage;

/// A ping that cannot be queued within this window counts as failed
const PING_SEND_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_CONCURRENT_PINGS: usize = 1000;

/// Outcome of one ping round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PingRound {
    pub sent: usize,
    pub failed: usize,
}

/// Background task for heartbeat and idle connection cleanup
pub struct HeartbeatTask {
    config: WebSocketConfig,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        connection_manager: Arc<ConnectionManager>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            connection_manager,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup tasks
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval);
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = cleanup_timer.tick() => {
                    self.close_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Queue a ping on every local socket. A socket whose writer is gone
    /// is asked to close so its seat is released without waiting for the
    /// idle timeout.
    async fn send_heartbeats(&self) -> PingRound {
        let connections = self.connection_manager.get_all_connections();
        if connections.is_empty() {
            return PingRound::default();
        }

        let start = Instant::now();
        let round = stream::iter(connections)
            .map(|handle| async move {
                let delivered = ping(&handle).await;
                if !delivered {
                    tracing::debug!(connection_id = %handle.id, "Ping failed, closing connection");
                    handle.request_close();
                }
                delivered
            })
            .buffer_unordered(MAX_CONCURRENT_PINGS)
            .fold(PingRound::default(), |mut round, delivered| async move {
                if delivered {
                    round.sent += 1;
                } else {
                    round.failed += 1;
                }
                round
            })
            .await;

        tracing::debug!(
            sent = round.sent,
            failed = round.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Heartbeat round completed"
        );
        round
    }

    /// Ask idle sockets to close. Their close path releases the room seat.
    fn close_stale_connections(&self, timeout_secs: u64) -> usize {
        let stale = self.connection_manager.find_stale_connections(timeout_secs);

        for handle in &stale {
            tracing::debug!(connection_id = %handle.id, "Closing idle connection");
            handle.request_close();
        }

        if !stale.is_empty() {
            tracing::info!(
                closed = stale.len(),
                timeout_secs = timeout_secs,
                "Closed stale connections"
            );
        }

        stale.len()
    }
}

async fn ping(handle: &ConnectionHandle) -> bool {
    matches!(
        timeout(PING_SEND_TIMEOUT, handle.send_outbound(OutboundMessage::Ping)).await,
        Ok(Ok(_))
    )
}
