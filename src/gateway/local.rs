use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::connection_manager::{ConnectionHandle, ConnectionManager};
use crate::metrics::DeliveryMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

use super::{DeliveryGateway, DeliveryReport};

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Threshold for using pre-serialization (saves serialization overhead for larger sends)
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Delivers to sockets held by this instance only
pub struct LocalGateway {
    connection_manager: Arc<ConnectionManager>,
}

impl LocalGateway {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connection_manager
    }

    /// Deliver to every listed id held here.
    ///
    /// Returns the counts for local sockets and the ids this instance does
    /// not hold, which are not counted in the report.
    pub async fn deliver(
        &self,
        connection_ids: &[String],
        message: &ServerMessage,
    ) -> (DeliveryReport, Vec<String>) {
        let mut connections = Vec::with_capacity(connection_ids.len());
        let mut missing = Vec::new();

        for id in connection_ids {
            match self.connection_manager.get_connection(id) {
                Some(conn) => connections.push(conn),
                None => missing.push(id.clone()),
            }
        }

        let (delivered, failed) = send_to_connections(&connections, message).await;
        let report = DeliveryReport {
            delivered,
            failed,
            routed: 0,
        };
        (report, missing)
    }
}

#[async_trait]
impl DeliveryGateway for LocalGateway {
    #[tracing::instrument(
        name = "gateway.local",
        skip(self, connection_ids, message),
        fields(targets = connection_ids.len(), kind = message.kind())
    )]
    async fn post_to_connections(
        &self,
        connection_ids: &[String],
        message: &ServerMessage,
    ) -> DeliveryReport {
        let (mut report, missing) = self.deliver(connection_ids, message).await;
        report.failed += missing.len();

        if !missing.is_empty() {
            tracing::debug!(missing = ?missing, "Targets not connected to this instance");
        }

        DeliveryMetrics::record_outcome(report.delivered, report.failed, report.routed);
        report
    }
}

/// Send message to a list of connections concurrently.
///
/// Uses bounded parallelism and pre-serializes the message once for larger
/// sends. Returns `(delivered, failed)`.
pub(super) async fn send_to_connections(
    connections: &[Arc<ConnectionHandle>],
    message: &ServerMessage,
) -> (usize, usize) {
    if connections.is_empty() {
        return (0, 0);
    }

    if connections.len() < PRESERIALIZATION_THRESHOLD {
        let mut delivered = 0;
        let mut failed = 0;
        for conn in connections {
            match conn.send(message.clone()).await {
                Ok(_) => delivered += 1,
                Err(_) => failed += 1,
            }
        }
        return (delivered, failed);
    }

    let outbound = match OutboundMessage::preserialized(message) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::error!(error = %e, "Failed to pre-serialize message, falling back to per-connection serialization");
            OutboundMessage::Raw(message.clone())
        }
    };

    let mut futures = FuturesUnordered::new();
    let mut delivered = 0;
    let mut failed = 0;

    for conn in connections {
        let conn = conn.clone();
        let msg = outbound.clone();
        futures.push(async move { conn.send_outbound(msg).await.is_ok() });

        // Drain completed sends when we hit the concurrency limit
        while futures.len() >= MAX_CONCURRENT_SENDS {
            match futures.next().await {
                Some(true) => delivered += 1,
                Some(false) => failed += 1,
                None => break,
            }
        }
    }

    while let Some(ok) = futures.next().await {
        if ok {
            delivered += 1;
        } else {
            failed += 1;
        }
    }

    (delivered, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_unknown_targets_count_as_failed() {
        let manager = Arc::new(ConnectionManager::new());
        let (tx, mut rx) = mpsc::channel(4);
        let handle = manager.register(tx);
        let gateway = LocalGateway::new(manager);

        let report = gateway
            .post_to_connections(
                &[handle.id.clone(), "gone".to_string()],
                &ServerMessage::new_player("Alice"),
            )
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(matches!(rx.recv().await, Some(OutboundMessage::Raw(_))));
    }

    #[tokio::test]
    async fn test_closed_receiver_is_failure() {
        let manager = Arc::new(ConnectionManager::new());
        let (tx, rx) = mpsc::channel(4);
        let handle = manager.register(tx);
        drop(rx);

        let gateway = LocalGateway::new(manager);
        let report = gateway
            .post_to_connections(&[handle.id.clone()], &ServerMessage::removed_player("Bob"))
            .await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_large_fanout_is_preserialized() {
        let manager = Arc::new(ConnectionManager::new());
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..6 {
            let (tx, rx) = mpsc::channel(4);
            ids.push(manager.register(tx).id.clone());
            receivers.push(rx);
        }

        let gateway = LocalGateway::new(manager);
        let report = gateway
            .post_to_connections(&ids, &ServerMessage::new_player("Carol"))
            .await;
        assert_eq!(report.delivered, 6);

        for rx in receivers.iter_mut() {
            let msg = rx.recv().await.unwrap();
            assert!(matches!(msg, OutboundMessage::Serialized(_)));
            assert_eq!(
                msg.to_json().unwrap().as_deref(),
                Some(r#"{"newPlayer":"Carol"}"#)
            );
        }
    }
}
