use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::websocket::OutboundMessage;

use super::ConnectionHandle;

/// Sockets held by this instance, keyed by connection id
pub struct ConnectionManager {
    connections: DashMap<String, Arc<ConnectionHandle>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a new connection under a freshly assigned id
    pub fn register(&self, sender: mpsc::Sender<OutboundMessage>) -> Arc<ConnectionHandle> {
        self.insert(Arc::new(ConnectionHandle::new(sender)))
    }

    /// Register a connection whose id was assigned elsewhere
    pub fn insert(&self, handle: Arc<ConnectionHandle>) -> Arc<ConnectionHandle> {
        self.connections.insert(handle.id.clone(), handle.clone());
        tracing::info!(connection_id = %handle.id, "Connection registered");
        handle
    }

    /// Unregister a connection
    pub fn unregister(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.remove(connection_id).map(|(_, h)| h);
        if removed.is_some() {
            tracing::info!(connection_id = %connection_id, "Connection unregistered");
        }
        removed
    }

    /// Get connection by ID
    pub fn get_connection(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(connection_id).map(|h| h.clone())
    }

    /// Get all connections
    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Get all connection IDs
    pub fn get_all_connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<Arc<ConnectionHandle>> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        let now = Utc::now();
        let oldest_connection_secs = self
            .connections
            .iter()
            .map(|entry| now.signed_duration_since(entry.value().connected_at).num_seconds())
            .max()
            .unwrap_or(0);

        ConnectionStats {
            local_connections: self.connections.len(),
            oldest_connection_secs,
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection statistics for this instance
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub local_connections: usize,
    pub oldest_connection_secs: i64,
}
