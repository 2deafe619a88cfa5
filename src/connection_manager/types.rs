//! Connection handle for locally held sockets

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

/// Handle for a single WebSocket connection held by this instance
pub struct ConnectionHandle {
    /// Opaque connection id shared with the registry and room members
    pub id: String,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    /// Flips to true once something decided this socket must go away
    close_tx: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<OutboundMessage>) -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string(), sender)
    }

    pub fn with_id(id: impl Into<String>, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        let (close_tx, _) = watch::channel(false);
        Self {
            id: id.into(),
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            close_tx,
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Send a ServerMessage (will be serialized when sent to WebSocket)
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Raw(message)).await
    }

    /// Send a pre-serialized or control message
    pub async fn send_outbound(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }

    /// Ask the socket's reader loop to stop. Work already started for a
    /// received frame still runs to completion.
    pub fn request_close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_close_requested(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Receiver that observes `request_close`
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, timestamp: i64) {
        self.last_activity.store(timestamp, Ordering::Relaxed);
    }
}
