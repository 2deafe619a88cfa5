use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionHandle;
use crate::coordinator::{JoinIntent, JoinRequest};
use crate::metrics::WsMetrics;
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, RoomIntent, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 32;

/// How long the writer gets to flush a close frame before it is dropped
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state),
    fields(connection_id = tracing::field::Empty, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_start = std::time::Instant::now();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(CHANNEL_BUFFER_SIZE);
    let handle = state.connection_manager.register(tx);
    let connection_id = handle.id.clone();
    tracing::Span::current().record("connection_id", connection_id.as_str());

    WsMetrics::record_opened();

    // Joining upserts the registry entry, so a failure here is not fatal
    if let Err(e) = state.coordinator.register_connection(&connection_id).await {
        tracing::warn!(error = %e, "Failed to register connection in registry");
    }

    tracing::info!("WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg {
                OutboundMessage::Ping => Message::Ping(Bytes::new()),
                OutboundMessage::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
                other => match other.to_json() {
                    Ok(Some(text)) => Message::Text(text.into()),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize message");
                        continue;
                    }
                },
            };

            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving messages from WebSocket. Coordinator work for a
    // frame is never cancelled; the close signal is only checked between
    // frames.
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut close_signal = handle_clone.close_signal();
        loop {
            let next = tokio::select! {
                next = ws_receiver.next() => next,
                _ = close_signal.wait_for(|closing| *closing) => {
                    tracing::debug!("Close requested");
                    break;
                }
            };

            match next {
                Some(Ok(msg)) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            }
        }
    });

    let send_finished_first = tokio::select! {
        _ = &mut send_task => true,
        _ = &mut recv_task => false,
    };

    if send_finished_first {
        tracing::debug!("Send task completed");
        // Let an in-flight request finish before cleaning up
        handle.request_close();
        let _ = recv_task.await;
    } else {
        tracing::debug!("Receive task completed");
        let _ = handle.sender.try_send(OutboundMessage::Close);
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task)
            .await
            .is_err()
        {
            send_task.abort();
        }
    }

    state.connection_manager.unregister(&connection_id);

    if let Err(e) = state.coordinator.handle_disconnect(&connection_id).await {
        tracing::warn!(error = %e, "Disconnect cleanup incomplete");
    }

    let duration = connection_start.elapsed().as_secs_f64();
    WsMetrics::record_closed(duration);

    tracing::info!(duration_secs = duration, "WebSocket connection closed");
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    WsMetrics::record_message("invalid");
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::invalid_request(format!(
                            "Malformed room request: {}",
                            e
                        )))
                        .await;
                    return true;
                }
            };

            handle_client_message(client_msg, state, handle).await;
            true
        }
        Message::Binary(_) => {
            WsMetrics::record_message("invalid");
            let _ = handle
                .send(ServerMessage::invalid_request(
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Route a parsed room request to the coordinator. Failures were already
/// reported to the connection by the coordinator.
#[tracing::instrument(
    name = "ws.message",
    skip(msg, state, handle),
    fields(connection_id = %handle.id, intent = ?msg.data.intent)
)]
async fn handle_client_message(msg: ClientMessage, state: &AppState, handle: &Arc<ConnectionHandle>) {
    let data = msg.data;
    match data.intent {
        RoomIntent::Create => {
            WsMetrics::record_message("create");
            let _ = state
                .coordinator
                .handle_join(JoinRequest::create(data.name, handle.id.as_str()))
                .await;
        }
        RoomIntent::Join => {
            WsMetrics::record_message("join");
            let request = JoinRequest {
                intent: JoinIntent::Join,
                display_name: data.name,
                room_id: data.room_id,
                connection_id: handle.id.clone(),
            };
            let _ = state.coordinator.handle_join(request).await;
        }
        RoomIntent::Leave => {
            WsMetrics::record_message("leave");
            let _ = state.coordinator.leave(&handle.id).await;
        }
    }
}
