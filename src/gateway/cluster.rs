//! Cross-instance delivery.
//!
//! Each socket lives on exactly one instance. Targets this instance does not
//! hold are published on the routing channel; every instance subscribes and
//! delivers to the ids it holds.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::ClusterConfig;
use crate::connection_manager::ConnectionManager;
use crate::metrics::DeliveryMetrics;
use crate::redis::{BackoffConfig, ExponentialBackoff, RedisPool};
use crate::room::StoreError;
use crate::websocket::ServerMessage;

use super::{DeliveryGateway, DeliveryReport, LocalGateway};

/// Delivery published for other instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedDelivery {
    pub connection_ids: Vec<String>,
    /// Serialized `ServerMessage`
    pub payload: String,
    pub from_server: String,
}

pub struct ClusterGateway {
    local: LocalGateway,
    redis_pool: Arc<RedisPool>,
    config: ClusterConfig,
}

impl ClusterGateway {
    pub fn new(local: LocalGateway, redis_pool: Arc<RedisPool>, config: ClusterConfig) -> Self {
        Self {
            local,
            redis_pool,
            config,
        }
    }

    async fn publish(
        &self,
        connection_ids: Vec<String>,
        message: &ServerMessage,
    ) -> Result<(), StoreError> {
        let routed = RoutedDelivery {
            connection_ids,
            payload: serde_json::to_string(message)?,
            from_server: self.config.server_id.clone(),
        };
        let body = serde_json::to_string(&routed)?;
        let channel = self.config.routing_channel.clone();

        self.redis_pool
            .execute(|mut conn| async move {
                let receivers: redis::RedisResult<i64> = redis::cmd("PUBLISH")
                    .arg(&channel)
                    .arg(&body)
                    .query_async(&mut conn)
                    .await;
                receivers
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryGateway for ClusterGateway {
    #[tracing::instrument(
        name = "gateway.cluster",
        skip(self, connection_ids, message),
        fields(targets = connection_ids.len(), kind = message.kind())
    )]
    async fn post_to_connections(
        &self,
        connection_ids: &[String],
        message: &ServerMessage,
    ) -> DeliveryReport {
        let (mut report, missing) = self.local.deliver(connection_ids, message).await;

        if !missing.is_empty() {
            let count = missing.len();
            match self.publish(missing, message).await {
                Ok(()) => report.routed += count,
                Err(e) => {
                    tracing::warn!(error = %e, targets = count, "Failed to publish routed delivery");
                    report.failed += count;
                }
            }
        }

        DeliveryMetrics::record_outcome(report.delivered, report.failed, report.routed);
        report
    }
}

/// Background task delivering routed messages published by other instances
pub struct RoutedDeliverySubscriber {
    config: ClusterConfig,
    redis_pool: Arc<RedisPool>,
    local: LocalGateway,
    backoff: BackoffConfig,
    shutdown: broadcast::Receiver<()>,
}

impl RoutedDeliverySubscriber {
    pub fn new(
        config: ClusterConfig,
        redis_pool: Arc<RedisPool>,
        connection_manager: Arc<ConnectionManager>,
        backoff: BackoffConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            redis_pool,
            local: LocalGateway::new(connection_manager),
            backoff,
            shutdown,
        }
    }

    /// Run the subscriber task with automatic reconnection
    pub async fn run(mut self) {
        if !self.config.enabled {
            tracing::info!("Cluster mode disabled, routed delivery subscriber not starting");
            return;
        }

        tracing::info!(
            server_id = %self.config.server_id,
            routing_channel = %self.config.routing_channel,
            "Routed delivery subscriber starting"
        );

        let mut backoff = ExponentialBackoff::with_config(self.backoff.clone());

        loop {
            match self.run_subscription_loop(&mut backoff).await {
                Ok(()) => {
                    tracing::info!("Routed delivery subscriber stopped gracefully");
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        retry_delay_ms = delay.as_millis() as u64,
                        "Routed delivery subscription error, reconnecting"
                    );

                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            tracing::info!("Shutdown requested during reconnect delay");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn run_subscription_loop(
        &mut self,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Pub/sub needs a dedicated connection
        let mut pubsub = self.redis_pool.client().get_async_pubsub().await?;
        pubsub.subscribe(&self.config.routing_channel).await?;
        backoff.reset();

        tracing::info!(channel = %self.config.routing_channel, "Subscribed to routing channel");

        let mut message_stream = pubsub.on_message();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    tracing::info!("Received shutdown signal");
                    return Ok(());
                }

                msg = message_stream.next() => {
                    match msg {
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    tracing::warn!(error = %e, "Failed to get message payload");
                                    continue;
                                }
                            };
                            self.handle_routed_delivery(&payload).await;
                        }
                        None => {
                            tracing::warn!("Redis message stream ended unexpectedly");
                            return Err("Message stream ended".into());
                        }
                    }
                }
            }
        }
    }

    /// Deliver a routed message to the targets held here. Returns how many
    /// sockets received it.
    pub async fn handle_routed_delivery(&self, payload: &str) -> usize {
        let routed: RoutedDelivery = match serde_json::from_str(payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse routed delivery");
                return 0;
            }
        };

        if routed.from_server == self.config.server_id {
            return 0;
        }

        let message: ServerMessage = match serde_json::from_str(&routed.payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    from_server = %routed.from_server,
                    "Failed to parse routed message payload"
                );
                return 0;
            }
        };

        // Ids we do not hold belong to other instances
        let (report, _) = self.local.deliver(&routed.connection_ids, &message).await;
        DeliveryMetrics::record_outcome(report.delivered, report.failed, 0);

        tracing::debug!(
            from_server = %routed.from_server,
            delivered = report.delivered,
            "Handled routed delivery"
        );

        report.delivered
    }
}
