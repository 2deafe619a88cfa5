//! Delivery of notifications to connection ids.
//!
//! Delivery is best effort: a target that cannot be reached is counted and
//! skipped, never allowed to fail the batch or undo a committed room change.

mod cluster;
mod local;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ClusterConfig;
use crate::connection_manager::ConnectionManager;
use crate::redis::RedisPool;
use crate::websocket::ServerMessage;

pub use cluster::{ClusterGateway, RoutedDelivery, RoutedDeliverySubscriber};
pub use local::LocalGateway;

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Handed to a socket held by this instance
    pub delivered: usize,
    /// Unknown or closed targets
    pub failed: usize,
    /// Published for other instances to deliver
    pub routed: usize,
}

impl DeliveryReport {
    pub fn merge(self, other: DeliveryReport) -> Self {
        Self {
            delivered: self.delivered + other.delivered,
            failed: self.failed + other.failed,
            routed: self.routed + other.routed,
        }
    }
}

#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Push one payload to every listed connection
    async fn post_to_connections(
        &self,
        connection_ids: &[String],
        message: &ServerMessage,
    ) -> DeliveryReport;
}

/// Create the delivery gateway for this instance.
///
/// Cluster mode needs Redis to publish routed deliveries; without a pool
/// this falls back to local-only delivery.
pub fn create_gateway(
    config: &ClusterConfig,
    connection_manager: Arc<ConnectionManager>,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn DeliveryGateway> {
    match (config.enabled, redis_pool) {
        (true, Some(pool)) => {
            tracing::info!(
                server_id = %config.server_id,
                routing_channel = %config.routing_channel,
                "Creating cluster delivery gateway"
            );
            Arc::new(ClusterGateway::new(
                LocalGateway::new(connection_manager),
                pool,
                config.clone(),
            ))
        }
        (true, None) => {
            tracing::warn!("Cluster mode requested but no Redis pool provided, delivering locally");
            Arc::new(LocalGateway::new(connection_manager))
        }
        (false, _) => Arc::new(LocalGateway::new(connection_manager)),
    }
}
