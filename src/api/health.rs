//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::coordinator::CoordinatorStatsSnapshot;
use crate::redis::RedisHealthStatus;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    pub connections: ConnectionHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub status: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub local: usize,
}

#[derive(Debug, Serialize)]
pub struct ClusterHealthResponse {
    pub enabled: bool,
    pub server_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub rooms: RoomStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisStats>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStats {
    pub local_connections: usize,
    pub oldest_connection_secs: i64,
    /// Registry entries across every instance; absent when the registry
    /// could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_connections: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RoomStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_rooms: Option<usize>,
    #[serde(flatten)]
    pub coordinator: CoordinatorStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct RedisStats {
    pub status: String,
    pub connected: bool,
    pub circuit_breaker_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_for_secs: Option<i64>,
    pub failed_connects: u32,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state.start_time.elapsed().as_secs();
    let conn_stats = state.connection_manager.stats();

    let redis = match &state.redis_pool {
        Some(pool) => {
            let connected = match pool.ping().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Redis ping failed during health check");
                    false
                }
            };
            Some(RedisHealthResponse {
                status: pool.health().status().as_str().to_string(),
                connected,
            })
        }
        None => None,
    };

    let rooms = state.coordinator.rooms();
    let store_available = match rooms.room_count().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Room store unavailable during health check");
            false
        }
    };

    let cluster = if state.settings.cluster.enabled {
        Some(ClusterHealthResponse {
            enabled: true,
            server_id: state.settings.cluster.server_id.clone(),
        })
    } else {
        None
    };

    let redis_ok = redis.as_ref().map(|r| r.connected).unwrap_or(true);
    let status = if store_available && redis_ok {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        store: StoreHealthResponse {
            backend: rooms.backend_type().as_str().to_string(),
            available: store_available,
        },
        redis,
        connections: ConnectionHealthResponse {
            local: conn_stats.local_connections,
        },
        cluster,
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let conn_stats = state.connection_manager.stats();
    let coordinator = &state.coordinator;

    let active_rooms = coordinator.rooms().room_count().await.ok();
    let registered_connections = coordinator.registry().connection_count().await.ok();

    let redis = state.redis_pool.as_ref().map(|pool| {
        let health = pool.health().snapshot();
        RedisStats {
            status: health.status.as_str().to_string(),
            connected: health.status == RedisHealthStatus::Healthy,
            circuit_breaker_state: pool.circuit_state().as_str().to_string(),
            connected_for_secs: health.connected_for_secs,
            failed_connects: health.failed_connects,
        }
    });

    Json(StatsResponse {
        connections: ConnectionStats {
            local_connections: conn_stats.local_connections,
            oldest_connection_secs: conn_stats.oldest_connection_secs,
            registered_connections,
        },
        rooms: RoomStats {
            active_rooms,
            coordinator: coordinator.stats(),
        },
        redis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::coordinator::JoinRequest;
    use crate::websocket::OutboundMessage;
    use tokio::sync::mpsc;

    fn test_state() -> AppState {
        AppState::new(Settings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_health_with_memory_store() {
        let Json(body) = health(State(test_state())).await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.store.backend, "memory");
        assert!(body.store.available);
        assert!(body.redis.is_none());
        assert!(body.cluster.is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_rooms() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel::<OutboundMessage>(8);
        let handle = state.connection_manager.register(tx);

        state
            .coordinator
            .create_or_join(&JoinRequest::create("Alice", handle.id.as_str()))
            .await
            .unwrap();

        let Json(body) = stats(State(state)).await;
        assert_eq!(body.connections.local_connections, 1);
        assert_eq!(body.connections.registered_connections, Some(1));
        assert_eq!(body.rooms.active_rooms, Some(1));
        assert_eq!(body.rooms.coordinator.rooms_created, 1);
    }

    #[test]
    fn test_stats_serialization_flattens_counters() {
        let body = RoomStats {
            active_rooms: Some(2),
            coordinator: CoordinatorStatsSnapshot {
                rooms_created: 3,
                rooms_joined: 4,
                rooms_deleted: 1,
                members_left: 2,
                disconnects: 5,
                failed_requests: 0,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["active_rooms"], 2);
        assert_eq!(value["rooms_created"], 3);
    }
}
