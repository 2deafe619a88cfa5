use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::connection_manager::ConnectionManager;
use crate::coordinator::RoomCoordinator;
use crate::gateway::create_gateway;
use crate::redis::{PoolError, RedisPool};
use crate::registry::create_connection_registry;
use crate::room::create_room_store;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connection_manager: Arc<ConnectionManager>,
    pub coordinator: Arc<RoomCoordinator>,
    /// Present when rooms live in Redis or cluster delivery is enabled
    pub redis_pool: Option<Arc<RedisPool>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, PoolError> {
        let needs_redis = settings.store.backend == "redis" || settings.cluster.enabled;
        let redis_pool = if needs_redis {
            Some(Arc::new(RedisPool::from_config(settings.redis.clone())?))
        } else {
            None
        };

        let connection_manager = Arc::new(ConnectionManager::new());
        let rooms = create_room_store(&settings.store, redis_pool.clone());
        let registry = create_connection_registry(
            &settings.store,
            redis_pool.clone(),
            &settings.cluster.server_id,
        );
        let gateway = create_gateway(
            &settings.cluster,
            connection_manager.clone(),
            redis_pool.clone(),
        );
        let coordinator = Arc::new(RoomCoordinator::new(
            rooms,
            registry,
            gateway,
            settings.rooms.clone(),
        ));

        Ok(Self::with_components(
            settings,
            connection_manager,
            coordinator,
            redis_pool,
        ))
    }

    /// Assemble state from prebuilt parts
    pub fn with_components(
        settings: Settings,
        connection_manager: Arc<ConnectionManager>,
        coordinator: Arc<RoomCoordinator>,
        redis_pool: Option<Arc<RedisPool>>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            connection_manager,
            coordinator,
            redis_pool,
            start_time: Instant::now(),
        }
    }
}
