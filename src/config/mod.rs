mod settings;

pub use settings::{
    ClusterConfig, OtelConfig, RedisConfig, RoomConfig, ServerConfig, Settings, StoreConfig,
    WebSocketConfig,
};
