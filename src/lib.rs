// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;

// Room coordination
pub mod connection_manager;
pub mod coordinator;
pub mod gateway;
pub mod registry;
pub mod room;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
