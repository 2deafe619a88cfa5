//! Prometheus metrics for the room service.
//!
//! - Room lifecycle (created, deleted, joins, leaves, failures)
//! - Conditional-write contention on room records
//! - Delivery outcomes for broadcasts and confirmations
//! - WebSocket connection lifecycle
//! - Redis connection and circuit breaker state

mod helpers;

pub use helpers::{encode_metrics, DeliveryMetrics, RoomMetrics, WsMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "pwf";

lazy_static! {
    // ============================================================================
    // Room Metrics
    // ============================================================================

    pub static ref ROOMS_CREATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_rooms_created_total", METRIC_PREFIX),
        "Total rooms created"
    ).unwrap();

    pub static ref ROOMS_DELETED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_rooms_deleted_total", METRIC_PREFIX),
        "Total rooms deleted after their last member left"
    ).unwrap();

    pub static ref ROOM_CODE_COLLISIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_room_code_collisions_total", METRIC_PREFIX),
        "Generated room codes that were already taken"
    ).unwrap();

    pub static ref ROOM_JOINS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_room_joins_total", METRIC_PREFIX),
        "Total successful joins of existing rooms"
    ).unwrap();

    /// Failed create/join requests by reason
    pub static ref ROOM_REQUEST_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_room_request_failures_total", METRIC_PREFIX),
        "Failed create/join requests",
        &["reason"]
    ).unwrap();

    /// Members leaving rooms by outcome (removed, room_deleted, noop)
    pub static ref ROOM_LEAVES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_room_leaves_total", METRIC_PREFIX),
        "Leave/disconnect handling outcomes",
        &["outcome"]
    ).unwrap();

    pub static ref CONDITIONAL_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_conditional_retries_total", METRIC_PREFIX),
        "Room mutations retried after losing a version race"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Notifications sent by kind",
        &["kind"]
    ).unwrap();

    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Notifications handed to a local connection"
    ).unwrap();

    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Notifications that could not be delivered"
    ).unwrap();

    pub static ref MESSAGES_ROUTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_routed_total", METRIC_PREFIX),
        "Notifications published for sockets held by other instances"
    ).unwrap();

    // ============================================================================
    // WebSocket Metrics
    // ============================================================================

    pub static ref WS_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_ws_connections_active", METRIC_PREFIX),
        "WebSocket connections currently held by this instance"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Client frames received by type",
        &["type"]
    ).unwrap();

    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Redis Metrics
    // ============================================================================

    /// 1 = connected, 0 = disconnected
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// 0 = closed, 1 = open, 2 = half-open
    pub static ref REDIS_CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_redis_circuit_breaker_state", METRIC_PREFIX),
        "Redis circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();
}
