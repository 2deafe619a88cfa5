//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONDITIONAL_RETRIES_TOTAL, MESSAGES_DELIVERED_TOTAL, MESSAGES_FAILED_TOTAL,
    MESSAGES_ROUTED_TOTAL, MESSAGES_SENT_TOTAL, ROOMS_CREATED_TOTAL, ROOMS_DELETED_TOTAL,
    ROOM_CODE_COLLISIONS_TOTAL, ROOM_JOINS_TOTAL, ROOM_LEAVES_TOTAL, ROOM_REQUEST_FAILURES_TOTAL,
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
    WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct RoomMetrics;

impl RoomMetrics {
    pub fn record_created() {
        ROOMS_CREATED_TOTAL.inc();
    }

    pub fn record_code_collision() {
        ROOM_CODE_COLLISIONS_TOTAL.inc();
    }

    pub fn record_joined() {
        ROOM_JOINS_TOTAL.inc();
    }

    pub fn record_failure(reason: &str) {
        ROOM_REQUEST_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_member_removed() {
        ROOM_LEAVES_TOTAL.with_label_values(&["removed"]).inc();
    }

    pub fn record_room_deleted() {
        ROOMS_DELETED_TOTAL.inc();
        ROOM_LEAVES_TOTAL.with_label_values(&["room_deleted"]).inc();
    }

    pub fn record_leave_noop() {
        ROOM_LEAVES_TOTAL.with_label_values(&["noop"]).inc();
    }

    pub fn record_conditional_retry() {
        CONDITIONAL_RETRIES_TOTAL.inc();
    }
}

pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_sent(kind: &str) {
        MESSAGES_SENT_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_outcome(delivered: usize, failed: usize, routed: usize) {
        MESSAGES_DELIVERED_TOTAL.inc_by(delivered as u64);
        MESSAGES_FAILED_TOTAL.inc_by(failed as u64);
        MESSAGES_ROUTED_TOTAL.inc_by(routed as u64);
    }
}

pub struct WsMetrics;

impl WsMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
        WS_CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        WS_CONNECTIONS_ACTIVE.dec();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_message(kind: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[kind]).inc();
    }
}
