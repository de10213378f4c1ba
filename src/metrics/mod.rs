//! Prometheus metrics for the connection hub.
//!
//! - Connection metrics (active connections, opened, closed by reason)
//! - Delivery metrics (broadcasts, enqueued messages by target)
//! - Liveness metrics (probe outcomes)
//! - Inbound message counts

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, DeliveryMetrics, ProbeMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "wshub";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of records currently in the registry
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of registered WebSocket connections"
    ).unwrap();

    /// WebSocket connections accepted
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections registered"
    ).unwrap();

    /// Connections removed from the registry, by reason
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total connections removed from the registry",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Broadcast rounds processed by the coordinator
    pub static ref BROADCASTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Total broadcast rounds"
    ).unwrap();

    /// Messages placed on outbound queues, by target type
    pub static ref MESSAGES_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_enqueued_total", METRIC_PREFIX),
        "Total messages placed on client outbound queues",
        &["target"]
    ).unwrap();

    /// Frames received from clients
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total data frames received from clients"
    ).unwrap();

    // ============================================================================
    // Liveness Metrics
    // ============================================================================

    /// Liveness probes by outcome
    pub static ref PROBES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_probes_total", METRIC_PREFIX),
        "Total liveness probes sent to idle connections",
        &["outcome"]
    ).unwrap();
}
