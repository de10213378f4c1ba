//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCASTS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    MESSAGES_ENQUEUED_TOTAL, MESSAGES_RECEIVED_TOTAL, PROBES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording registry metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
    }

    pub fn record_closed(reason: &str) {
        CONNECTIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn set_active(count: usize) {
        CONNECTIONS_ACTIVE.set(count as i64);
    }
}

/// Helper struct for recording delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record one broadcast round and the number of queues it reached
    pub fn record_broadcast(delivered: usize) {
        BROADCASTS_TOTAL.inc();
        MESSAGES_ENQUEUED_TOTAL
            .with_label_values(&["broadcast"])
            .inc_by(delivered as u64);
    }

    pub fn record_direct() {
        MESSAGES_ENQUEUED_TOTAL.with_label_values(&["direct"]).inc();
    }

    pub fn record_received() {
        MESSAGES_RECEIVED_TOTAL.inc();
    }
}

/// Helper struct for recording liveness probe metrics
pub struct ProbeMetrics;

impl ProbeMetrics {
    pub fn record_ok() {
        PROBES_TOTAL.with_label_values(&["ok"]).inc();
    }

    pub fn record_failed() {
        PROBES_TOTAL.with_label_values(&["failed"]).inc();
    }

    pub fn record_timeout() {
        PROBES_TOTAL.with_label_values(&["timeout"]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        ConnectionMetrics::record_opened();
        ProbeMetrics::record_ok();

        let output = encode_metrics().unwrap();
        assert!(output.contains("wshub_connections_opened_total"));
        assert!(output.contains("wshub_probes_total"));
    }
}
