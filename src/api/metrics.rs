//! Scrape endpoint for the hub's Prometheus registry.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics
///
/// Connection gauges, closures by reason, broadcast and delivery counters and
/// probe outcomes, all under the `wshub_` prefix.
pub async fn prometheus_metrics() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], body),
        Err(e) => {
            tracing::error!(error = %e, "Could not encode hub metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                "metrics unavailable".to_string(),
            )
        }
    }
}
