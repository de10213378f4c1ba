use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::triggers::{broadcast_message, send_message};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Message triggers
        .nest(
            "/api/v1",
            Router::new()
                // Broadcast
                .route("/broadcast", post(broadcast_message))
                // Point-to-point
                .route("/users/{uid}/messages", post(send_message)),
        )
}
