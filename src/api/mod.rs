//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod routes;
mod triggers;

pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use triggers::{broadcast_message, send_message};
