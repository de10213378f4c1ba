// Core
pub mod hub;
pub mod tasks;
pub mod websocket;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;
