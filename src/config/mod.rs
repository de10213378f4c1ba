mod settings;

pub use settings::{HubConfig, LogFormat, LoggingConfig, ServerConfig, Settings, WebSocketConfig};
