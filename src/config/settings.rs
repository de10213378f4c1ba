use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum request body accepted by the HTTP trigger endpoints
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Largest inbound frame accepted from a peer, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Capacity of each client's outbound queue
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
    /// Liveness interval in seconds (idle threshold and tick period)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// How long a single ping may take before the client is evicted, in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HubConfig {
    /// Capacity of the coordinator's command queue
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Maximum wait for queue capacity on a point-to-point send
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_size() -> usize {
    64 * 1024
}

fn default_max_message_size() -> usize {
    512
}

fn default_send_buffer() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_command_buffer() -> usize {
    1024
}

fn default_send_timeout_ms() -> u64 {
    5000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("websocket.max_message_size", default_max_message_size() as i64)?
            .set_default("websocket.send_buffer", default_send_buffer() as i64)?
            .set_default("websocket.heartbeat_interval", default_heartbeat_interval() as i64)?
            .set_default("websocket.probe_timeout", default_probe_timeout() as i64)?
            .set_default("hub.command_buffer", default_command_buffer() as i64)?
            .set_default("hub.send_timeout_ms", default_send_timeout_ms() as i64)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // WSHUB_SERVER__PORT, WSHUB_HUB__COMMAND_BUFFER, WSHUB_LOGGING__FORMAT, etc.
            .add_source(
                Environment::with_prefix("WSHUB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make every connection or the hub unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("websocket.send_buffer", self.websocket.send_buffer as u64),
            ("websocket.max_message_size", self.websocket.max_message_size as u64),
            ("websocket.heartbeat_interval", self.websocket.heartbeat_interval),
            ("websocket.probe_timeout", self.websocket.probe_timeout),
            ("hub.command_buffer", self.hub.command_buffer as u64),
        ];

        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::Message(format!("{} must be greater than zero", key)));
            }
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            send_buffer: default_send_buffer(),
            heartbeat_interval: default_heartbeat_interval(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}
