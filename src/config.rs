//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::net::codec::{DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};

/// Largest frame size the configuration accepts (64 MiB)
pub const MAX_FRAME_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name used in logs and the management API
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Address every listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Replication port (TCP)
    #[serde(default = "default_game_port")]
    pub game_port: u16,

    /// WebSocket port for browser clients
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,

    /// Whether the WebSocket listener is started
    #[serde(default)]
    pub websocket_enabled: bool,

    /// Management API port
    #[serde(default = "default_management_port")]
    pub management_port: u16,

    /// Whether the management API is started
    #[serde(default = "default_true")]
    pub api_enabled: bool,

    /// Largest frame a client may send, in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Size of a single socket read, in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Connections silent for this long are closed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Maximum simultaneous connections from one IP
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,

    /// Type names the server accepts. Empty disables type id validation.
    #[serde(default)]
    pub replicated_types: Vec<String>,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

// Default value functions
fn default_server_name() -> String {
    "netrep".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_game_port() -> u16 {
    43600
}

fn default_websocket_port() -> u16 {
    43601
}

fn default_management_port() -> u16 {
    43602
}

fn default_true() -> bool {
    true
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_read_buffer_size() -> usize {
    8 * 1024
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_max_connections_per_ip() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            bind_address: default_bind_address(),
            game_port: default_game_port(),
            websocket_port: default_websocket_port(),
            websocket_enabled: false,
            management_port: default_management_port(),
            api_enabled: default_true(),
            max_frame_size: default_max_frame_size(),
            read_buffer_size: default_read_buffer_size(),
            idle_timeout_secs: default_idle_timeout(),
            max_connections_per_ip: default_max_connections_per_ip(),
            replicated_types: Vec::new(),
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("NETREP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration document
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = var("NETREP_SERVER_NAME") {
            self.server_name = val;
        }
        if let Some(val) = var("NETREP_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Some(port) = var("NETREP_GAME_PORT").and_then(|v| v.parse().ok()) {
            self.game_port = port;
        }
        if let Some(port) = var("NETREP_WEBSOCKET_PORT").and_then(|v| v.parse().ok()) {
            self.websocket_port = port;
        }
        if let Some(val) = var("NETREP_WEBSOCKET_ENABLED") {
            self.websocket_enabled = parse_flag(&val);
        }
        if let Some(port) = var("NETREP_MANAGEMENT_PORT").and_then(|v| v.parse().ok()) {
            self.management_port = port;
        }
        if let Some(val) = var("NETREP_API_ENABLED") {
            self.api_enabled = parse_flag(&val);
        }
        if let Some(size) = var("NETREP_MAX_FRAME_SIZE").and_then(|v| v.parse().ok()) {
            self.max_frame_size = size;
        }
        if let Some(secs) = var("NETREP_IDLE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.idle_timeout_secs = secs;
        }
        if let Some(val) = var("NETREP_REPLICATED_TYPES") {
            self.replicated_types = val
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(val) = var("NETREP_DEBUG") {
            self.debug = parse_flag(&val);
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.game_port == self.websocket_port {
            anyhow::bail!("Game port and WebSocket port must be different");
        }
        if self.game_port == self.management_port || self.websocket_port == self.management_port {
            anyhow::bail!("Management port must be different from game and WebSocket ports");
        }

        if self.max_frame_size < HEADER_SIZE || self.max_frame_size > MAX_FRAME_SIZE_LIMIT {
            anyhow::bail!(
                "Max frame size must be between {} and {} bytes",
                HEADER_SIZE,
                MAX_FRAME_SIZE_LIMIT
            );
        }

        if self.read_buffer_size == 0 {
            anyhow::bail!("Read buffer size must be greater than zero");
        }

        if self.idle_timeout_secs == 0 {
            anyhow::bail!("Idle timeout must be at least one second");
        }

        Ok(())
    }

    /// Address of the replication listener
    pub fn game_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.game_port)
    }

    /// Address of the WebSocket listener
    pub fn websocket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.websocket_port)
    }

    /// Address of the management API
    pub fn management_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.management_port)
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Connection settings for a replication client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host
    #[serde(default = "default_client_host")]
    pub host: String,

    /// Server replication port
    #[serde(default = "default_game_port")]
    pub port: u16,

    /// Largest reply accepted from the server, in bytes. Unset accepts any
    /// size, which is what joining a large section needs.
    #[serde(default)]
    pub max_frame_size: Option<usize>,

    /// Size of a single socket read, in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            port: default_game_port(),
            max_frame_size: None,
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl ClientConfig {
    /// `host:port` of the server
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
