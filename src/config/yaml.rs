use serde::Deserialize;
use std::path::Path;

use crate::errors::{ConfigError, ConfigResult};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8000
///   shutdown_grace_secs: 5
///
/// upstream:
///   url: "wss://api.heygen.com/v1/streaming"
///   api_key: "your-api-key"
///   api_key_header: "X-Api-Key"
///   subprotocol: "heygen.v1"
///   connect_timeout_ms: 3000
///
/// retry:
///   base_delay_ms: 200
///   max_delay_ms: 5000
///   max_attempts: 3
///
/// relay:
///   queue_capacity: 64
///   idle_timeout_secs: 60
///   cancel_grace_ms: 1000
///   max_session_secs: 1800
///   max_message_bytes: 10485760
///
/// security:
///   client_subprotocol: "heygen.v1"
///   cors_allowed_origins: "*"
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub retry: Option<RetryYaml>,
    pub relay: Option<RelayYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Seconds to wait for sessions to close on shutdown
    pub shutdown_grace_secs: Option<u64>,
}

/// Upstream target and credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_header: Option<String>,
    pub subprotocol: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

/// Upstream dial retry policy from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RetryYaml {
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

/// Relay limits from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub queue_capacity: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
    pub cancel_grace_ms: Option<u64>,
    /// 0 disables the lifetime limit
    pub max_session_secs: Option<u64>,
    pub max_message_bytes: Option<usize>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// Subprotocol clients must offer on `/ws/heygen`
    pub client_subprotocol: Option<String>,
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;

        Ok(config)
    }
}
