//! Configuration module for the HeyGen gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use heygen_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use validation::validate;
pub use yaml::YamlConfig;

use crate::core::session::SessionConfig;
use crate::core::upstream::{DEFAULT_API_KEY_HEADER, RetryPolicy};
use crate::errors::ConfigResult;

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, shutdown grace)
/// - Upstream target, credentials and dial policy
/// - Relay limits (queue capacity, idle timeout, session lifetime)
/// - Security settings (client subprotocol, CORS, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Seconds to wait for sessions to close during shutdown
    /// Default: 5
    pub shutdown_grace_secs: u64,

    // Upstream settings
    /// ws:// or wss:// URL of the streaming-avatar service
    pub upstream_url: String,
    pub upstream_api_key: Option<String>,
    /// Header carrying `upstream_api_key`
    /// Default: X-Api-Key
    pub upstream_api_key_header: String,
    /// Subprotocol requested from the upstream
    pub upstream_subprotocol: Option<String>,
    /// Default: 3000
    pub upstream_connect_timeout_ms: u64,

    // Retry policy
    /// Default: 200
    pub retry_base_delay_ms: u64,
    /// Default: 5000
    pub retry_max_delay_ms: u64,
    /// Total dial attempts
    /// Default: 3
    pub retry_max_attempts: u32,

    // Relay limits
    /// Default: 64
    pub relay_queue_capacity: usize,
    /// Default: 60
    pub relay_idle_timeout_secs: u64,
    /// Default: 1000
    pub relay_cancel_grace_ms: u64,
    /// 0 disables the limit
    /// Default: 1800
    pub relay_max_session_secs: u64,
    /// Default: 10 MiB
    pub relay_max_message_bytes: usize,

    // Security configuration
    /// Subprotocol clients must offer; `None` accepts any handshake
    pub client_subprotocol: Option<String>,
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            shutdown_grace_secs: 5,
            upstream_url: String::new(),
            upstream_api_key: None,
            upstream_api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            upstream_subprotocol: None,
            upstream_connect_timeout_ms: 3000,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5000,
            retry_max_attempts: 3,
            relay_queue_capacity: 64,
            relay_idle_timeout_secs: 60,
            relay_cancel_grace_ms: 1000,
            relay_max_session_secs: 30 * 60,
            relay_max_message_bytes: 10 * 1024 * 1024,
            client_subprotocol: None,
            cors_allowed_origins: None,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

/// Zeroize the upstream API key when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.upstream_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// The .env file is loaded in main.rs at application startup, so its
    /// values are visible here as environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_attempts: self.retry_max_attempts,
            connect_timeout: Duration::from_millis(self.upstream_connect_timeout_ms),
        }
    }

    /// Per-session limits derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            queue_capacity: self.relay_queue_capacity,
            idle_timeout: Duration::from_secs(self.relay_idle_timeout_secs),
            cancel_grace: Duration::from_millis(self.relay_cancel_grace_ms),
            max_lifetime: (self.relay_max_session_secs > 0)
                .then(|| Duration::from_secs(self.relay_max_session_secs)),
            retry: self.retry_policy(),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
