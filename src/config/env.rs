//! Environment variable loading.

use std::env;
use std::str::FromStr;

use crate::errors::{ConfigError, ConfigResult};

/// Settings read from environment variables. `None` means unset.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub shutdown_grace_secs: Option<u64>,

    pub upstream_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub upstream_api_key_header: Option<String>,
    pub upstream_subprotocol: Option<String>,
    pub upstream_connect_timeout_ms: Option<u64>,

    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub retry_max_attempts: Option<u32>,

    pub relay_queue_capacity: Option<usize>,
    pub relay_idle_timeout_secs: Option<u64>,
    pub relay_cancel_grace_ms: Option<u64>,
    pub relay_max_session_secs: Option<u64>,
    pub relay_max_message_bytes: Option<usize>,

    pub client_subprotocol: Option<String>,
    pub cors_allowed_origins: Option<String>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl EnvConfig {
    /// Read every supported variable.
    ///
    /// `UPSTREAM_URL` and `UPSTREAM_API_KEY` fall back to `HEYGEN_API_URL`
    /// and `HEYGEN_API_KEY`.
    pub fn load() -> ConfigResult<Self> {
        Ok(Self {
            host: string("HOST"),
            port: parsed("PORT")?,
            shutdown_grace_secs: parsed("SHUTDOWN_GRACE_SECS")?,

            upstream_url: string("UPSTREAM_URL").or_else(|| string("HEYGEN_API_URL")),
            upstream_api_key: string("UPSTREAM_API_KEY").or_else(|| string("HEYGEN_API_KEY")),
            upstream_api_key_header: string("UPSTREAM_API_KEY_HEADER"),
            upstream_subprotocol: string("UPSTREAM_SUBPROTOCOL"),
            upstream_connect_timeout_ms: parsed("UPSTREAM_CONNECT_TIMEOUT_MS")?,

            retry_base_delay_ms: parsed("UPSTREAM_RETRY_BASE_MS")?,
            retry_max_delay_ms: parsed("UPSTREAM_RETRY_MAX_MS")?,
            retry_max_attempts: parsed("UPSTREAM_RETRY_ATTEMPTS")?,

            relay_queue_capacity: parsed("RELAY_QUEUE_CAPACITY")?,
            relay_idle_timeout_secs: parsed("RELAY_IDLE_TIMEOUT_SECS")?,
            relay_cancel_grace_ms: parsed("RELAY_CANCEL_GRACE_MS")?,
            relay_max_session_secs: parsed("RELAY_MAX_SESSION_SECS")?,
            relay_max_message_bytes: parsed("RELAY_MAX_MESSAGE_BYTES")?,

            client_subprotocol: string("CLIENT_SUBPROTOCOL"),
            cors_allowed_origins: string("CORS_ALLOWED_ORIGINS"),
            max_websocket_connections: parsed("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: parsed("MAX_CONNECTIONS_PER_IP")?,
        })
    }
}

/// Non-empty, trimmed value of `key`.
fn string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed<T>(key: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match string(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}
