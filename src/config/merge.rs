//! Layering of YAML, environment and default values.

use super::ServerConfig;
use super::env::EnvConfig;
use super::yaml::YamlConfig;
use crate::errors::ConfigResult;

/// Build a `ServerConfig` from environment variables, with optional YAML
/// overrides on top.
///
/// Priority (highest to lowest): YAML, environment, defaults.
pub fn merge_config(yaml: Option<YamlConfig>) -> ConfigResult<ServerConfig> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let upstream = yaml.upstream.unwrap_or_default();
    let retry = yaml.retry.unwrap_or_default();
    let relay = yaml.relay.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let mut config = ServerConfig::default();

    if let Some(host) = server.host.or(env.host) {
        config.host = host;
    }
    if let Some(port) = server.port.or(env.port) {
        config.port = port;
    }
    if let Some(secs) = server.shutdown_grace_secs.or(env.shutdown_grace_secs) {
        config.shutdown_grace_secs = secs;
    }

    if let Some(url) = upstream.url.or(env.upstream_url) {
        config.upstream_url = url;
    }
    config.upstream_api_key = upstream.api_key.or(env.upstream_api_key);
    if let Some(header) = upstream.api_key_header.or(env.upstream_api_key_header) {
        config.upstream_api_key_header = header;
    }
    config.upstream_subprotocol = upstream.subprotocol.or(env.upstream_subprotocol);
    if let Some(ms) = upstream
        .connect_timeout_ms
        .or(env.upstream_connect_timeout_ms)
    {
        config.upstream_connect_timeout_ms = ms;
    }

    if let Some(ms) = retry.base_delay_ms.or(env.retry_base_delay_ms) {
        config.retry_base_delay_ms = ms;
    }
    if let Some(ms) = retry.max_delay_ms.or(env.retry_max_delay_ms) {
        config.retry_max_delay_ms = ms;
    }
    if let Some(attempts) = retry.max_attempts.or(env.retry_max_attempts) {
        config.retry_max_attempts = attempts;
    }

    if let Some(capacity) = relay.queue_capacity.or(env.relay_queue_capacity) {
        config.relay_queue_capacity = capacity;
    }
    if let Some(secs) = relay.idle_timeout_secs.or(env.relay_idle_timeout_secs) {
        config.relay_idle_timeout_secs = secs;
    }
    if let Some(ms) = relay.cancel_grace_ms.or(env.relay_cancel_grace_ms) {
        config.relay_cancel_grace_ms = ms;
    }
    if let Some(secs) = relay.max_session_secs.or(env.relay_max_session_secs) {
        config.relay_max_session_secs = secs;
    }
    if let Some(bytes) = relay.max_message_bytes.or(env.relay_max_message_bytes) {
        config.relay_max_message_bytes = bytes;
    }

    config.client_subprotocol = security.client_subprotocol.or(env.client_subprotocol);
    config.cors_allowed_origins = security.cors_allowed_origins.or(env.cors_allowed_origins);
    config.max_websocket_connections = security
        .max_websocket_connections
        .or(env.max_websocket_connections);
    if let Some(limit) = security.max_connections_per_ip.or(env.max_connections_per_ip) {
        config.max_connections_per_ip = limit;
    }

    Ok(config)
}
