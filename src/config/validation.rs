use super::ServerConfig;
use crate::core::upstream::validate_target;
use crate::errors::{ConfigError, ConfigResult};

/// Validate the upstream URL: it must be present and use ws:// or wss://.
pub fn validate_upstream_url(url: &str) -> ConfigResult<()> {
    if url.trim().is_empty() {
        return Err(ConfigError::Missing("UPSTREAM_URL"));
    }
    validate_target(url).map_err(|e| ConfigError::InvalidValue {
        key: "UPSTREAM_URL".to_string(),
        value: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Validate relay and retry limits that must be non-zero.
pub fn validate_limits(config: &ServerConfig) -> ConfigResult<()> {
    if config.relay_queue_capacity == 0 {
        return Err(ConfigError::Invalid(
            "relay queue capacity must be greater than 0".to_string(),
        ));
    }
    if config.retry_max_attempts == 0 {
        return Err(ConfigError::Invalid(
            "upstream retry attempts must be greater than 0".to_string(),
        ));
    }
    if config.relay_idle_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "relay idle timeout must be greater than 0".to_string(),
        ));
    }
    if config.relay_cancel_grace_ms == 0 {
        return Err(ConfigError::Invalid(
            "relay cancel grace must be greater than 0".to_string(),
        ));
    }
    if config.retry_base_delay_ms > config.retry_max_delay_ms {
        return Err(ConfigError::Invalid(format!(
            "retry base delay ({}ms) exceeds max delay ({}ms)",
            config.retry_base_delay_ms, config.retry_max_delay_ms
        )));
    }
    Ok(())
}

/// Run every validation on a merged configuration.
pub fn validate(config: &ServerConfig) -> ConfigResult<()> {
    validate_upstream_url(&config.upstream_url)?;
    validate_limits(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.upstream_url = "ws://localhost:9000/stream".to_string();
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_upstream_url() {
        let err = validate(&ServerConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("UPSTREAM_URL")));
    }

    #[test]
    fn test_non_websocket_upstream_url() {
        let err = validate_upstream_url("https://api.heygen.com").unwrap_err();
        assert!(err.to_string().contains("UPSTREAM_URL"));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = valid_config();
        config.relay_queue_capacity = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.retry_max_attempts = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.relay_idle_timeout_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_cancel_grace_rejected() {
        let mut config = valid_config();
        config.relay_cancel_grace_ms = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("cancel grace"));
    }

    #[test]
    fn test_base_delay_above_max_rejected() {
        let mut config = valid_config();
        config.retry_base_delay_ms = 10_000;
        config.retry_max_delay_ms = 5_000;
        assert!(validate(&config).is_err());
    }
}
