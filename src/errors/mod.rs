//! Error types shared across the gateway.

pub mod config_error;
pub mod relay_error;

pub use config_error::{ConfigError, ConfigResult};
pub use relay_error::{ConnectError, Direction, RegistryError, SessionError, Side, TransportError};
