//! Base trait and connection state for upstream connectors.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::core::transport::Transport;
use crate::errors::ConnectError;

/// An established upstream connection.
///
/// `send`, `receive` and `close` come from [`Transport`].
pub type UpstreamHandle = Transport;

/// Dials the upstream service.
///
/// Implementations perform a single attempt; retries and backoff are applied
/// by [`super::UpstreamConnection`].
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, target: &str) -> Result<UpstreamHandle, ConnectError>;
}

/// Shared connector handle.
pub type BoxedConnector = Arc<dyn UpstreamConnector>;

/// Connection state of an upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not dialed yet, or released after teardown
    #[default]
    Disconnected,
    /// Dial or backoff in progress
    Connecting,
    /// Handshake completed
    Connected,
    /// Gave up after exhausting attempts
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// State plus retry bookkeeping, published on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UpstreamStatus {
    pub state: ConnectionState,
    /// Failed attempts in the current dial
    pub retries: u32,
}
