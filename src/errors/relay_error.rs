//! Error taxonomy for the relay core.
//!
//! Every error here is session-local: it ends at most one session and is
//! reported to the client as a WebSocket close code.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::core::message::{CloseReason, close_code};

// =============================================================================
// Upstream dialing
// =============================================================================

/// Errors that can occur while dialing the upstream service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectError {
    /// Target is not a usable ws:// or wss:// URL
    #[error("Invalid upstream target: {0}")]
    InvalidTarget(String),

    /// TCP/TLS level failure (refused, reset, DNS)
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    /// Upstream answered the upgrade with a non-101 status
    #[error("Upstream rejected handshake with status {status}")]
    Rejected { status: u16 },

    /// A single dial attempt exceeded the connect timeout
    #[error("Upstream connect timed out after {0:?}")]
    Timeout(Duration),

    /// All attempts failed
    #[error("Upstream unreachable after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ConnectError>,
    },

    /// Dial abandoned because the session is shutting down
    #[error("Upstream dial cancelled")]
    Cancelled,
}

impl ConnectError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectError::Unreachable(_) | ConnectError::Rejected { .. } | ConnectError::Timeout(_)
        )
    }
}

// =============================================================================
// Established transports
// =============================================================================

/// Read/write failures on an established connection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The peer closed the connection. Returned by `receive` on remote close
    /// and by `send` once the transport is closed.
    #[error("Connection closed{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<CloseReason>),

    /// Any other I/O or protocol failure
    #[error("Transport failure: {0}")]
    Io(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => TransportError::Closed(None),
            other => TransportError::Io(other.to_string()),
        }
    }
}

// =============================================================================
// Session-level errors
// =============================================================================

/// Which end of a session a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Upstream => write!(f, "upstream"),
        }
    }
}

/// Relay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    /// The side frames are read from.
    pub fn source(self) -> Side {
        match self {
            Direction::ClientToUpstream => Side::Client,
            Direction::UpstreamToClient => Side::Upstream,
        }
    }

    /// The side frames are written to.
    pub fn sink(self) -> Side {
        match self {
            Direction::ClientToUpstream => Side::Upstream,
            Direction::UpstreamToClient => Side::Client,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source(), self.sink())
    }
}

/// Errors that terminate a session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("{side} transport error: {source}")]
    Transport {
        side: Side,
        #[source]
        source: TransportError,
    },

    /// Malformed handshake, rejected before a session exists
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A bounded relay queue overflowed
    #[error("Slow consumer on {direction}: relay queue of {capacity} messages is full")]
    Overload { direction: Direction, capacity: usize },
}

impl SessionError {
    /// Close code reported to the client.
    pub fn close_code(&self) -> u16 {
        match self {
            SessionError::Connect(_) | SessionError::Transport { .. } => {
                close_code::UPSTREAM_UNAVAILABLE
            }
            SessionError::Protocol(_) => close_code::PROTOCOL_ERROR,
            SessionError::Overload { .. } => close_code::SLOW_CONSUMER,
        }
    }
}

/// Errors raised by the session registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The shutdown sweep has run; no new sessions are admitted
    #[error("Session registry is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_retryable() {
        assert!(ConnectError::Unreachable("refused".into()).is_retryable());
        assert!(ConnectError::Rejected { status: 403 }.is_retryable());
        assert!(ConnectError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ConnectError::InvalidTarget("ftp://x".into()).is_retryable());
        assert!(!ConnectError::Cancelled.is_retryable());
    }

    #[test]
    fn test_session_error_close_codes() {
        let connect = SessionError::from(ConnectError::Cancelled);
        let overload = SessionError::Overload {
            direction: Direction::UpstreamToClient,
            capacity: 64,
        };
        let protocol = SessionError::Protocol("missing subprotocol".into());

        assert_eq!(connect.close_code(), 1011);
        assert_eq!(overload.close_code(), 1013);
        assert_eq!(protocol.close_code(), 1002);
    }

    #[test]
    fn test_transport_closed_display() {
        let closed = TransportError::Closed(Some(CloseReason::normal("done")));
        assert_eq!(closed.to_string(), "Connection closed: 1000 (done)");
        assert_eq!(TransportError::Closed(None).to_string(), "Connection closed");
    }

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::ClientToUpstream.source(), Side::Client);
        assert_eq!(Direction::ClientToUpstream.sink(), Side::Upstream);
        assert_eq!(Direction::UpstreamToClient.to_string(), "upstream->client");
    }
}
