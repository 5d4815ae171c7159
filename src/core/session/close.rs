//! Why a session ended, and the close frames that follow from it.

use std::fmt;

use crate::core::message::{CloseReason, close_code};
use crate::errors::{SessionError, Side};

/// Close frame reasons are limited to 123 bytes on the wire.
const MAX_REASON_BYTES: usize = 123;

/// The event that ended a session.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseCause {
    /// Client sent a close frame or disconnected
    ClientClosed(Option<CloseReason>),
    /// Upstream sent a close frame or disconnected
    UpstreamClosed(Option<CloseReason>),
    /// No message in either direction for the idle timeout
    IdleTimeout,
    /// Maximum session lifetime reached
    LifetimeExceeded,
    /// Gateway shutdown sweep
    Shutdown,
    Failed(SessionError),
}

impl CloseCause {
    /// Close frame sent to the client.
    pub fn client_close(&self) -> CloseReason {
        match self {
            CloseCause::ClientClosed(_) => CloseReason::normal(""),
            CloseCause::UpstreamClosed(_) => CloseReason::normal("upstream closed"),
            CloseCause::IdleTimeout => CloseReason::normal("idle timeout"),
            CloseCause::LifetimeExceeded => CloseReason::normal("session lifetime exceeded"),
            CloseCause::Shutdown => CloseReason::new(close_code::GOING_AWAY, "server shutting down"),
            CloseCause::Failed(err) => CloseReason::new(err.close_code(), truncate(&err.to_string())),
        }
    }

    /// Close frame sent to the upstream.
    pub fn upstream_close(&self) -> CloseReason {
        match self {
            CloseCause::ClientClosed(_) => CloseReason::normal("client closed"),
            CloseCause::UpstreamClosed(_) => CloseReason::normal(""),
            CloseCause::Failed(SessionError::Overload { .. }) => {
                CloseReason::new(close_code::SLOW_CONSUMER, "slow consumer")
            }
            CloseCause::Failed(SessionError::Transport {
                side: Side::Client, ..
            }) => CloseReason::normal("client disconnected"),
            CloseCause::Failed(_) => {
                CloseReason::new(close_code::UPSTREAM_UNAVAILABLE, "gateway error")
            }
            other => other.client_close(),
        }
    }

    /// Whether the session ended because of an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, CloseCause::Failed(_))
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::ClientClosed(_) => write!(f, "client closed"),
            CloseCause::UpstreamClosed(_) => write!(f, "upstream closed"),
            CloseCause::IdleTimeout => write!(f, "idle timeout"),
            CloseCause::LifetimeExceeded => write!(f, "lifetime exceeded"),
            CloseCause::Shutdown => write!(f, "shutdown"),
            CloseCause::Failed(err) => write!(f, "{err}"),
        }
    }
}

fn truncate(reason: &str) -> String {
    if reason.len() <= MAX_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConnectError, Direction, TransportError};

    #[test]
    fn test_client_close_codes() {
        let refused = CloseCause::Failed(SessionError::Connect(ConnectError::Exhausted {
            attempts: 3,
            last: Box::new(ConnectError::Unreachable("refused".into())),
        }));
        let overload = CloseCause::Failed(SessionError::Overload {
            direction: Direction::ClientToUpstream,
            capacity: 64,
        });

        assert_eq!(refused.client_close().code, 1011);
        assert_eq!(overload.client_close().code, 1013);
        assert_eq!(CloseCause::Shutdown.client_close().code, 1001);
        assert_eq!(CloseCause::IdleTimeout.client_close().code, 1000);
        assert_eq!(CloseCause::UpstreamClosed(None).client_close().code, 1000);
    }

    #[test]
    fn test_upstream_close_codes() {
        let overload = CloseCause::Failed(SessionError::Overload {
            direction: Direction::UpstreamToClient,
            capacity: 64,
        });
        let client_gone = CloseCause::Failed(SessionError::Transport {
            side: Side::Client,
            source: TransportError::Io("reset".into()),
        });

        assert_eq!(overload.upstream_close().code, 1013);
        assert_eq!(client_gone.upstream_close().code, 1000);
        assert_eq!(CloseCause::Shutdown.upstream_close().code, 1001);
        assert_eq!(CloseCause::ClientClosed(None).upstream_close().code, 1000);
    }

    #[test]
    fn test_long_reason_truncated_on_char_boundary() {
        let long = "é".repeat(100);
        let truncated = truncate(&long);
        assert!(truncated.len() <= MAX_REASON_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
