//! Frames carried across the relay.
//!
//! Both transports (the client socket handled by axum and the upstream socket
//! dialed with tokio-tungstenite) are mapped onto these types so the relay
//! core never sees a library-specific message enum.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// WebSocket close codes used by the gateway.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Gateway is shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// Handshake or framing rejected.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Upstream unreachable or failed mid-session.
    pub const UPSTREAM_UNAVAILABLE: u16 = 1011;
    /// A relay queue overflowed.
    pub const SLOW_CONSUMER: u16 = 1013;
}

/// A data frame relayed verbatim between client and upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Text(String),
    Binary(Bytes),
}

impl RelayMessage {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            RelayMessage::Text(text) => text.len(),
            RelayMessage::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Text(_) => "text",
            RelayMessage::Binary(_) => "binary",
        }
    }
}

impl From<String> for RelayMessage {
    fn from(text: String) -> Self {
        RelayMessage::Text(text)
    }
}

impl From<&str> for RelayMessage {
    fn from(text: &str) -> Self {
        RelayMessage::Text(text.to_string())
    }
}

impl From<Bytes> for RelayMessage {
    fn from(data: Bytes) -> Self {
        RelayMessage::Binary(data)
    }
}

/// Close code and reason, as carried by a WebSocket close frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(close_code::NORMAL, reason)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Anything a relay can write to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(RelayMessage),
    Close(Option<CloseReason>),
}

impl From<RelayMessage> for Outbound {
    fn from(message: RelayMessage) -> Self {
        Outbound::Message(message)
    }
}
