//! WebSocket upstream connector built on tokio-tungstenite.
//!
//! Dials a `ws://` or `wss://` target, attaches the configured credentials and
//! subprotocol, and adapts the split socket onto [`Transport`] halves.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use http::HeaderValue;
use http::header::{HeaderName, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;
use zeroize::Zeroize;

use super::base::{UpstreamConnector, UpstreamHandle};
use crate::core::message::{CloseReason, Outbound, RelayMessage};
use crate::core::transport::{FrameSink, FrameSource, Transport};
use crate::errors::{ConnectError, TransportError};

/// Default header carrying the upstream API key.
pub const DEFAULT_API_KEY_HEADER: &str = "X-Api-Key";

/// Upstream connector that speaks WebSocket.
pub struct WebSocketConnector {
    api_key: Option<String>,
    api_key_header: String,
    subprotocol: Option<String>,
    max_message_size: Option<usize>,
}

impl Drop for WebSocketConnector {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            subprotocol: None,
            max_message_size: None,
        }
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, header: impl Into<String>, key: Option<String>) -> Self {
        self.api_key_header = header.into();
        self.api_key = key;
        self
    }

    pub fn with_subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = Some(max_message_size);
        self
    }

    /// Build the upgrade request for `target`.
    fn build_request(&self, target: &str) -> Result<http::Request<()>, ConnectError> {
        let url = validate_target(target)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::InvalidTarget(e.to_string()))?;

        let headers = request.headers_mut();
        if let Some(key) = &self.api_key {
            let name = HeaderName::from_bytes(self.api_key_header.as_bytes())
                .map_err(|e| ConnectError::InvalidTarget(format!("api key header: {e}")))?;
            let mut value = HeaderValue::from_str(key)
                .map_err(|_| ConnectError::InvalidTarget("api key is not a valid header value".into()))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        if let Some(protocol) = &self.subprotocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| ConnectError::InvalidTarget(format!("subprotocol: {e}")))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        Ok(request)
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self, target: &str) -> Result<UpstreamHandle, ConnectError> {
        let request = self.build_request(target)?;

        let ws_config = self.max_message_size.map(|size| {
            WebSocketConfig::default()
                .max_message_size(Some(size))
                .max_frame_size(Some(size))
        });

        let (ws_stream, response) =
            tokio_tungstenite::connect_async_with_config(request, ws_config, true)
                .await
                .map_err(map_connect_error)?;

        tracing::debug!(status = %response.status(), "Upstream WebSocket handshake completed");

        let (ws_sink, ws_stream) = ws_stream.split();

        let sink: FrameSink = Box::pin(
            ws_sink
                .sink_map_err(TransportError::from)
                .with(|outbound: Outbound| future::ready(Ok::<_, TransportError>(to_ws_message(outbound)))),
        );
        let source: FrameSource = Box::pin(ws_stream.filter_map(|item| future::ready(from_ws_message(item))));

        Ok(Transport::new(sink, source))
    }
}

/// Parse and check a connect target.
pub fn validate_target(target: &str) -> Result<Url, ConnectError> {
    let url = Url::parse(target).map_err(|e| ConnectError::InvalidTarget(format!("{target}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(ConnectError::InvalidTarget(format!(
            "{target}: unsupported scheme '{scheme}', expected ws or wss"
        ))),
    }
}

fn map_connect_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => ConnectError::Rejected {
            status: response.status().as_u16(),
        },
        tungstenite::Error::Url(e) => ConnectError::InvalidTarget(e.to_string()),
        other => ConnectError::Unreachable(other.to_string()),
    }
}

fn to_ws_message(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Message(RelayMessage::Text(text)) => Message::text(text),
        Outbound::Message(RelayMessage::Binary(data)) => Message::binary(data),
        Outbound::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

/// Map an inbound tungstenite item. Control frames are consumed here
/// (tungstenite answers pings itself).
fn from_ws_message(
    item: Result<Message, tungstenite::Error>,
) -> Option<Result<RelayMessage, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(RelayMessage::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => Some(Ok(RelayMessage::Binary(data))),
        Ok(Message::Close(frame)) => Some(Err(TransportError::Closed(frame.map(|f| {
            CloseReason::new(u16::from(f.code), f.reason.as_str())
        })))),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(e) => Some(Err(TransportError::from(e))),
    }
}
