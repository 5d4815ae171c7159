//! Adapts an axum WebSocket onto the relay's transport halves.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt, future};

use crate::core::message::{CloseReason, Outbound, RelayMessage};
use crate::core::transport::{FrameSink, FrameSource, Transport};
use crate::errors::TransportError;

/// Wrap an upgraded client socket as a [`Transport`].
pub fn client_transport(socket: WebSocket) -> Transport {
    let (ws_sink, ws_stream) = socket.split();

    let sink: FrameSink = Box::pin(
        ws_sink
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|outbound: Outbound| future::ready(Ok::<_, TransportError>(to_axum(outbound)))),
    );
    let source: FrameSource = Box::pin(ws_stream.filter_map(|item| {
        future::ready(match item {
            Ok(message) => from_axum(message),
            Err(e) => Some(Err(TransportError::Io(e.to_string()))),
        })
    }));

    Transport::new(sink, source)
}

fn to_axum(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Message(RelayMessage::Text(text)) => Message::Text(text.into()),
        Outbound::Message(RelayMessage::Binary(data)) => Message::Binary(data),
        Outbound::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

/// Ping and pong are answered by axum and never relayed.
fn from_axum(message: Message) -> Option<Result<RelayMessage, TransportError>> {
    match message {
        Message::Text(text) => Some(Ok(RelayMessage::Text(text.as_str().to_owned()))),
        Message::Binary(data) => Some(Ok(RelayMessage::Binary(data))),
        Message::Close(frame) => Some(Err(TransportError::Closed(
            frame.map(|f| CloseReason::new(f.code, f.reason.as_str())),
        ))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_axum_message_mapping() {
        assert_eq!(
            from_axum(Message::Text("hello".into())),
            Some(Ok(RelayMessage::from("hello")))
        );
        assert_eq!(
            from_axum(Message::Binary(Bytes::from_static(&[7]))),
            Some(Ok(RelayMessage::Binary(Bytes::from_static(&[7]))))
        );
        assert_eq!(from_axum(Message::Ping(Bytes::new())), None);
        assert_eq!(
            from_axum(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "bye".into(),
            }))),
            Some(Err(TransportError::Closed(Some(CloseReason::normal("bye")))))
        );
    }

    #[test]
    fn test_close_outbound_to_axum() {
        match to_axum(Outbound::Close(Some(CloseReason::new(1013, "slow consumer")))) {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1013);
                assert_eq!(frame.reason.as_str(), "slow consumer");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
