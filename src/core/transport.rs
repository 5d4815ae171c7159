//! Transport halves shared by the client and upstream sides of a session.
//!
//! A transport is a boxed `Sink<Outbound>` paired with a boxed `Stream` of
//! inbound frames. Remote close is surfaced on the stream as
//! `Err(TransportError::Closed(..))`; end-of-stream without a close frame is
//! treated the same way.

use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;

use crate::core::message::{CloseReason, Outbound, RelayMessage};
use crate::errors::TransportError;

/// Write half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Outbound, Error = TransportError> + Send>>;

/// Read half of a transport.
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<RelayMessage, TransportError>> + Send>>;

/// A connected, bidirectional message transport.
pub struct Transport {
    pub sink: FrameSink,
    pub source: FrameSource,
}

impl Transport {
    pub fn new(sink: FrameSink, source: FrameSource) -> Self {
        Self { sink, source }
    }

    /// Send one message. Fails with `TransportError::Closed` once the
    /// transport is closed.
    pub async fn send(&mut self, message: RelayMessage) -> Result<(), TransportError> {
        self.sink.send(Outbound::Message(message)).await
    }

    /// Wait for the next inbound message.
    pub async fn receive(&mut self) -> Result<RelayMessage, TransportError> {
        match self.source.next().await {
            Some(item) => item,
            None => Err(TransportError::Closed(None)),
        }
    }

    /// Send a close frame and shut the write half.
    pub async fn close(&mut self, reason: Option<CloseReason>) -> Result<(), TransportError> {
        self.sink.send(Outbound::Close(reason)).await?;
        self.sink.close().await
    }

    pub fn into_parts(self) -> (FrameSink, FrameSource) {
        (self.sink, self.source)
    }
}

/// Far end of an in-memory transport.
pub struct TransportPeer {
    /// Frames injected here are read from the transport's source.
    pub inbound: mpsc::Sender<Result<RelayMessage, TransportError>>,
    /// Frames written to the transport's sink arrive here.
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Build a transport backed by bounded in-memory channels.
///
/// The outbound channel applies backpressure once `capacity` frames are
/// unread, which makes it a stand-in for a stalled consumer.
pub fn in_memory(capacity: usize) -> (Transport, TransportPeer) {
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

    let sink: FrameSink = Box::pin(outbound_tx.sink_map_err(|_| TransportError::Closed(None)));
    let source: FrameSource = Box::pin(inbound_rx);

    (
        Transport::new(sink, source),
        TransportPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_send_receive() {
        let (mut transport, mut peer) = in_memory(8);

        transport.send(RelayMessage::from("ping")).await.unwrap();
        assert_eq!(
            peer.outbound.next().await,
            Some(Outbound::Message(RelayMessage::from("ping")))
        );

        peer.inbound.send(Ok(RelayMessage::from("pong"))).await.unwrap();
        assert_eq!(transport.receive().await.unwrap(), RelayMessage::from("pong"));
    }

    #[tokio::test]
    async fn test_receive_after_peer_drop_is_closed() {
        let (mut transport, peer) = in_memory(8);
        drop(peer);

        assert_eq!(
            transport.receive().await,
            Err(TransportError::Closed(None))
        );
        assert_eq!(
            transport.send(RelayMessage::from("late")).await,
            Err(TransportError::Closed(None))
        );
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let (mut transport, mut peer) = in_memory(8);

        transport
            .close(Some(CloseReason::normal("bye")))
            .await
            .unwrap();

        assert_eq!(
            peer.outbound.next().await,
            Some(Outbound::Close(Some(CloseReason::normal("bye"))))
        );
        assert_eq!(peer.outbound.next().await, None);
    }
}
