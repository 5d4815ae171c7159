//! One relay direction: a reader and a writer joined by a bounded queue.
//!
//! The reader never blocks on the writer. When the queue is full the
//! direction stops with [`DirectionEnd::Overloaded`] instead of buffering
//! further, so a stalled consumer cannot grow memory past `capacity`.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::state::Activity;
use crate::core::message::{CloseReason, Outbound, RelayMessage};
use crate::core::transport::{FrameSink, FrameSource};
use crate::errors::{Direction, TransportError};

/// How a relay direction stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectionEnd {
    /// Source sent a close frame or ended
    SourceClosed(Option<CloseReason>),
    /// Reading from the source failed
    SourceFailed(TransportError),
    /// Writing to the sink failed
    SinkFailed(TransportError),
    /// The bounded queue overflowed
    Overloaded,
    /// Stopped by the session
    Cancelled,
}

/// Result of a finished direction. The sink is handed back so the session
/// can send its close frame.
pub struct DirectionReport {
    pub direction: Direction,
    pub end: DirectionEnd,
    pub forwarded: u64,
    pub sink: FrameSink,
    /// When the source or the sink stopped, before any draining
    pub ended_at: Instant,
}

/// Relay frames from `source` to `sink` until either side ends or `cancel`
/// fires.
///
/// Frames already queued when the source closes are flushed for at most
/// `drain_grace`; with a zero grace they are dropped unless the sink takes
/// them at once.
pub async fn run_direction(
    direction: Direction,
    mut source: FrameSource,
    sink: FrameSink,
    capacity: usize,
    drain_grace: Duration,
    activity: Arc<Activity>,
    cancel: CancellationToken,
) -> DirectionReport {
    let (queue_tx, queue_rx) = mpsc::channel(capacity);
    let stop = cancel.child_token();
    let mut writer = Box::pin(write_loop(direction, sink, queue_rx, stop.clone()));

    let end = tokio::select! {
        end = read_loop(direction, &mut source, queue_tx, &activity, &stop) => end,
        (sink, failure, forwarded) = &mut writer => {
            let ended_at = Instant::now();
            stop.cancel();
            let end = match failure {
                Some(err) => DirectionEnd::SinkFailed(err),
                None => DirectionEnd::Cancelled,
            };
            debug!(%direction, ?end, forwarded, "Relay direction stopped by writer");
            return DirectionReport { direction, end, forwarded, sink, ended_at };
        }
    };
    let ended_at = Instant::now();

    if matches!(end, DirectionEnd::Overloaded | DirectionEnd::Cancelled) {
        stop.cancel();
    }

    let (sink, failure, forwarded) = match tokio::time::timeout(drain_grace, &mut writer).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(%direction, "Drain grace elapsed, dropping queued frames");
            stop.cancel();
            writer.await
        }
    };
    if let Some(err) = failure {
        debug!(%direction, error = %err, "Sink failed while draining");
    }

    debug!(%direction, ?end, forwarded, "Relay direction stopped");
    DirectionReport {
        direction,
        end,
        forwarded,
        sink,
        ended_at,
    }
}

async fn read_loop(
    direction: Direction,
    source: &mut FrameSource,
    queue: mpsc::Sender<RelayMessage>,
    activity: &Activity,
    stop: &CancellationToken,
) -> DirectionEnd {
    loop {
        let item = tokio::select! {
            biased;
            _ = stop.cancelled() => return DirectionEnd::Cancelled,
            item = source.next() => item,
        };

        match item {
            Some(Ok(message)) => {
                activity.touch();
                trace!(%direction, kind = message.kind(), len = message.len(), "Frame received");
                match queue.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => return DirectionEnd::Overloaded,
                    Err(TrySendError::Closed(_)) => return DirectionEnd::Cancelled,
                }
            }
            Some(Err(TransportError::Closed(reason))) => return DirectionEnd::SourceClosed(reason),
            Some(Err(err)) => return DirectionEnd::SourceFailed(err),
            None => return DirectionEnd::SourceClosed(None),
        }
    }
}

async fn write_loop(
    direction: Direction,
    mut sink: FrameSink,
    mut queue: mpsc::Receiver<RelayMessage>,
    stop: CancellationToken,
) -> (FrameSink, Option<TransportError>, u64) {
    let mut forwarded = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            message = queue.recv() => message,
        };
        let Some(message) = next else {
            return (sink, None, forwarded);
        };

        let sent = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            result = sink.send(Outbound::Message(message)) => Some(result),
        };
        match sent {
            None => return (sink, None, forwarded),
            Some(Err(err)) => return (sink, Some(err), forwarded),
            Some(Ok(())) => {
                forwarded += 1;
                trace!(%direction, forwarded, "Frame forwarded");
            }
        }
    }
}
