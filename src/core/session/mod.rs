//! A session pairs one client connection with one upstream connection.
//!
//! The session dials the upstream, runs the two relay directions as spawned
//! tasks and supervises them together with the idle timeout, the lifetime
//! limit and the shutdown token. Whatever ends first ends the session: both
//! directions are cancelled, both transports receive a close frame and the
//! session leaves the registry.

pub mod close;
pub mod relay;
pub mod state;

pub use close::CloseCause;
pub use relay::{DirectionEnd, DirectionReport, run_direction};
pub use state::{Activity, SessionState};

use futures::{SinkExt, StreamExt, stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::message::{CloseReason, Outbound, RelayMessage};
use crate::core::registry::{Registration, SessionHandle, SessionRegistry};
use crate::core::transport::{FrameSink, FrameSource, Transport};
use crate::core::upstream::{RetryPolicy, UpstreamConnection, UpstreamConnector, UpstreamHandle};
use crate::errors::{ConnectError, Direction, RegistryError, SessionError, TransportError};

/// Per-session limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capacity of each direction's outbound queue.
    /// Default: 64
    pub queue_capacity: usize,

    /// Close the session after this long without a message in either
    /// direction.
    /// Default: 60s
    pub idle_timeout: Duration,

    /// Upper bound for cancelling the relay tasks and sending close frames.
    /// Default: 1s
    pub cancel_grace: Duration,

    /// Maximum session lifetime, `None` for unlimited.
    /// Default: 30 minutes
    pub max_lifetime: Option<Duration>,

    /// Upstream dial policy.
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            idle_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(1),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of the dial phase.
enum Dialed {
    Connected {
        upstream: UpstreamHandle,
        buffered: Vec<RelayMessage>,
    },
    Aborted(CloseCause),
}

/// What stopped the supervisor.
enum Trigger {
    Direction(Direction, Result<DirectionReport, JoinError>),
    IdleTimeout,
    LifetimeExceeded,
    Shutdown,
}

/// One client/upstream pairing.
pub struct Session {
    id: String,
    config: SessionConfig,
    state: SessionState,
    activity: Arc<Activity>,
    shutdown: CancellationToken,
    upstream: UpstreamConnection,
    registration: Registration,
}

impl Session {
    /// Register a new session. The registry assigns its id.
    pub fn new(registry: &Arc<SessionRegistry>, config: SessionConfig) -> Result<Self, RegistryError> {
        let activity = Arc::new(Activity::new());
        let shutdown = CancellationToken::new();
        let upstream = UpstreamConnection::new(config.retry.clone());

        let registration = registry.register(SessionHandle {
            shutdown: shutdown.clone(),
            activity: Arc::clone(&activity),
            upstream: upstream.subscribe(),
        })?;

        Ok(Self {
            id: registration.id().to_string(),
            config,
            state: SessionState::Connecting,
            activity,
            shutdown,
            upstream,
            registration,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Token that ends the session when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the session to completion and return why it ended.
    ///
    /// On return both transports have been sent a close frame (where still
    /// possible) and released, and the session is no longer registered.
    pub async fn run(
        mut self,
        client: Transport,
        connector: &dyn UpstreamConnector,
        target: &str,
    ) -> CloseCause {
        info!(session_id = %self.id, "Session started");
        let (client_sink, mut client_source) = client.into_parts();

        let (cause, client_sink, upstream_sink, deadline) =
            match self.dial(&mut client_source, connector, target).await {
                Dialed::Connected { upstream, buffered } => {
                    self.transition(SessionState::Active);
                    if !buffered.is_empty() {
                        debug!(session_id = %self.id, frames = buffered.len(), "Replaying frames received while dialing");
                    }
                    let client_source: FrameSource =
                        Box::pin(stream::iter(buffered.into_iter().map(Ok)).chain(client_source));
                    self.relay(client_sink, client_source, upstream).await
                }
                Dialed::Aborted(cause) => (
                    cause,
                    Some(client_sink),
                    None,
                    Instant::now() + self.config.cancel_grace,
                ),
            };

        self.transition(SessionState::Closing);
        self.close_transports(&cause, client_sink, upstream_sink, deadline)
            .await;
        self.upstream.mark_disconnected();
        self.transition(SessionState::Closed);

        if cause.is_failure() {
            warn!(session_id = %self.id, cause = %cause, "Session closed with error");
        } else {
            info!(session_id = %self.id, cause = %cause, "Session closed");
        }
        cause
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(session_id = %self.id, from = %self.state, to = %next, "Rejected session state transition");
            return;
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "Session state transition");
        self.state = next;
        self.registration.update(next);
    }

    /// Dial the upstream while buffering client frames, so a client that
    /// leaves mid-dial or a shutdown aborts the dial.
    async fn dial(
        &self,
        client_source: &mut FrameSource,
        connector: &dyn UpstreamConnector,
        target: &str,
    ) -> Dialed {
        let cancel = self.shutdown.child_token();
        let dial = self.upstream.connect(connector, target, &cancel);
        tokio::pin!(dial);

        let mut buffered = Vec::new();
        loop {
            tokio::select! {
                result = &mut dial => {
                    return match result {
                        Ok(upstream) => Dialed::Connected { upstream, buffered },
                        Err(ConnectError::Cancelled) => Dialed::Aborted(CloseCause::Shutdown),
                        Err(err) => Dialed::Aborted(CloseCause::Failed(SessionError::Connect(err))),
                    };
                }
                item = client_source.next() => match item {
                    Some(Ok(message)) => {
                        self.activity.touch();
                        if buffered.len() >= self.config.queue_capacity {
                            return Dialed::Aborted(CloseCause::Failed(SessionError::Overload {
                                direction: Direction::ClientToUpstream,
                                capacity: self.config.queue_capacity,
                            }));
                        }
                        buffered.push(message);
                    }
                    Some(Err(TransportError::Closed(reason))) => {
                        return Dialed::Aborted(CloseCause::ClientClosed(reason));
                    }
                    Some(Err(err)) => {
                        return Dialed::Aborted(CloseCause::Failed(SessionError::Transport {
                            side: Direction::ClientToUpstream.source(),
                            source: err,
                        }));
                    }
                    None => return Dialed::Aborted(CloseCause::ClientClosed(None)),
                }
            }
        }
    }

    /// Run both directions until one ends or the supervisor stops them.
    ///
    /// Returns the cause, whichever sinks could be recovered and the teardown
    /// deadline. Stopping the other direction and sending both close frames
    /// all share that one deadline, `cancel_grace` after the session started
    /// ending.
    async fn relay(
        &self,
        client_sink: FrameSink,
        client_source: FrameSource,
        upstream: UpstreamHandle,
    ) -> (CloseCause, Option<FrameSink>, Option<FrameSink>, Instant) {
        let (upstream_sink, upstream_source) = upstream.into_parts();
        let relay_cancel = CancellationToken::new();
        let capacity = self.config.queue_capacity;
        let grace = self.config.cancel_grace;

        // Client frames still queued when the client leaves are dropped, so the
        // upstream close frame is not stuck behind them.
        let mut to_upstream = tokio::spawn(run_direction(
            Direction::ClientToUpstream,
            client_source,
            upstream_sink,
            capacity,
            Duration::ZERO,
            Arc::clone(&self.activity),
            relay_cancel.clone(),
        ));
        let mut to_client = tokio::spawn(run_direction(
            Direction::UpstreamToClient,
            upstream_source,
            client_sink,
            capacity,
            grace,
            Arc::clone(&self.activity),
            relay_cancel.clone(),
        ));

        let trigger = self.supervise(&mut to_upstream, &mut to_client).await;
        relay_cancel.cancel();

        let deadline = match &trigger {
            Trigger::Direction(_, Ok(report)) => report.ended_at + grace,
            _ => Instant::now() + grace,
        };

        let mut pending_upstream = Some(to_upstream);
        let mut pending_client = Some(to_client);
        let mut upstream_sink = None;
        let mut client_sink = None;

        let cause = match trigger {
            Trigger::Direction(direction, result) => {
                let (cause, sink) = direction_cause(direction, result, capacity);
                match direction {
                    Direction::ClientToUpstream => {
                        pending_upstream = None;
                        upstream_sink = sink;
                    }
                    Direction::UpstreamToClient => {
                        pending_client = None;
                        client_sink = sink;
                    }
                }
                cause
            }
            Trigger::IdleTimeout => CloseCause::IdleTimeout,
            Trigger::LifetimeExceeded => CloseCause::LifetimeExceeded,
            Trigger::Shutdown => CloseCause::Shutdown,
        };

        let (upstream_rest, client_rest) = tokio::join!(
            collect(&self.id, pending_upstream, deadline),
            collect(&self.id, pending_client, deadline),
        );

        (
            cause,
            client_sink.or(client_rest),
            upstream_sink.or(upstream_rest),
            deadline,
        )
    }

    /// Wait for whichever ends the session first.
    async fn supervise(
        &self,
        to_upstream: &mut JoinHandle<DirectionReport>,
        to_client: &mut JoinHandle<DirectionReport>,
    ) -> Trigger {
        let lifetime = self.config.max_lifetime.map(|limit| self.activity.started() + limit);

        loop {
            let idle_deadline = self.activity.last() + self.config.idle_timeout;
            tokio::select! {
                result = &mut *to_upstream => return Trigger::Direction(Direction::ClientToUpstream, result),
                result = &mut *to_client => return Trigger::Direction(Direction::UpstreamToClient, result),
                _ = self.shutdown.cancelled() => return Trigger::Shutdown,
                _ = sleep_until_opt(lifetime) => return Trigger::LifetimeExceeded,
                _ = sleep_until(idle_deadline) => {
                    // Activity may have moved the deadline while sleeping.
                    if self.activity.idle_for() >= self.config.idle_timeout {
                        return Trigger::IdleTimeout;
                    }
                }
            }
        }
    }

    /// Send close frames to both sides concurrently, giving up at
    /// `deadline`.
    async fn close_transports(
        &self,
        cause: &CloseCause,
        client_sink: Option<FrameSink>,
        upstream_sink: Option<FrameSink>,
        deadline: Instant,
    ) {
        let (client, upstream) = tokio::join!(
            close_sink(client_sink, cause.client_close(), deadline),
            close_sink(upstream_sink, cause.upstream_close(), deadline),
        );

        if let Err(err) = client {
            debug!(session_id = %self.id, error = %err, "Client close frame not delivered");
        }
        if let Err(err) = upstream {
            debug!(session_id = %self.id, error = %err, "Upstream close frame not delivered");
        }
    }
}

fn direction_cause(
    direction: Direction,
    result: Result<DirectionReport, JoinError>,
    capacity: usize,
) -> (CloseCause, Option<FrameSink>) {
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            let cause = CloseCause::Failed(SessionError::Transport {
                side: direction.source(),
                source: TransportError::Io(format!("relay task failed: {err}")),
            });
            return (cause, None);
        }
    };

    let cause = match report.end {
        DirectionEnd::SourceClosed(reason) => match direction {
            Direction::ClientToUpstream => CloseCause::ClientClosed(reason),
            Direction::UpstreamToClient => CloseCause::UpstreamClosed(reason),
        },
        DirectionEnd::SourceFailed(source) => CloseCause::Failed(SessionError::Transport {
            side: direction.source(),
            source,
        }),
        DirectionEnd::SinkFailed(source) => CloseCause::Failed(SessionError::Transport {
            side: direction.sink(),
            source,
        }),
        DirectionEnd::Overloaded => {
            CloseCause::Failed(SessionError::Overload { direction, capacity })
        }
        // Only the supervisor cancels, and it never reads this report.
        DirectionEnd::Cancelled => CloseCause::Shutdown,
    };
    (cause, Some(report.sink))
}

/// Await a cancelled direction and recover its sink.
async fn collect(
    session_id: &str,
    handle: Option<JoinHandle<DirectionReport>>,
    deadline: Instant,
) -> Option<FrameSink> {
    let mut handle = handle?;
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(report)) => Some(report.sink),
        Ok(Err(err)) => {
            warn!(session_id = %session_id, error = %err, "Relay task failed");
            None
        }
        Err(_) => {
            warn!(session_id = %session_id, "Relay task did not stop in time, aborting");
            handle.abort();
            None
        }
    }
}

async fn close_sink(
    sink: Option<FrameSink>,
    reason: CloseReason,
    deadline: Instant,
) -> Result<(), TransportError> {
    let Some(mut sink) = sink else {
        return Ok(());
    };
    let closing = async {
        sink.send(Outbound::Close(Some(reason))).await?;
        sink.close().await
    };
    match tokio::time::timeout_at(deadline, closing).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Io("close timed out".to_string())),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
