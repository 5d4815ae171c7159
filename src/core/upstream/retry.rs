//! Bounded retry with exponential backoff for upstream dials.

use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::base::{ConnectionState, UpstreamConnector, UpstreamHandle, UpstreamStatus};
use crate::errors::ConnectError;

/// Retry policy for dialing the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    /// Default: 200ms
    pub base_delay: Duration,

    /// Upper bound for any single backoff delay.
    /// Default: 5s
    pub max_delay: Duration,

    /// Total dial attempts before failing permanently.
    /// Default: 3
    pub max_attempts: u32,

    /// Timeout applied to each individual attempt.
    /// Default: 3s
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sum of all backoff delays for a fully failed dial.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|n| self.delay_for(n)).sum()
    }
}

/// Upstream link owned by one session.
///
/// Dials through an [`UpstreamConnector`] and publishes every state change on
/// a watch channel.
pub struct UpstreamConnection {
    policy: RetryPolicy,
    status: watch::Sender<UpstreamStatus>,
}

impl UpstreamConnection {
    pub fn new(policy: RetryPolicy) -> Self {
        let (status, _) = watch::channel(UpstreamStatus::default());
        Self { policy, status }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn status(&self) -> UpstreamStatus {
        *self.status.borrow()
    }

    /// Receive state-change notifications.
    pub fn subscribe(&self) -> watch::Receiver<UpstreamStatus> {
        self.status.subscribe()
    }

    /// Record that the transport has been released.
    pub fn mark_disconnected(&self) {
        self.status.send_modify(|status| status.state = ConnectionState::Disconnected);
    }

    fn publish(&self, state: ConnectionState, retries: u32) {
        self.status.send_replace(UpstreamStatus { state, retries });
    }

    /// Dial `target`, retrying retryable failures with backoff.
    ///
    /// Returns `ConnectError::Cancelled` as soon as `cancel` fires, whether
    /// an attempt or a backoff sleep is in flight.
    pub async fn connect(
        &self,
        connector: &dyn UpstreamConnector,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<UpstreamHandle, ConnectError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.publish(ConnectionState::Connecting, attempt - 1);
            debug!(attempt, max_attempts = self.policy.max_attempts, "Dialing upstream");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ConnectError::Cancelled),
                result = tokio::time::timeout(self.policy.connect_timeout, connector.connect(target)) => {
                    result.unwrap_or(Err(ConnectError::Timeout(self.policy.connect_timeout)))
                }
            };

            let err = match result {
                Ok(handle) => {
                    self.publish(ConnectionState::Connected, attempt - 1);
                    info!(attempt, "Connected to upstream");
                    return Ok(handle);
                }
                Err(err) => err,
            };

            if err == ConnectError::Cancelled {
                self.publish(ConnectionState::Disconnected, attempt - 1);
                return Err(err);
            }

            if !err.is_retryable() {
                warn!(error = %err, "Upstream dial failed permanently");
                self.publish(ConnectionState::Failed, attempt);
                return Err(err);
            }

            if !self.policy.should_retry(attempt) {
                warn!(
                    attempts = attempt,
                    error = %err,
                    "Upstream dial attempts exhausted"
                );
                self.publish(ConnectionState::Failed, attempt);
                return Err(ConnectError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Upstream dial failed, backing off"
            );
            self.publish(ConnectionState::Connecting, attempt);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.publish(ConnectionState::Disconnected, attempt);
                    return Err(ConnectError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
