//! Shared application state.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::ServerConfig;
use crate::core::registry::SessionRegistry;
use crate::core::upstream::{BoxedConnector, WebSocketConnector};

/// Reasons a new WebSocket connection is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP connection limit reached")]
    PerIpLimitReached,
}

/// State shared by every route.
pub struct AppState {
    pub config: ServerConfig,
    /// Live sessions, for introspection and the shutdown sweep
    pub registry: Arc<SessionRegistry>,
    /// Dials the upstream for each new session
    pub connector: BoxedConnector,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
    started_at: Instant,
}

impl AppState {
    /// Build state with the WebSocket upstream connector described by
    /// `config`.
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let connector = WebSocketConnector::new()
            .with_api_key(
                config.upstream_api_key_header.clone(),
                config.upstream_api_key.clone(),
            )
            .with_subprotocol(config.upstream_subprotocol.clone())
            .with_max_message_size(config.relay_max_message_bytes);

        Self::with_connector(config, Arc::new(connector))
    }

    /// Build state around a custom connector.
    pub fn with_connector(config: ServerConfig, connector: BoxedConnector) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            connector,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
            started_at: Instant::now(),
        })
    }

    /// Reserve a connection slot for `ip`.
    ///
    /// The slot is released when the returned permit (and every clone of it)
    /// is dropped.
    pub fn try_acquire_connection(
        self: &Arc<Self>,
        ip: IpAddr,
    ) -> Result<ConnectionPermit, ConnectionLimitError> {
        let global_limit = self.config.max_websocket_connections;
        self.ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| match global_limit {
                Some(limit) if current >= limit => None,
                _ => Some(current + 1),
            })
            .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;

        {
            let mut count = self.ip_connections.entry(ip).or_insert(0);
            if *count >= self.config.max_connections_per_ip {
                drop(count);
                self.ws_connections.fetch_sub(1, Ordering::SeqCst);
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                return Err(ConnectionLimitError::PerIpLimitReached);
            }
            *count += 1;
        }

        Ok(ConnectionPermit {
            inner: Arc::new(PermitInner {
                state: Arc::clone(self),
                ip,
            }),
        })
    }

    /// Return a slot taken by `try_acquire_connection`.
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });

        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// A reserved connection slot. Cloneable so it can travel as a request
/// extension; the slot is released when the last clone drops.
#[derive(Clone)]
pub struct ConnectionPermit {
    inner: Arc<PermitInner>,
}

impl ConnectionPermit {
    pub fn ip(&self) -> IpAddr {
        self.inner.ip
    }
}

impl std::fmt::Debug for ConnectionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPermit")
            .field("ip", &self.inner.ip)
            .finish()
    }
}

struct PermitInner {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for PermitInner {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}
