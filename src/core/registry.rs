//! Registry of live sessions.
//!
//! The registry is the only structure shared across sessions. It holds a
//! read-only snapshot of each session plus the session's shutdown token, which
//! is the single hook used to end sessions from outside (the shutdown sweep).
//!
//! Backed by DashMap for concurrent single-key upserts and removals.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::session::{Activity, SessionState};
use crate::core::upstream::{ConnectionState, UpstreamStatus};
use crate::errors::RegistryError;

/// What a session hands to the registry when it registers.
pub struct SessionHandle {
    /// Cancelled by [`SessionRegistry::shutdown_all`]
    pub shutdown: CancellationToken,
    pub activity: Arc<Activity>,
    pub upstream: watch::Receiver<UpstreamStatus>,
}

struct RegistryEntry {
    seq: u64,
    state: SessionState,
    connected_at: OffsetDateTime,
    handle: SessionHandle,
}

/// Introspection snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub state: SessionState,
    pub upstream: ConnectionState,
    pub upstream_retries: u32,
    /// RFC 3339
    pub connected_at: String,
    pub idle_ms: u64,
}

/// Concurrent map of active sessions keyed by session id.
pub struct SessionRegistry {
    sessions: DashMap<String, RegistryEntry>,
    next_seq: AtomicU64,
    /// Set by `shutdown_all`; no session registers afterwards
    closing: AtomicBool,
    emptied: Notify,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_seq: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            emptied: Notify::new(),
        }
    }

    /// Register a session under a freshly assigned id.
    ///
    /// Ids are chosen here and never accepted from callers, so an id that
    /// has been removed cannot come back. The returned guard unregisters the
    /// session when dropped. Fails once `shutdown_all` has run.
    pub fn register(self: &Arc<Self>, handle: SessionHandle) -> Result<Registration, RegistryError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(RegistryError::ShuttingDown);
        }

        let id = loop {
            let id = Uuid::new_v4().to_string();
            match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    vacant.insert(RegistryEntry {
                        seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                        state: SessionState::Connecting,
                        connected_at: OffsetDateTime::now_utc(),
                        handle,
                    });
                    break id;
                }
            }
        };

        let registration = Registration {
            registry: Arc::clone(self),
            id,
        };
        // A sweep that started while inserting may have missed this entry.
        if self.closing.load(Ordering::SeqCst) {
            return Err(RegistryError::ShuttingDown);
        }
        debug!(session_id = %registration.id, "Session registered");
        Ok(registration)
    }

    /// Whether `shutdown_all` has run.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Remove a session. Returns whether it was present.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "Session unregistered");
        }
        if self.sessions.is_empty() {
            self.emptied.notify_waiters();
        }
        removed
    }

    /// Record a lifecycle transition.
    pub fn update(&self, id: &str, state: SessionState) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all sessions in registration order.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut entries: Vec<(u64, SessionSummary)> = self
            .sessions
            .iter()
            .map(|entry| (entry.seq, summarize(entry.key(), entry.value())))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, summary)| summary).collect()
    }

    pub fn get(&self, id: &str) -> Option<SessionSummary> {
        self.sessions
            .get(id)
            .map(|entry| summarize(entry.key(), entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Signal every registered session to shut down and refuse new
    /// registrations. Returns how many sessions were signalled.
    pub fn shutdown_all(&self) -> usize {
        self.closing.store(true, Ordering::SeqCst);
        let mut signalled = 0;
        for entry in self.sessions.iter() {
            if !entry.handle.shutdown.is_cancelled() {
                entry.handle.shutdown.cancel();
                signalled += 1;
            }
        }
        info!(sessions = signalled, "Shutdown signalled to active sessions");
        signalled
    }

    /// Wait until the registry is empty. Returns `false` if `timeout`
    /// elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.emptied.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.sessions.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

fn summarize(id: &str, entry: &RegistryEntry) -> SessionSummary {
    let upstream = *entry.handle.upstream.borrow();
    SessionSummary {
        id: id.to_string(),
        state: entry.state,
        upstream: upstream.state,
        upstream_retries: upstream.retries,
        connected_at: entry.connected_at.format(&Rfc3339).unwrap_or_default(),
        idle_ms: entry.handle.activity.idle_for().as_millis() as u64,
    }
}

/// Registration guard. Unregisters the session on drop.
pub struct Registration {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl Registration {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn update(&self, state: SessionState) {
        self.registry.update(&self.id, state);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}
