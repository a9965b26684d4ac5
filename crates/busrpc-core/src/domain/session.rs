//! Session Registry - streaming session tracking.
//!
//! Sessions are immutable snapshots. Every mutation builds a new snapshot and
//! swaps it in under the map's entry lock, so readers never observe a
//! partially updated session.

use crate::domain::error::{RpcError, RpcResult};
use busrpc_types::{CorrelationId, ResponseEnvelope, SenderId, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Callback receiving incremental responses of a bidirectional session.
pub type ResponseCallback = Arc<dyn Fn(ResponseEnvelope) + Send + Sync>;

/// Snapshot of one streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSession {
    session_id: SessionId,
    owner: SenderId,
    end_correlation_id: CorrelationId,
    created_at: Instant,
    last_activity: Instant,
    message_count: u64,
    active: bool,
}

impl StreamingSession {
    /// A fresh, active session with no messages.
    pub fn new(session_id: SessionId, owner: SenderId, end_correlation_id: CorrelationId) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            owner,
            end_correlation_id,
            created_at: now,
            last_activity: now,
            message_count: 0,
            active: true,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn owner(&self) -> &SenderId {
        &self.owner
    }

    /// Correlation id reserved for the end-of-stream response.
    pub fn end_correlation_id(&self) -> CorrelationId {
        self.end_correlation_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    fn with_activity(&self) -> Self {
        Self {
            last_activity: Instant::now(),
            message_count: self.message_count + 1,
            ..self.clone()
        }
    }

    fn deactivated(&self) -> Self {
        Self {
            last_activity: Instant::now(),
            active: false,
            ..self.clone()
        }
    }
}

/// Thread-safe registry of streaming sessions and their response callbacks.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<StreamingSession>>,
    handlers: DashMap<SessionId, ResponseCallback>,
    /// Registered sessions plus in-flight reservations
    count: AtomicUsize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Fails if its id is already present.
    pub fn register(&self, session: StreamingSession) -> RpcResult<Arc<StreamingSession>> {
        self.count.fetch_add(1, Ordering::AcqRel);
        self.insert(session)
    }

    /// Register a session only while fewer than `max_sessions` exist.
    pub fn register_bounded(
        &self,
        session: StreamingSession,
        max_sessions: usize,
    ) -> RpcResult<Arc<StreamingSession>> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < max_sessions).then_some(count + 1)
            })
            .map_err(|_| RpcError::TooManySessions {
                limit: max_sessions,
            })?;
        self.insert(session)
    }

    fn insert(&self, session: StreamingSession) -> RpcResult<Arc<StreamingSession>> {
        let id = session.session_id();
        match self.sessions.entry(id) {
            Entry::Occupied(_) => {
                self.count.fetch_sub(1, Ordering::AcqRel);
                Err(RpcError::SessionExists(id))
            }
            Entry::Vacant(slot) => {
                let snapshot = Arc::new(session);
                slot.insert(snapshot.clone());
                debug!(session_id = %id, "Registered streaming session");
                Ok(snapshot)
            }
        }
    }

    pub fn get(&self, id: SessionId) -> RpcResult<Arc<StreamingSession>> {
        self.sessions
            .get(&id)
            .map(|slot| slot.value().clone())
            .ok_or(RpcError::SessionNotFound(id))
    }

    /// Like `get`, but also fails for deactivated sessions.
    pub fn get_active(&self, id: SessionId) -> RpcResult<Arc<StreamingSession>> {
        let session = self.get(id)?;
        if !session.is_active() {
            return Err(RpcError::SessionInactive(id));
        }
        Ok(session)
    }

    /// Count one more message and refresh the activity timestamp.
    pub fn record_activity(&self, id: SessionId) -> RpcResult<Arc<StreamingSession>> {
        self.replace_active(id, StreamingSession::with_activity)
    }

    /// Mark the session inactive. Fails if it is missing or already inactive.
    pub fn deactivate(&self, id: SessionId) -> RpcResult<Arc<StreamingSession>> {
        self.replace_active(id, StreamingSession::deactivated)
    }

    fn replace_active(
        &self,
        id: SessionId,
        next: impl FnOnce(&StreamingSession) -> StreamingSession,
    ) -> RpcResult<Arc<StreamingSession>> {
        let mut slot = self
            .sessions
            .get_mut(&id)
            .ok_or(RpcError::SessionNotFound(id))?;
        if !slot.is_active() {
            return Err(RpcError::SessionInactive(id));
        }
        let current: &StreamingSession = slot.value().as_ref();
        let updated = Arc::new(next(current));
        *slot.value_mut() = updated.clone();
        Ok(updated)
    }

    /// Remove a session and its response callback.
    ///
    /// The session goes first: handler registration holds the session entry,
    /// so no callback can be stored after this point.
    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        self.handlers.remove(&id);
        if removed {
            self.count.fetch_sub(1, Ordering::AcqRel);
            debug!(session_id = %id, "Removed streaming session");
        }
        removed
    }

    /// Evict every session idle for longer than `max_idle`.
    ///
    /// Returns the number of sessions removed.
    pub fn remove_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();

        self.sessions.retain(|id, session| {
            if session.idle_for(now) > max_idle {
                evicted.push(*id);
                false
            } else {
                true
            }
        });

        for id in &evicted {
            self.handlers.remove(id);
            self.count.fetch_sub(1, Ordering::AcqRel);
            info!(session_id = %id, max_idle_ms = max_idle.as_millis() as u64, "Evicted idle session");
        }
        evicted.len()
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|slot| slot.value().is_active())
            .count()
    }

    /// Registered sessions, active or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session and callback. Returns the number of sessions removed.
    pub fn clear(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|slot| *slot.key()).collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    /// Register or replace the callback of a registered session.
    pub fn register_response_handler(
        &self,
        id: SessionId,
        handler: ResponseCallback,
    ) -> RpcResult<()> {
        let _session = self.sessions.get(&id).ok_or(RpcError::SessionNotFound(id))?;
        self.handlers.insert(id, handler);
        Ok(())
    }

    /// Register `handler` unless one is already present. Returns true if stored.
    ///
    /// Fails with `SessionNotFound` once the session is gone.
    pub fn register_response_handler_if_absent(
        &self,
        id: SessionId,
        handler: ResponseCallback,
    ) -> RpcResult<bool> {
        // Held until the callback is stored, so `remove` cannot interleave.
        let _session = self.sessions.get(&id).ok_or(RpcError::SessionNotFound(id))?;
        match self.handlers.entry(id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(true)
            }
        }
    }

    pub fn response_handler(&self, id: SessionId) -> Option<ResponseCallback> {
        self.handlers.get(&id).map(|slot| slot.value().clone())
    }

    pub fn remove_response_handler(&self, id: SessionId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn has_response_handler(&self, id: SessionId) -> bool {
        self.handlers.contains_key(&id)
    }
}
