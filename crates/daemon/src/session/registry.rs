//! Process-wide table of live sessions.
//!
//! The registry only holds weak references: it can enumerate sessions and
//! ask them to detach, but it never keeps one alive. Each entry is removed by
//! the session that created it, as the last step of its detach.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;

use super::broker::{ConnectionId, DetachReason, Session, SessionId, SessionState, WeakSession};

/// Errors that can occur when registering a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection already owns a live session.
    #[error("connection {0} already has an active session")]
    DuplicateConnection(ConnectionId),

    /// A session with this ID is already registered.
    #[error("session {0} is already registered")]
    DuplicateSession(SessionId),
}

/// Snapshot of one live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Unique session identifier.
    pub id: SessionId,
    /// Identity of the attached connection.
    pub connection: ConnectionId,
    /// Target the session was opened for, as `namespace/pod/container`.
    pub target: String,
    /// Command line of the attached process.
    pub command: String,
    /// Process ID of the attached process.
    pub pid: Option<u32>,
    /// Current terminal rows.
    pub rows: u16,
    /// Current terminal columns.
    pub cols: u16,
    /// Creation time in Unix milliseconds.
    pub created_at: u64,
    /// Current state.
    pub state: SessionState,
}

struct RegistryEntry {
    connection: ConnectionId,
    session: WeakSession,
}

#[derive(Default)]
struct RegistryInner {
    sessions: DashMap<SessionId, RegistryEntry>,
    connections: DashMap<ConnectionId, SessionId>,
}

/// Thread-safe registry of live sessions, cheap to clone.
///
/// Map operations lock one shard for the duration of the operation only;
/// nothing is held across an await.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session.
    ///
    /// Fails if its connection already owns a live session. An index entry
    /// left behind by a session that no longer exists is replaced.
    pub fn register(&self, session: &Session) -> Result<(), RegistryError> {
        let id = session.id().clone();
        let connection = session.connection().clone();

        if self.inner.sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id));
        }

        match self.inner.connections.entry(connection.clone()) {
            Entry::Occupied(mut occupied) => {
                if self.is_live(occupied.get()) {
                    return Err(RegistryError::DuplicateConnection(connection));
                }
                tracing::debug!(connection = %connection, "Replacing stale connection entry");
                occupied.insert(id.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(id.clone());
            }
        }

        self.inner.sessions.insert(
            id,
            RegistryEntry {
                connection,
                session: session.downgrade(),
            },
        );
        Ok(())
    }

    /// Removes a session. Returns `false` if it was not registered.
    pub fn unregister(&self, id: &SessionId) -> bool {
        let Some((_, entry)) = self.inner.sessions.remove(id) else {
            return false;
        };
        self.inner
            .connections
            .remove_if(&entry.connection, |_, owner| owner == id);
        true
    }

    /// Returns the live session with the given ID.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.inner
            .sessions
            .get(id)
            .and_then(|entry| entry.session.upgrade())
    }

    /// Returns whether the connection currently owns a live session.
    pub fn contains_connection(&self, connection: &ConnectionId) -> bool {
        self.inner
            .connections
            .get(connection)
            .map(|id| self.is_live(id.value()))
            .unwrap_or(false)
    }

    /// Lists sessions that have not terminated, oldest first.
    pub fn list_active(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions()
            .into_iter()
            .filter(|session| session.state() != SessionState::Terminated)
            .map(|session| session.summary())
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Detaches every registered session and waits for all of them.
    pub async fn shutdown_all(&self) {
        let sessions = self.sessions();
        if sessions.is_empty() {
            return;
        }

        tracing::info!(count = sessions.len(), "Detaching all sessions");
        join_all(
            sessions
                .iter()
                .map(|session| session.detach(DetachReason::Shutdown)),
        )
        .await;
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Returns whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    fn sessions(&self) -> Vec<Session> {
        self.inner
            .sessions
            .iter()
            .filter_map(|entry| entry.session.upgrade())
            .collect()
    }

    fn is_live(&self, id: &SessionId) -> bool {
        self.inner
            .sessions
            .get(id)
            .and_then(|entry| entry.session.upgrade())
            .is_some()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
