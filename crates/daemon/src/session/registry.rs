//! Concurrent session table keyed by `(connection, session id)`.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};

use super::pty::{Session, SessionError, SessionKey, SessionStatus};
use crate::transport::ConnectionId;

/// Snapshot of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Client-chosen session ID.
    pub id: String,
    /// Owning connection.
    pub owner: ConnectionId,
    /// Process ID of the shell.
    pub pid: Option<u32>,
    /// Current terminal width.
    pub cols: u16,
    /// Current terminal height.
    pub rows: u16,
    /// Lifecycle state at snapshot time.
    pub status: SessionStatus,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        let (cols, rows) = session.size();
        Self {
            id: session.id().clone(),
            owner: session.owner().clone(),
            pid: session.pid(),
            cols,
            rows,
            status: session.status(),
        }
    }
}

/// Holds a key in the pending set until dropped.
///
/// While a reservation exists no other start for the same key can proceed,
/// so a duplicate request never spawns a second process.
#[derive(Debug)]
pub struct Reservation<'a> {
    registry: &'a SessionRegistry,
    key: SessionKey,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.pending.remove(&self.key);
    }
}

/// Registry of live sessions.
///
/// A session is visible here from registration until termination removes it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<Session>>,
    pending: DashSet<SessionKey>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key` for a start in progress.
    ///
    /// Fails with `AlreadyExists` if the key is live or already claimed.
    pub fn reserve(&self, key: &SessionKey) -> Result<Reservation<'_>, SessionError> {
        if !self.pending.insert(key.clone()) {
            return Err(SessionError::AlreadyExists(key.id.clone()));
        }
        let reservation = Reservation {
            registry: self,
            key: key.clone(),
        };

        // Checked after inserting so a concurrent create cannot slip between.
        if self.sessions.contains_key(key) {
            return Err(SessionError::AlreadyExists(key.id.clone()));
        }

        Ok(reservation)
    }

    /// Registers a spawned session and marks it running.
    ///
    /// The session is visible to lookups once this returns. If the key is
    /// already live the new session is signalled and released.
    pub fn create(&self, session: Session) -> Result<Arc<Session>, SessionError> {
        match self.sessions.entry(session.key().clone()) {
            Entry::Occupied(_) => {
                let id = session.id().clone();
                session.signal_terminate();
                session.release();
                Arc::new(session).reap_in_background();
                Err(SessionError::AlreadyExists(id))
            }
            Entry::Vacant(entry) => {
                session.mark_running();
                let session = Arc::new(session);
                entry.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Looks up a live session.
    pub fn lookup(&self, owner: &str, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(&SessionKey::new(owner, id))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns true if the session is live.
    pub fn contains(&self, owner: &str, id: &str) -> bool {
        self.sessions.contains_key(&SessionKey::new(owner, id))
    }

    /// Removes a session. Returns false if it was already gone.
    pub fn remove(&self, owner: &str, id: &str) -> bool {
        self.sessions.remove(&SessionKey::new(owner, id)).is_some()
    }

    /// Removes `session`, running `on_removed` while the entry is still locked.
    ///
    /// Only the exact session instance is removed; a newer session that
    /// reuses the key is left alone. Exactly one of several concurrent
    /// callers gets `Some`.
    pub fn take<F>(&self, session: &Arc<Session>, on_removed: F) -> Option<Arc<Session>>
    where
        F: FnOnce(&Arc<Session>),
    {
        match self.sessions.entry(session.key().clone()) {
            Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), session) => {
                on_removed(entry.get());
                Some(entry.remove())
            }
            _ => None,
        }
    }

    /// Returns all live sessions owned by `owner`.
    pub fn list_by_owner(&self, owner: &str) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.key().owner == owner)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns every live session.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Snapshots every live session.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| SessionInfo::from(entry.value().as_ref()))
            .collect()
    }

    /// Number of live sessions plus starts in progress.
    ///
    /// A start that has registered its session but not yet dropped its
    /// reservation is counted once.
    pub fn count(&self) -> usize {
        let starting = self
            .pending
            .iter()
            .filter(|key| !self.sessions.contains_key(key.key()))
            .count();
        self.sessions.len() + starting
    }

    /// Returns true if no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
