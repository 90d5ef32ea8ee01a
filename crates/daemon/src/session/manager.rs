//! Session manager: starts sessions and routes client requests to them.
//!
//! This module ties the pty backend, sandbox resolver, registry, output
//! forwarder and lifecycle controller together behind one thread-safe API.

use std::sync::Arc;

use super::forwarder;
use super::lifecycle::{LifecycleController, TerminationReason};
use super::pty::{
    detect_shell, PtyBackend, Session, SessionError, SessionId, SessionKey, SpawnRequest,
};
use super::registry::{SessionInfo, SessionRegistry};
use crate::config::SessionConfig;
use crate::sandbox::SandboxResolver;
use crate::transport::Transport;

/// Trait for session management operations.
///
/// Every operation is scoped to the connection that owns the session.
/// Implementations must be thread-safe and suitable for concurrent access.
#[allow(async_fn_in_trait)]
pub trait SessionManager: Send + Sync {
    /// Starts a shell for `(owner, id)` in the sandbox-relative `cwd`.
    ///
    /// `size` is `(cols, rows)`; missing values come from configuration.
    /// Returns the shell's process ID.
    async fn start(
        &self,
        owner: &str,
        id: &str,
        cwd: &str,
        size: (Option<u16>, Option<u16>),
    ) -> Result<Option<u32>, SessionError>;

    /// Writes raw input to a session's pty.
    async fn write(&self, owner: &str, id: &str, data: &[u8]) -> Result<(), SessionError>;

    /// Resizes a session's terminal.
    async fn resize(&self, owner: &str, id: &str, cols: u16, rows: u16)
        -> Result<(), SessionError>;

    /// Requests graceful termination of a session.
    async fn kill(&self, owner: &str, id: &str) -> Result<(), SessionError>;

    /// Terminates every session owned by a connection that went away.
    ///
    /// Returns the number of sessions terminated.
    async fn disconnect(&self, owner: &str) -> usize;

    /// Lists all live sessions.
    fn list(&self) -> Vec<SessionInfo>;

    /// Gets information about a specific session.
    fn get(&self, owner: &str, id: &str) -> Option<SessionInfo>;

    /// Checks if a session is live.
    fn exists(&self, owner: &str, id: &str) -> bool;

    /// Returns the number of live sessions plus starts still in progress.
    fn count(&self) -> usize;
}

/// Session manager backed by [`SessionRegistry`].
pub struct SessionManagerImpl {
    settings: SessionConfig,
    shell: String,
    resolver: SandboxResolver,
    backend: Arc<dyn PtyBackend>,
    registry: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleController>,
}

impl SessionManagerImpl {
    /// Creates a session manager.
    ///
    /// Output and close events for every session are delivered via `transport`.
    pub fn new(
        settings: SessionConfig,
        resolver: SandboxResolver,
        backend: Arc<dyn PtyBackend>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let lifecycle = Arc::new(LifecycleController::new(Arc::clone(&registry), transport));
        let shell = detect_shell(settings.shell());

        Self {
            settings,
            shell,
            resolver,
            backend,
            registry,
            lifecycle,
        }
    }

    /// Returns the shell new sessions run.
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Terminates every live session. Used when the server stops.
    pub fn shutdown(&self) -> usize {
        let count = self.lifecycle.terminate_all(TerminationReason::Shutdown);
        if count > 0 {
            tracing::info!(count, "Terminated sessions for shutdown");
        }
        count
    }

    fn start_session(
        &self,
        owner: &str,
        id: &str,
        cwd: &str,
        size: (Option<u16>, Option<u16>),
    ) -> Result<Option<u32>, SessionError> {
        if !self.backend.is_supported() {
            return Err(SessionError::UnsupportedPlatform);
        }

        let key = SessionKey::new(owner, id);
        let reservation = self.registry.reserve(&key)?;

        if self.registry.count() > self.settings.max_sessions {
            return Err(SessionError::LimitReached(self.settings.max_sessions));
        }

        let cwd_path =
            self.resolver
                .resolve_dir(cwd)
                .map_err(|e| SessionError::InvalidWorkingDirectory {
                    path: cwd.to_string(),
                    reason: e.to_string(),
                })?;

        let cols = size.0.unwrap_or(self.settings.cols);
        let rows = size.1.unwrap_or(self.settings.rows);
        if cols == 0 || rows == 0 {
            return Err(SessionError::InvalidSize { cols, rows });
        }

        let request = SpawnRequest {
            shell: self.shell.clone(),
            cwd: cwd_path,
            env: self
                .settings
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            cols,
            rows,
        };
        let spawned = self.backend.spawn(&request)?;

        let (session, reader) = Session::new(key, spawned, cols, rows);
        let session = self.registry.create(session)?;
        drop(reservation);

        let pid = session.pid();
        tracing::info!(
            connection_id = %owner,
            session_id = %id,
            pid = ?pid,
            cwd = %request.cwd.display(),
            cols,
            rows,
            "Started session"
        );

        if let Err(e) = forwarder::spawn(
            Arc::clone(&session),
            reader,
            Arc::clone(&self.lifecycle),
            self.settings.read_buffer_size,
        ) {
            tracing::error!(session_id = %id, error = %e, "Failed to start output forwarder");
            self.lifecycle
                .terminate_session(&session, TerminationReason::NaturalExit);
            session.reap_in_background();
            return Err(SessionError::SpawnFailed(e.to_string()));
        }

        Ok(pid)
    }
}

impl SessionManager for SessionManagerImpl {
    async fn start(
        &self,
        owner: &str,
        id: &str,
        cwd: &str,
        size: (Option<u16>, Option<u16>),
    ) -> Result<Option<u32>, SessionError> {
        self.start_session(owner, id, cwd, size)
    }

    async fn write(&self, owner: &str, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let session = self
            .registry
            .lookup(owner, id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.write(data)
    }

    async fn resize(
        &self,
        owner: &str,
        id: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(), SessionError> {
        let session = self
            .registry
            .lookup(owner, id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.resize(cols, rows)
    }

    async fn kill(&self, owner: &str, id: &str) -> Result<(), SessionError> {
        if self.lifecycle.terminate(owner, id, TerminationReason::Killed) {
            Ok(())
        } else {
            Err(SessionError::NotFound(SessionId::from(id)))
        }
    }

    async fn disconnect(&self, owner: &str) -> usize {
        let count = self
            .lifecycle
            .terminate_owner(owner, TerminationReason::Disconnected);
        if count > 0 {
            tracing::info!(connection_id = %owner, count, "Terminated sessions of closed connection");
        }
        count
    }

    fn list(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    fn get(&self, owner: &str, id: &str) -> Option<SessionInfo> {
        self.registry
            .lookup(owner, id)
            .map(|session| SessionInfo::from(session.as_ref()))
    }

    fn exists(&self, owner: &str, id: &str) -> bool {
        self.registry.contains(owner, id)
    }

    fn count(&self) -> usize {
        self.registry.count()
    }
}
