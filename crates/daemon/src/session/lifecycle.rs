//! Session termination.
//!
//! Every way a session can end (the shell exiting, an explicit kill, the
//! owning connection going away, server shutdown) goes through
//! [`LifecycleController::terminate`], which guarantees a single close event
//! and a single release of the pty no matter how many triggers race.

use std::fmt;
use std::sync::Arc;

use protocol::ServerEvent;

use super::pty::Session;
use super::registry::SessionRegistry;
use crate::transport::Transport;

/// Why a session is being terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The shell exited or its pty reached end of stream.
    NaturalExit,
    /// The client asked for it.
    Killed,
    /// The owning connection went away.
    Disconnected,
    /// The server is stopping.
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::NaturalExit => "natural_exit",
            TerminationReason::Killed => "killed",
            TerminationReason::Disconnected => "disconnected",
            TerminationReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Ends sessions and emits their close events.
pub struct LifecycleController {
    registry: Arc<SessionRegistry>,
    transport: Arc<dyn Transport>,
}

impl LifecycleController {
    /// Creates a controller over `registry` that reports to `transport`.
    pub fn new(registry: Arc<SessionRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Returns the registry this controller manages.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Delivers shell output unless the session has already closed.
    ///
    /// Returns false once the close event has been emitted.
    pub fn emit_output(&self, session: &Session, data: String) -> bool {
        session.emit_if_open(|| {
            self.transport
                .send(session.owner(), ServerEvent::output(session.id().clone(), data));
        })
    }

    /// Terminates the live session `(owner, id)`. Idempotent.
    ///
    /// Returns true for the caller that actually performed the removal; every
    /// other call is a no-op.
    pub fn terminate(&self, owner: &str, id: &str, reason: TerminationReason) -> bool {
        match self.registry.lookup(owner, id) {
            Some(session) => self.terminate_session(&session, reason),
            None => {
                tracing::trace!(connection_id = %owner, session_id = %id, %reason, "Session already gone");
                false
            }
        }
    }

    /// Terminates this particular session instance. Idempotent.
    ///
    /// Signals the shell, removes the session from the registry, emits exactly
    /// one close event to the owner and releases the pty. A newer session that
    /// reuses the same key is never touched.
    pub fn terminate_session(&self, session: &Arc<Session>, reason: TerminationReason) -> bool {
        if session.begin_closing() {
            session.signal_terminate();
        }

        let owner = session.owner();
        let id = session.id();
        let removed = self.registry.take(session, |session| {
            session.close(|| {
                self.transport.send(owner, ServerEvent::close(id.clone()));
            });
        });

        match removed {
            Some(session) => {
                session.release();
                tracing::info!(
                    connection_id = %owner,
                    session_id = %id,
                    pid = ?session.pid(),
                    %reason,
                    uptime_ms = session.uptime().as_millis() as u64,
                    "Session terminated"
                );
                true
            }
            None => false,
        }
    }

    /// Terminates every session owned by `owner`. Returns how many this call ended.
    pub fn terminate_owner(&self, owner: &str, reason: TerminationReason) -> usize {
        self.registry
            .list_by_owner(owner)
            .iter()
            .filter(|session| self.terminate_session(session, reason))
            .count()
    }

    /// Terminates every live session.
    pub fn terminate_all(&self, reason: TerminationReason) -> usize {
        self.registry
            .all()
            .iter()
            .filter(|session| self.terminate_session(session, reason))
            .count()
    }
}
