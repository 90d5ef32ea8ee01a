//! Event router for dispatching client events to the session manager.
//!
//! The router is the only place where session errors meet the client. Each
//! failure becomes a session-scoped error event, an explanatory output plus
//! close, or nothing at all; no error is ever returned to the transport.

use std::sync::Arc;

use protocol::{
    ClientEvent, ErrorCode, ServerEvent, TerminalInput, TerminalKill, TerminalResize,
    TerminalStart,
};
use tracing::{debug, info, trace, warn};

use crate::session::{SessionError, SessionManager};
use crate::transport::Transport;

/// Shown in the terminal when the host cannot provide one.
pub const UNSUPPORTED_PLATFORM_MESSAGE: &str =
    "\r\n\x1b[31mError: Interactive terminal is not supported on this platform.\x1b[0m\r\n";

/// Client-visible reaction to a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReply {
    /// Ignore the request.
    Silent,
    /// Send these events to the requesting connection, in order.
    Events(Vec<ServerEvent>),
}

/// Maps a session error to what the client should see for `terminal_id`.
pub fn error_reply(error: &SessionError, terminal_id: &str) -> ErrorReply {
    let scoped = |code: ErrorCode, message: String| {
        ErrorReply::Events(vec![ServerEvent::error(terminal_id, code, message)])
    };

    match error {
        SessionError::UnsupportedPlatform => ErrorReply::Events(vec![
            ServerEvent::output(terminal_id, UNSUPPORTED_PLATFORM_MESSAGE),
            ServerEvent::close(terminal_id),
        ]),
        SessionError::InvalidWorkingDirectory { .. } => scoped(
            ErrorCode::InvalidWorkingDirectory,
            "Invalid working directory.".to_string(),
        ),
        SessionError::SpawnFailed(reason) => scoped(
            ErrorCode::SpawnFailed,
            format!("Failed to start terminal: {reason}"),
        ),
        SessionError::LimitReached(max) => scoped(
            ErrorCode::SessionLimit,
            format!("Too many open terminals (limit {max})."),
        ),
        SessionError::InvalidSize { cols, rows } => scoped(
            ErrorCode::InvalidRequest,
            format!("Invalid terminal size {cols}x{rows}."),
        ),
        SessionError::AlreadyExists(_)
        | SessionError::NotFound(_)
        | SessionError::WriteFailed(_)
        | SessionError::ResizeFailed(_) => ErrorReply::Silent,
    }
}

/// Routes client events for all connections.
pub struct EventRouter<S: SessionManager> {
    /// Session manager for PTY operations.
    session_manager: Arc<S>,
    /// Outbound channel for error replies.
    transport: Arc<dyn Transport>,
}

impl<S: SessionManager> EventRouter<S> {
    /// Create a new event router.
    pub fn new(session_manager: Arc<S>, transport: Arc<dyn Transport>) -> Self {
        Self {
            session_manager,
            transport,
        }
    }

    /// Returns the session manager.
    pub fn session_manager(&self) -> &Arc<S> {
        &self.session_manager
    }

    /// Called once when a connection is established.
    pub fn on_connect(&self, connection_id: &str) {
        debug!(connection_id = %connection_id, "Connection ready for events");
    }

    /// Dispatches one client event.
    pub async fn on_message(&self, connection_id: &str, event: ClientEvent) {
        trace!(connection_id = %connection_id, ?event, "Routing event");

        let terminal_id = event.terminal_id().clone();
        let result = match event {
            ClientEvent::TerminalStart(req) => self.handle_start(connection_id, req).await,
            ClientEvent::TerminalInput(req) => self.handle_input(connection_id, req).await,
            ClientEvent::TerminalKill(req) => self.handle_kill(connection_id, req).await,
            ClientEvent::TerminalResize(req) => self.handle_resize(connection_id, req).await,
        };

        if let Err(e) = result {
            self.reply_error(connection_id, &terminal_id, &e);
        }
    }

    /// Tears down everything the connection owned.
    pub async fn on_disconnect(&self, connection_id: &str) {
        let count = self.session_manager.disconnect(connection_id).await;
        debug!(connection_id = %connection_id, sessions = count, "Connection cleaned up");
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    async fn handle_start(&self, connection_id: &str, req: TerminalStart) -> Result<(), SessionError> {
        let pid = self
            .session_manager
            .start(
                connection_id,
                &req.terminal_id,
                &req.cwd,
                (req.cols, req.rows),
            )
            .await?;

        debug!(
            connection_id = %connection_id,
            session_id = %req.terminal_id,
            pid = ?pid,
            "Terminal started"
        );
        Ok(())
    }

    async fn handle_input(&self, connection_id: &str, req: TerminalInput) -> Result<(), SessionError> {
        self.session_manager
            .write(connection_id, &req.terminal_id, req.data.as_bytes())
            .await
    }

    async fn handle_kill(&self, connection_id: &str, req: TerminalKill) -> Result<(), SessionError> {
        self.session_manager
            .kill(connection_id, &req.terminal_id)
            .await?;
        info!(connection_id = %connection_id, session_id = %req.terminal_id, "Terminal killed by client");
        Ok(())
    }

    async fn handle_resize(&self, connection_id: &str, req: TerminalResize) -> Result<(), SessionError> {
        self.session_manager
            .resize(connection_id, &req.terminal_id, req.cols, req.rows)
            .await
    }

    fn reply_error(&self, connection_id: &str, terminal_id: &str, error: &SessionError) {
        match error_reply(error, terminal_id) {
            ErrorReply::Silent => match error {
                SessionError::WriteFailed(_) | SessionError::ResizeFailed(_) => {
                    warn!(connection_id = %connection_id, session_id = %terminal_id, error = %error, "Terminal request failed");
                }
                _ => {
                    debug!(connection_id = %connection_id, session_id = %terminal_id, error = %error, "Ignoring request");
                }
            },
            ErrorReply::Events(events) => {
                warn!(connection_id = %connection_id, session_id = %terminal_id, error = %error, "Rejected terminal request");
                for event in events {
                    self.transport.send(connection_id, event);
                }
            }
        }
    }
}
