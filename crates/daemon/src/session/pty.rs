//! PTY spawning and per-session terminal state.
//!
//! Terminal support is a capability: [`PtyBackend`] has a real implementation
//! backed by `portable-pty` and an "unsupported" implementation for hosts
//! without pseudo-terminals. [`default_backend`] picks one once at startup so
//! callers never branch on the platform themselves.

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;

use crate::transport::ConnectionId;

/// Client-chosen session identifier, unique per connection.
pub type SessionId = protocol::TerminalId;

/// Environment override applied to every shell: no prompt decoration.
const PROMPT_OVERRIDE: (&str, &str) = ("PS1", "");

/// Terminal type advertised to the shell.
const TERM_VALUE: &str = "xterm-256color";

/// Errors that can occur while creating a pty and its shell.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The host has no pseudo-terminal support.
    #[error("interactive terminals are not supported on this host")]
    UnsupportedPlatform,

    /// Allocating the pty pair failed.
    #[error("failed to open pty: {0}")]
    OpenPty(String),

    /// The shell could not be started on the pty.
    #[error("failed to start shell {shell}: {reason}")]
    Exec {
        /// Shell that was requested.
        shell: String,
        /// OS error text.
        reason: String,
    },

    /// The pty was created but its streams could not be obtained.
    #[error("failed to attach to pty: {0}")]
    Attach(String),
}

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Terminal capability unavailable on this host.
    #[error("interactive terminals are not supported on this host")]
    UnsupportedPlatform,

    /// The requested working directory escapes the sandbox or does not exist.
    #[error("invalid working directory {path}: {reason}")]
    InvalidWorkingDirectory {
        /// Path as sent by the client.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A live session already uses this id for this connection.
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The OS refused to create the pty or the process.
    #[error("failed to spawn session: {0}")]
    SpawnFailed(String),

    /// Too many sessions are open.
    #[error("session limit reached ({0})")]
    LimitReached(usize),

    /// A terminal size of zero was requested.
    #[error("invalid terminal size {cols}x{rows}")]
    InvalidSize {
        /// Requested columns.
        cols: u16,
        /// Requested rows.
        rows: u16,
    },

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),
}

impl From<SpawnError> for SessionError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::UnsupportedPlatform => SessionError::UnsupportedPlatform,
            other => SessionError::SpawnFailed(other.to_string()),
        }
    }
}

/// Lifecycle state of a session.
///
/// `Starting` is never visible through the registry; `Closed` is equivalent to
/// absence from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Spawned, not yet registered.
    Starting,
    /// Registered and forwarding output.
    Running,
    /// A termination trigger fired; removal is in progress.
    Closing,
    /// Removed and the close event was emitted.
    Closed,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionStatus::Starting,
            1 => SessionStatus::Running,
            2 => SessionStatus::Closing,
            _ => SessionStatus::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionStatus::Starting => 0,
            SessionStatus::Running => 1,
            SessionStatus::Closing => 2,
            SessionStatus::Closed => 3,
        }
    }

    /// Lowercase name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Closing => "closing",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Registry key: the owning connection plus the client-chosen id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Connection that created the session.
    pub owner: ConnectionId,
    /// Client-chosen session id.
    pub id: SessionId,
}

impl SessionKey {
    /// Creates a key for `id` owned by `owner`.
    pub fn new(owner: impl Into<ConnectionId>, id: impl Into<SessionId>) -> Self {
        Self {
            owner: owner.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.id)
    }
}

/// Parameters for starting a shell on a new pty.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Shell executable.
    pub shell: String,
    /// Validated working directory.
    pub cwd: PathBuf,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

/// Handles produced by a successful spawn.
pub struct SpawnedPty {
    /// Process ID of the shell, if the platform reports one.
    pub pid: Option<u32>,
    /// The shell process.
    pub child: Box<dyn Child + Send + Sync>,
    /// Master side of the pty, kept for resizing.
    pub master: Box<dyn MasterPty + Send>,
    /// Input stream of the pty.
    pub writer: Box<dyn Write + Send>,
    /// Output stream of the pty, handed to the output forwarder.
    pub reader: Box<dyn Read + Send>,
}

/// Terminal capability of the host.
pub trait PtyBackend: Send + Sync {
    /// Whether this backend can create terminals at all.
    fn is_supported(&self) -> bool;

    /// Allocates a pty pair and starts a shell attached to it.
    ///
    /// Returns as soon as the process exists; it never waits for the shell
    /// to become ready.
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedPty, SpawnError>;
}

/// Real pseudo-terminals via `portable-pty`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtyBackend;

impl PtyBackend for NativePtyBackend {
    fn is_supported(&self) -> bool {
        true
    }

    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedPty, SpawnError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SpawnError::OpenPty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&request.shell);
        cmd.cwd(&request.cwd);
        cmd.env("TERM", TERM_VALUE);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        cmd.env(PROMPT_OVERRIDE.0, PROMPT_OVERRIDE.1);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SpawnError::Exec {
                shell: request.shell.clone(),
                reason: e.to_string(),
            })?;

        // Only the child may hold the slave, otherwise EOF never arrives.
        drop(pair.slave);

        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::Attach(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::Attach(e.to_string()))?;

        tracing::debug!(
            shell = %request.shell,
            cwd = %request.cwd.display(),
            pid = ?pid,
            "Spawned shell on pty"
        );

        Ok(SpawnedPty {
            pid,
            child,
            master: pair.master,
            writer,
            reader,
        })
    }
}

/// Backend for hosts without terminal support; every spawn is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPtyBackend;

impl PtyBackend for UnsupportedPtyBackend {
    fn is_supported(&self) -> bool {
        false
    }

    fn spawn(&self, _request: &SpawnRequest) -> Result<SpawnedPty, SpawnError> {
        Err(SpawnError::UnsupportedPlatform)
    }
}

/// Selects the terminal backend for this host.
pub fn default_backend() -> Arc<dyn PtyBackend> {
    if cfg!(unix) {
        Arc::new(NativePtyBackend)
    } else {
        tracing::warn!("No pseudo-terminal support on this host; terminals are disabled");
        Arc::new(UnsupportedPtyBackend)
    }
}

/// Detects the shell to use.
///
/// Returns the shell in this order of preference:
/// 1. The configured shell if non-empty
/// 2. The $SHELL environment variable
/// 3. /bin/sh as fallback
pub fn detect_shell(configured: Option<&str>) -> String {
    if let Some(shell) = configured.filter(|s| !s.is_empty()) {
        return shell.to_string();
    }

    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One interactive shell and its pty.
///
/// The pty and process handles are owned exclusively by the session and are
/// reached only through the registry. Output and close emission go through a
/// shared gate so nothing is delivered after the close event.
pub struct Session {
    key: SessionKey,
    pid: Option<u32>,
    status: AtomicU8,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    size: Mutex<(u16, u16)>,
    /// True once the close event has been emitted.
    closed: Mutex<bool>,
    started_at: Instant,
}

impl Session {
    /// Wraps freshly spawned handles.
    ///
    /// Returns the session in `Starting` state together with the pty reader,
    /// which belongs to the output forwarder.
    pub fn new(
        key: SessionKey,
        spawned: SpawnedPty,
        cols: u16,
        rows: u16,
    ) -> (Self, Box<dyn Read + Send>) {
        let SpawnedPty {
            pid,
            child,
            master,
            writer,
            reader,
        } = spawned;

        let session = Session {
            key,
            pid,
            status: AtomicU8::new(SessionStatus::Starting.as_u8()),
            master: Mutex::new(Some(master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
            size: Mutex::new((cols, rows)),
            closed: Mutex::new(false),
            started_at: Instant::now(),
        };

        (session, reader)
    }

    /// Returns the registry key.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.key.id
    }

    /// Returns the owning connection.
    pub fn owner(&self) -> &ConnectionId {
        &self.key.owner
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Returns the current terminal size as `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        *lock(&self.size)
    }

    /// Time since the shell was spawned.
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn mark_running(&self) {
        self.status
            .store(SessionStatus::Running.as_u8(), Ordering::SeqCst);
    }

    /// Moves `Running` (or `Starting`) to `Closing`.
    ///
    /// Returns true for the first caller only.
    pub(crate) fn begin_closing(&self) -> bool {
        let closing = SessionStatus::Closing.as_u8();
        [SessionStatus::Running, SessionStatus::Starting]
            .iter()
            .any(|from| {
                self.status
                    .compare_exchange(from.as_u8(), closing, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            })
    }

    /// Writes raw bytes to the shell's input.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or_else(|| SessionError::NotFound(self.key.id.clone()))?;

        writer
            .write_all(data)
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        Ok(())
    }

    /// Resizes the PTY to the given dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if cols == 0 || rows == 0 {
            return Err(SessionError::InvalidSize { cols, rows });
        }

        let guard = lock(&self.master);
        let master = guard
            .as_ref()
            .ok_or_else(|| SessionError::NotFound(self.key.id.clone()))?;

        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        *lock(&self.size) = (cols, rows);

        tracing::debug!(session_id = %self.key.id, connection_id = %self.key.owner, cols, rows, "Resized PTY");
        Ok(())
    }

    /// Runs `send` unless the close event has already gone out.
    ///
    /// Returns false when the session is closed.
    pub(crate) fn emit_if_open(&self, send: impl FnOnce()) -> bool {
        let closed = lock(&self.closed);
        if *closed {
            return false;
        }
        send();
        true
    }

    /// Marks the session closed and runs `send_close` under the emission gate.
    pub(crate) fn close(&self, send_close: impl FnOnce()) {
        let mut closed = lock(&self.closed);
        if *closed {
            return;
        }
        *closed = true;
        self.status
            .store(SessionStatus::Closed.as_u8(), Ordering::SeqCst);
        send_close();
    }

    /// Sends the graceful termination signals to the shell.
    ///
    /// SIGHUP mirrors a terminal window closing (interactive shells ignore
    /// SIGTERM); SIGTERM follows for programs that only honor that. There is
    /// no escalation to SIGKILL. A process that is already gone is not an error.
    pub(crate) fn signal_terminate(&self) {
        let Some(pid) = self.pid else {
            tracing::debug!(session_id = %self.key.id, connection_id = %self.key.owner, "No pid to signal");
            return;
        };
        send_graceful_signals(pid, &self.key);
    }

    /// Drops the master and writer, releasing the pty.
    pub(crate) fn release(&self) {
        lock(&self.writer).take();
        lock(&self.master).take();
    }

    /// Waits for the shell to exit and returns its exit code.
    pub(crate) fn reap(&self) -> Option<u32> {
        let mut child = lock(&self.child);
        match child.wait() {
            Ok(status) => Some(status.exit_code()),
            Err(e) => {
                tracing::debug!(session_id = %self.key.id, connection_id = %self.key.owner, error = %e, "Failed to reap shell");
                None
            }
        }
    }

    /// Reaps the shell on its own thread once it exits.
    ///
    /// For sessions that never got an output forwarder to wait on them.
    pub(crate) fn reap_in_background(self: Arc<Self>) {
        let key = self.key.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("pty-reaper-{}", key.id))
            .spawn(move || {
                let exit_code = self.reap();
                tracing::debug!(session_id = %self.key.id, connection_id = %self.key.owner, exit_code = ?exit_code, "Reaped shell");
            });
        if let Err(e) = spawned {
            tracing::warn!(session_id = %key.id, connection_id = %key.owner, error = %e, "Failed to start reaper thread");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("pid", &self.pid)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(unix)]
fn send_graceful_signals(pid: u32, key: &SessionKey) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };

    for signal in [Signal::SIGHUP, Signal::SIGTERM] {
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                tracing::debug!(session_id = %key.id, connection_id = %key.owner, pid, "Shell already exited");
                return;
            }
            Err(e) => {
                tracing::warn!(session_id = %key.id, connection_id = %key.owner, pid, ?signal, error = %e, "Failed to signal shell");
            }
        }
    }
}

#[cfg(not(unix))]
fn send_graceful_signals(pid: u32, key: &SessionKey) {
    tracing::debug!(session_id = %key.id, connection_id = %key.owner, pid, "Signals are not available on this host");
}
