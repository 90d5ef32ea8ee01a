//! Session management module.
//!
//! This module provides PTY spawning, the session registry, output
//! forwarding and lifecycle management. Sessions are scoped to the
//! connection that started them.

pub mod forwarder;
pub mod lifecycle;
pub mod manager;
pub mod pty;
pub mod registry;

pub use forwarder::Utf8Decoder;
pub use lifecycle::{LifecycleController, TerminationReason};
pub use manager::{SessionManager, SessionManagerImpl};
pub use pty::{
    default_backend, detect_shell, NativePtyBackend, PtyBackend, Session, SessionError,
    SessionId, SessionKey, SessionStatus, SpawnError, SpawnRequest, SpawnedPty,
    UnsupportedPtyBackend,
};
pub use registry::{SessionInfo, SessionRegistry};
