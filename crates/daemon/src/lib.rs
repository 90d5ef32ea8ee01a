//! # termbridge Server Library
//!
//! This crate drives interactive shells on behalf of a browser-based editor.
//! Each client connection may open any number of terminals; every terminal is
//! a real shell on its own pseudo-terminal, started in a directory inside the
//! sandbox root and torn down when it exits, is killed, or its connection
//! goes away.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐   events   ┌──────────────────────────┐  │
//! │  │ WebSocket server │──────────▶│       Event Router        │  │
//! │  └──────────────────┘            └────────────┬─────────────┘  │
//! │           ▲                                   ▼                 │
//! │  ┌──────────────────┐            ┌──────────────────────────┐  │
//! │  │ Connection Hub   │◀───────────│     Session Manager      │  │
//! │  └──────────────────┘  output/   │  registry · forwarders   │  │
//! │                        close     │  lifecycle · sandbox     │  │
//! │                                  └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let mut orchestrator = Orchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Serve until asked to stop...
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`sandbox`]: Client path resolution inside the sandbox root
//! - [`session`]: PTY spawning, registry, output forwarding, lifecycle
//! - [`transport`]: Connection hub and WebSocket server
//! - [`router`]: Client event dispatch and error replies
//! - [`orchestrator`]: Main server coordinator

pub mod config;
pub mod orchestrator;
pub mod router;
pub mod sandbox;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

pub use config::{Config, ConfigError};
pub use orchestrator::{Orchestrator, OrchestratorEvent, OrchestratorState};
pub use router::{error_reply, ErrorReply, EventRouter};
pub use sandbox::{SandboxError, SandboxResolver};
pub use session::{
    LifecycleController, PtyBackend, Session, SessionError, SessionId, SessionInfo, SessionKey,
    SessionManager, SessionManagerImpl, SessionRegistry, SessionStatus, SpawnError,
    TerminationReason,
};
pub use transport::{ConnectionHub, ConnectionId, Transport, TransportError};
