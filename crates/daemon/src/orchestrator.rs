//! Server orchestrator for wiring together all components.
//!
//! This module provides the `Orchestrator` that builds the sandbox resolver,
//! connection hub, session manager and event router from configuration, runs
//! the WebSocket accept loop and tears everything down on stop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::router::EventRouter;
use crate::sandbox::SandboxResolver;
use crate::session::{default_backend, PtyBackend, SessionManager, SessionManagerImpl};
use crate::transport::{self, ConnectionHub};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// The listener is bound.
    Listening { addr: SocketAddr },
    /// Sessions were terminated during shutdown.
    SessionsTerminated { count: usize },
}

/// Owns every subsystem of a running server.
pub struct Orchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Connected clients.
    hub: Arc<ConnectionHub>,
    /// Session manager for PTY sessions.
    session_manager: Arc<SessionManagerImpl>,
    /// Event router.
    router: Arc<EventRouter<SessionManagerImpl>>,
    /// Address the listener is bound to, once started.
    local_addr: Option<SocketAddr>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Creates an orchestrator using the host's terminal backend.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_backend(config, default_backend())
    }

    /// Creates an orchestrator with an explicit terminal backend.
    pub fn with_backend(config: Config, backend: Arc<dyn PtyBackend>) -> Result<Self> {
        let resolver = SandboxResolver::new(&config.sandbox.root).with_context(|| {
            format!(
                "Failed to open sandbox root: {}",
                config.sandbox.root.display()
            )
        })?;
        info!(root = %resolver.root().display(), "Sandbox root");

        let hub = Arc::new(ConnectionHub::new());

        let session_manager = Arc::new(SessionManagerImpl::new(
            config.session.clone(),
            resolver,
            backend,
            hub.clone(),
        ));
        info!(shell = %session_manager.shell(), "Terminal shell");

        let router = Arc::new(EventRouter::new(Arc::clone(&session_manager), hub.clone()));

        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            hub,
            session_manager,
            router,
            local_addr: None,
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Binds the listener and starts accepting connections.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        let listener = match TcpListener::bind(&self.config.server.bind).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
                return Err(e)
                    .with_context(|| format!("Failed to bind {}", self.config.server.bind));
            }
        };
        let addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        self.local_addr = Some(addr);

        // A stopped orchestrator may be started again
        if self.shutdown_token.is_cancelled() {
            self.shutdown_token = CancellationToken::new();
        }

        tokio::spawn(transport::serve(
            listener,
            Arc::clone(&self.router),
            Arc::clone(&self.hub),
            self.shutdown_token.clone(),
        ));
        self.emit_event(OrchestratorEvent::Listening { addr });

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!(
            %addr,
            protocol_version = protocol::PROTOCOL_VERSION,
            "termbridge server ready"
        );
        Ok(())
    }

    /// Stops accepting connections and terminates every session.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping termbridge server...");

        // Signal shutdown to the accept loop and every connection
        self.shutdown_token.cancel();

        let count = self.session_manager.shutdown();
        debug!(count, "Sessions terminated");
        self.emit_event(OrchestratorEvent::SessionsTerminated { count });

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("termbridge server stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the session manager.
    pub fn session_manager(&self) -> &Arc<SessionManagerImpl> {
        &self.session_manager
    }

    /// Returns the connection hub.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// Returns the number of live sessions.
    pub fn session_count(&self) -> usize {
        self.session_manager.count()
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
