//! Real-time channel between the server and browser clients.
//!
//! The session layer only needs to push events to a connection; it does so
//! through the [`Transport`] trait. [`ConnectionHub`] implements it with one
//! unbounded queue per connection, drained by the WebSocket writer task.

pub mod websocket;

use dashmap::DashMap;
use protocol::ServerEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use websocket::serve;

/// Server-assigned identifier of a client connection.
pub type ConnectionId = String;

/// Errors raised by the transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Binding or accepting on the listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket handshake or a frame failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An event could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

/// Delivers server events to connections.
pub trait Transport: Send + Sync {
    /// Queues `event` for `connection`.
    ///
    /// Events for one connection are delivered in the order they were sent.
    /// Returns false if the connection is gone.
    fn send(&self, connection: &str, event: ServerEvent) -> bool;
}

/// Registry of connected clients and their outbound queues.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>,
}

impl ConnectionHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection.
    ///
    /// Returns its id and the receiver the connection's writer drains.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id.clone(), tx);
        tracing::debug!(connection_id = %id, "Connection registered");
        (id, rx)
    }

    /// Drops a connection's queue. The writer ends once the queue is drained.
    pub fn disconnect(&self, id: &str) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, "Connection unregistered");
        }
        removed
    }

    /// Returns true if the connection is registered.
    pub fn is_connected(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

impl Transport for ConnectionHub {
    fn send(&self, connection: &str, event: ServerEvent) -> bool {
        match self.connections.get(connection) {
            Some(tx) => tx.send(event).is_ok(),
            None => {
                tracing::trace!(connection_id = %connection, "Dropping event for closed connection");
                false
            }
        }
    }
}
