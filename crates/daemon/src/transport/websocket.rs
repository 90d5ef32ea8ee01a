//! WebSocket server.
//!
//! Each accepted socket becomes one connection in the [`ConnectionHub`]. A
//! writer task turns queued [`ServerEvent`]s into JSON text frames; the reader
//! loop decodes client frames and hands them to the router one at a time, so
//! input for a session is applied in the order it was sent.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use protocol::{ClientEvent, ServerEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::{ConnectionHub, TransportError};
use crate::router::EventRouter;
use crate::session::SessionManagerImpl;

/// Accepts connections until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Arc<EventRouter<SessionManagerImpl>>,
    hub: Arc<ConnectionHub>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Accepting WebSocket connections");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("Accept loop stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let router = Arc::clone(&router);
                    let hub = Arc::clone(&hub);
                    let shutdown = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, router, hub, shutdown).await {
                            tracing::warn!(%peer, error = %e, "Connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<EventRouter<SessionManagerImpl>>,
    hub: Arc<ConnectionHub>,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (sink, mut frames) = ws.split();

    let (connection_id, events) = hub.connect();
    tracing::info!(connection_id = %connection_id, %peer, "Client connected");
    router.on_connect(&connection_id);

    let writer = tokio::spawn(write_events(sink, events, connection_id.clone()));

    let mut result = Ok(());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match ClientEvent::from_json(&text) {
                    Ok(event) => router.on_message(&connection_id, event).await,
                    Err(e) => {
                        tracing::warn!(connection_id = %connection_id, error = %e, "Dropping malformed frame");
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    result = Err(e.into());
                    break;
                }
            }
        }
    }

    router.on_disconnect(&connection_id).await;
    hub.disconnect(&connection_id);
    if let Err(e) = writer.await {
        tracing::debug!(connection_id = %connection_id, error = %e, "Writer task failed");
    }

    tracing::info!(connection_id = %connection_id, %peer, "Client disconnected");
    result
}

async fn write_events<W>(
    mut sink: W,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    connection_id: String,
) where
    W: futures_util::Sink<WsMessage> + Unpin,
    W::Error: std::fmt::Display,
{
    while let Some(event) = events.recv().await {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Failed to encode event");
                continue;
            }
        };

        if let Err(e) = sink.send(WsMessage::Text(json)).await {
            tracing::debug!(connection_id = %connection_id, error = %e, "Socket closed while sending");
            break;
        }
    }

    let _ = sink.close().await;
}
