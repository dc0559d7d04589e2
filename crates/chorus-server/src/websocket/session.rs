//! Per-connection read loop.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{Stream, StreamExt};
use tracing::{debug, info, instrument};

use super::connection::{ClientConnection, MessageSink, Payload};
use super::registry::BroadcastRegistry;

/// Why a read loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer sent a Close frame.
    ClosedByPeer,
    /// The socket returned a read error.
    ReadError,
    /// The stream ended without a Close frame.
    StreamEnded,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClosedByPeer => "closed_by_peer",
            Self::ReadError => "read_error",
            Self::StreamEnded => "stream_ended",
        })
    }
}

/// Drive an upgraded socket until it disconnects.
pub async fn serve_socket(socket: WebSocket, registry: Arc<BroadcastRegistry>) {
    let (sink, stream) = socket.split();
    let connection: Arc<dyn MessageSink> = Arc::new(ClientConnection::new(sink));
    let _ = run_connection(connection, stream, &registry).await;
}

/// Register `connection`, relay every data frame read from `stream`, and
/// remove the connection once reading stops.
///
/// Removal runs on every exit path. Ping and Pong frames are left to the
/// transport.
#[instrument(skip_all, fields(conn_id = %connection.id()))]
pub async fn run_connection<St, E>(
    connection: Arc<dyn MessageSink>,
    mut stream: St,
    registry: &BroadcastRegistry,
) -> Disconnect
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    registry.add(connection.clone()).await;
    let connected_at = Instant::now();
    info!("client connected");

    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Close(_))) => break Disconnect::ClosedByPeer,
            Some(Ok(message)) => {
                if let Some(payload) = Payload::from_message(message) {
                    registry.broadcast(&payload).await;
                }
            }
            Some(Err(error)) => {
                debug!(%error, "read failed");
                break Disconnect::ReadError;
            }
            None => break Disconnect::StreamEnded,
        }
    };

    registry.remove(connection.as_ref()).await;
    info!(
        %reason,
        connected_secs = connected_at.elapsed().as_secs_f64(),
        "client disconnected"
    );
    reason
}
