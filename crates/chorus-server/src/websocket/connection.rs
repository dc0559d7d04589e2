//! WebSocket client connection handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use futures::{Sink, SinkExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::SendError;

/// Unique connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh, time-ordered identifier.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One relayed frame. Content is never inspected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(Utf8Bytes),
    /// Binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Length of the frame body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.as_str().len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the frame body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert a data frame into a payload. Control frames yield `None`.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(bytes) => Some(Self::Binary(bytes)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }

    fn to_message(&self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.clone()),
            Self::Binary(bytes) => Message::Binary(bytes.clone()),
        }
    }
}

/// Write side of a connection, as seen by the registry.
///
/// `close` must be idempotent: two independent failure paths can remove
/// the same connection.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Identity used as the registry key.
    fn id(&self) -> &ConnectionId;

    /// Deliver one frame.
    async fn send(&self, payload: &Payload) -> Result<(), SendError>;

    /// Release the transport. Repeated calls are no-ops.
    async fn close(&self);
}

/// A connected WebSocket client, wrapping the write half of its socket.
///
/// The read half stays with the connection's own task, so reads and writes
/// never contend for the same lock.
pub struct ClientConnection<S> {
    id: ConnectionId,
    sink: Mutex<S>,
    closed: AtomicBool,
}

impl<S> ClientConnection<S> {
    /// Wrap a sink under a fresh identifier.
    pub fn new(sink: S) -> Self {
        Self::with_id(ConnectionId::new(), sink)
    }

    /// Wrap a sink under a known identifier.
    pub fn with_id(id: ConnectionId, sink: S) -> Self {
        Self {
            id,
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<S> MessageSink for ClientConnection<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, payload: &Payload) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(payload.to_message())
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        // Peer may already be gone; nothing useful to do with the error.
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}
