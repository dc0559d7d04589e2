//! In-memory test doubles for the registry and read loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::SendError;
use crate::websocket::connection::{ConnectionId, MessageSink, Payload};

#[derive(Clone, Copy)]
enum Mode {
    Healthy,
    Failing,
    Stalled,
}

/// Sink that records every delivery attempt instead of writing to a socket.
pub(crate) struct RecordingSink {
    id: ConnectionId,
    mode: Mode,
    received: Mutex<Vec<Payload>>,
    attempts: AtomicUsize,
    closed: AtomicBool,
    closes: AtomicUsize,
}

impl RecordingSink {
    fn build(id: &str, mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::from(id),
            mode,
            received: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        })
    }

    /// Accepts every send.
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Self::build(id, Mode::Healthy)
    }

    /// Rejects every send with a transport error.
    pub(crate) fn failing(id: &str) -> Arc<Self> {
        Self::build(id, Mode::Failing)
    }

    /// Never completes a send.
    pub(crate) fn stalled(id: &str) -> Arc<Self> {
        Self::build(id, Mode::Stalled)
    }

    /// Frames delivered so far, in order.
    pub(crate) fn received(&self) -> Vec<Payload> {
        self.received.lock().clone()
    }

    /// Delivery attempts, successful or not.
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Times the transport was actually closed (at most one).
    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, payload: &Payload) -> Result<(), SendError> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        match self.mode {
            Mode::Healthy => {
                self.received.lock().push(payload.clone());
                Ok(())
            }
            Mode::Failing => Err(SendError::Transport("broken pipe".into())),
            Mode::Stalled => std::future::pending().await,
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
