//! Connection registry and broadcast fan-out.
//!
//! One async mutex guards the connection set. `add`, `remove` and
//! `broadcast` each run as a single critical section, so a broadcast never
//! sees a half-applied membership change. Evictions found during a
//! broadcast happen inside that same critical section rather than through
//! `remove`, which would have to take the lock again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::connection::{ConnectionId, MessageSink, Payload};
use crate::errors::SendError;
use crate::metrics::{
    WS_BROADCAST_EVICTIONS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_MESSAGES_BROADCAST_TOTAL,
};

/// Shared set of live connections.
pub struct BroadcastRegistry {
    /// Connected clients indexed by connection ID.
    connections: Mutex<HashMap<ConnectionId, Arc<dyn MessageSink>>>,
    /// Upper bound on a single delivery attempt.
    send_timeout: Option<Duration>,
}

impl BroadcastRegistry {
    /// Create an empty registry with unbounded sends.
    pub fn new() -> Self {
        Self::with_send_timeout(None)
    }

    /// Create an empty registry; sends slower than `send_timeout` count as
    /// failures.
    pub fn with_send_timeout(send_timeout: Option<Duration>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Register a connection as a broadcast target.
    ///
    /// Registering an identity that is already present keeps the existing
    /// handle.
    pub async fn add(&self, connection: Arc<dyn MessageSink>) {
        let mut conns = self.connections.lock().await;
        if conns.contains_key(connection.id()) {
            debug!(conn_id = %connection.id(), "connection already registered");
            return;
        }
        let _ = conns.insert(connection.id().clone(), connection);
        metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
        record_active(conns.len());
    }

    /// Drop a connection from the set and close its transport.
    ///
    /// Safe to call for a connection that was never added or was already
    /// removed; the close is always attempted and is idempotent.
    pub async fn remove(&self, connection: &dyn MessageSink) {
        {
            let mut conns = self.connections.lock().await;
            if conns.remove(connection.id()).is_some() {
                metrics::counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
                record_active(conns.len());
                debug!(conn_id = %connection.id(), remaining = conns.len(), "connection removed");
            }
        }
        self.close_connection(connection).await;
    }

    /// Deliver `payload` to every registered connection, the sender included.
    ///
    /// Each connection present when the lock is taken gets exactly one
    /// attempt. Connections whose send fails are removed and closed before
    /// the lock is released; delivery to the rest continues.
    pub async fn broadcast(&self, payload: &Payload) {
        let mut conns = self.connections.lock().await;
        let recipients = conns.len();

        let mut failed = Vec::new();
        for conn in conns.values() {
            if let Err(error) = self.deliver(conn.as_ref(), payload).await {
                warn!(conn_id = %conn.id(), %error, "failed to send message to client");
                failed.push(conn.id().clone());
            }
        }

        for id in &failed {
            if let Some(conn) = conns.remove(id) {
                self.close_connection(conn.as_ref()).await;
            }
        }

        let evicted = failed.len();
        metrics::counter!(WS_MESSAGES_BROADCAST_TOTAL).increment(1);
        if evicted > 0 {
            metrics::counter!(WS_BROADCAST_EVICTIONS_TOTAL).increment(evicted as u64);
            metrics::counter!(WS_DISCONNECTIONS_TOTAL).increment(evicted as u64);
            record_active(conns.len());
        }
        debug!(recipients, evicted, bytes = payload.len(), "broadcast message");
    }

    /// Close and forget every connection. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let mut conns = self.connections.lock().await;
        let count = conns.len();
        for (_, conn) in conns.drain() {
            self.close_connection(conn.as_ref()).await;
        }
        if count > 0 {
            metrics::counter!(WS_DISCONNECTIONS_TOTAL).increment(count as u64);
            record_active(0);
            debug!(count, "closed all connections");
        }
        count
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Whether `id` is currently registered.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().await.contains_key(id)
    }

    /// Close `conn`, giving up after the send timeout. A peer that stalled
    /// a data frame stalls the Close frame too.
    async fn close_connection(&self, conn: &dyn MessageSink) {
        match self.send_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, conn.close()).await.is_err() {
                    warn!(conn_id = %conn.id(), "timed out closing client, dropping it");
                }
            }
            None => conn.close().await,
        }
    }

    async fn deliver(&self, conn: &dyn MessageSink, payload: &Payload) -> Result<(), SendError> {
        match self.send_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.send(payload))
                .await
                .unwrap_or(Err(SendError::TimedOut)),
            None => conn.send(payload).await,
        }
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(count: usize) {
    metrics::gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
}
