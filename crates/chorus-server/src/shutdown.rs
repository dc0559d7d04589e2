//! Shutdown: stop accepting, close every client, wait for the listener.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::registry::BroadcastRegistry;

/// How long [`ShutdownCoordinator::drain`] waits before aborting the listener.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// What a drain did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainReport {
    /// Clients that were still registered and got closed.
    pub closed_connections: usize,
    /// Whether the listener task had to be aborted.
    pub aborted: bool,
}

/// Owns the server's cancellation token and the drain sequence.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with the default drain timeout.
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Coordinator that aborts the listener after `drain_timeout`.
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            drain_timeout,
        }
    }

    /// Token the listener stops on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting connections and upgrades.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called. New upgrades
    /// are refused from then on.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, close every registered client, then wait for the
    /// listener task to finish.
    ///
    /// Closing clients first lets their read loops end, so the listener is
    /// not left waiting on open sockets. If the whole sequence outlasts the
    /// drain timeout the listener task is aborted.
    pub async fn drain(&self, listener: JoinHandle<()>, registry: &BroadcastRegistry) -> DrainReport {
        self.shutdown();
        let abort = listener.abort_handle();

        let sequence = async {
            let closed = registry.close_all().await;
            info!(closed, "closed client connections");
            let _ = listener.await;
            closed
        };

        match tokio::time::timeout(self.drain_timeout, sequence).await {
            Ok(closed_connections) => DrainReport {
                closed_connections,
                aborted: false,
            },
            Err(_) => {
                warn!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    "drain timed out, aborting listener"
                );
                abort.abort();
                DrainReport {
                    closed_connections: 0,
                    aborted: true,
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
