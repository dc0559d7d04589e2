//! # chorus-server
//!
//! Axum HTTP + `WebSocket` broadcast hub.
//!
//! - `WebSocket` gateway: every data frame a client sends is relayed to every
//!   connected client, sender included
//! - Connection registry with inline eviction of clients whose sends fail
//! - HTTP endpoints: health check, Prometheus metrics, static client page
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod origin;
pub mod server;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
mod testutil;

pub use config::ServerConfig;
pub use errors::{ConfigError, SendError, ServerError};
pub use server::ChorusServer;
pub use shutdown::{DrainReport, ShutdownCoordinator};
pub use websocket::connection::{ClientConnection, ConnectionId, MessageSink, Payload};
pub use websocket::registry::BroadcastRegistry;
