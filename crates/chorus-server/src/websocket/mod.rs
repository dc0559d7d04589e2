//! `WebSocket` handling: per-client send handles, the broadcast registry, and
//! the read loop that feeds it.

pub mod connection;
pub mod registry;
pub mod session;
