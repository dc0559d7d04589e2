//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while starting or running the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Any other I/O failure on the listener.
    #[error("listener I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer could not be read or extracted.
    #[error("failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),
    /// A value was present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Failure to deliver one frame to one connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The connection was already closed.
    #[error("connection closed")]
    Closed,
    /// The transport rejected the write.
    #[error("transport error: {0}")]
    Transport(String),
    /// The write did not finish within the configured send timeout.
    #[error("send timed out")]
    TimedOut,
}

/// Address helper used in log fields and bind errors.
pub(crate) fn display_addr(host: &str, port: u16) -> String {
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{host}:{port}"),
    }
}
