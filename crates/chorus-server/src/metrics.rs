//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format, or an empty body without a recorder.
pub fn render(handle: Option<&PrometheusHandle>) -> String {
    handle.map(PrometheusHandle::render).unwrap_or_default()
}

// Metric name constants to avoid typos.

/// WebSocket connections registered total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections removed total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Messages fanned out by the registry (counter).
pub const WS_MESSAGES_BROADCAST_TOTAL: &str = "ws_messages_broadcast_total";
/// Connections evicted after a failed send (counter).
pub const WS_BROADCAST_EVICTIONS_TOTAL: &str = "ws_broadcast_evictions_total";
