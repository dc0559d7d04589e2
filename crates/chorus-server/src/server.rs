//! `ChorusServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::origin::OriginPolicy;
use crate::shutdown::{DrainReport, ShutdownCoordinator};
use crate::websocket::registry::BroadcastRegistry;
use crate::websocket::session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry shared by every socket task.
    pub registry: Arc<BroadcastRegistry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Origin check applied before upgrading.
    pub origin_policy: Arc<OriginPolicy>,
    /// Refuses new upgrades once shutdown starts.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The Chorus broadcast server.
pub struct ChorusServer {
    config: Arc<ServerConfig>,
    registry: Arc<BroadcastRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl ChorusServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics_handle: Option<PrometheusHandle>) -> Self {
        let registry = BroadcastRegistry::with_send_timeout(config.send_timeout());
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle,
        }
    }

    /// Build the Axum router with all routes.
    ///
    /// The WebSocket path goes to the broadcast pipeline; anything that is
    /// not `/health` or `/metrics` gets the client page.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            config: self.config.clone(),
            origin_policy: Arc::new(OriginPolicy::from_config(&self.config)),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route(&self.config.ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback_service(ServeFile::new(&self.config.index_path))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address and the serving task. Hand the task to
    /// [`stop`](Self::stop) to shut down.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        if self.config.allow_any_origin {
            warn!("accepting WebSocket upgrades from any origin");
        }
        info!(%local_addr, ws_path = %self.config.ws_path, "chorus server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("chorus server stopped");
        });

        Ok((local_addr, handle))
    }

    /// Stop accepting, close every client and wait for `listener` (the task
    /// returned by [`listen`](Self::listen)).
    pub async fn stop(&self, listener: JoinHandle<()>) -> DrainReport {
        self.shutdown.drain(listener, &self.registry).await
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET `<ws_path>`: upgrade and hand the socket to the registry.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        debug!("refusing websocket upgrade during shutdown");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(reason = %rejection.body_text(), "websocket upgrade rejected");
            return rejection.into_response();
        }
    };

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    if !state.origin_policy.allows(origin, host) {
        warn!(origin, host, "websocket origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }

    let registry = state.registry.clone();
    ws.max_message_size(state.config.max_message_size)
        .read_buffer_size(state.config.read_buffer_size)
        .write_buffer_size(state.config.write_buffer_size)
        .on_failed_upgrade(|error| warn!(%error, "websocket upgrade failed"))
        .on_upgrade(move |socket| session::serve_socket(socket, registry))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.connection_count().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(state.metrics_handle.as_ref()),
    )
}
