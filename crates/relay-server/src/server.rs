//! `RelayServer`: Axum HTTP + WebSocket front end for the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::HubHandle;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::identity::ClientIdentity;
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Entry point into the hub.
    pub hub: HubHandle,
    /// Per-connection settings.
    pub session: SessionConfig,
    /// Max inbound WebSocket message size.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
}

/// The relay's HTTP server.
pub struct RelayServer {
    config: ServerConfig,
    hub: HubHandle,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server in front of a running hub.
    pub fn new(
        config: ServerConfig,
        hub: HubHandle,
        shutdown: Arc<ShutdownCoordinator>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            hub,
            shutdown,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            session: self.config.session.clone(),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in a background task until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();
        info!(%addr, "relay server listening");

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "http server failed");
            }
            info!("http server stopped");
        });
        Ok((addr, handle))
    }

    /// The hub this server registers clients with.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws: authenticate from headers, then upgrade.
async fn ws_handler(
    ClientIdentity(identity): ClientIdentity,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let AppState {
        hub,
        session,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, identity, hub, session))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let stats = state.hub.stats().await.ok();
    let status = if stats.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health::health_check(state.start_time, stats)))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    crate::metrics::render(&state.metrics)
}
