//! `RelayServer`: axum HTTP + WebSocket listener and dispatcher.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Extension, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::chat::serve_chat;
use crate::websocket::feed::serve_feed;
use crate::websocket::registry::ConnectionRegistry;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration.
    pub config: Arc<ServerConfig>,
    /// Chat fan-out (owns the connection registry).
    pub broadcaster: Arc<Broadcaster>,
    /// Shutdown coordinator; connection tokens are children of its token.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// One permit per open WebSocket across both endpoints.
    pub connection_slots: Arc<Semaphore>,
    /// Connected feed clients.
    pub active_feeds: Arc<AtomicUsize>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry, config.echo));
        let connection_slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            state: AppState {
                config: Arc::new(config),
                broadcaster,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                connection_slots,
                active_feeds: Arc::new(AtomicUsize::new(0)),
                start_time: Instant::now(),
                metrics,
            },
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let config = &self.state.config;
        Router::new()
            .route(&config.chat_path, get(chat_handler))
            .route(&config.feed_path, get(feed_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!(
            %addr,
            chat_path = %config.chat_path,
            feed_path = %config.feed_path,
            max_connections = config.max_connections,
            "relay server listening"
        );

        let app = self.router();
        let token = self.state.shutdown.token();
        let server = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("relay server stopped");
        });
        Ok((addr, server))
    }

    /// Get the chat broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.state.broadcaster
    }

    /// Get the chat connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.state.broadcaster.registry()
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Number of connected feed clients.
    pub fn feed_connections(&self) -> usize {
        self.state.active_feeds.load(Ordering::Relaxed)
    }
}

/// Take a connection slot, or `None` when the server is full.
fn acquire_slot(state: &AppState, endpoint: &'static str) -> Option<OwnedSemaphorePermit> {
    let permit = Arc::clone(&state.connection_slots).try_acquire_owned().ok();
    if permit.is_none() {
        counter!(WS_REJECTED_TOTAL, "endpoint" => endpoint).increment(1);
        warn!(
            endpoint,
            max_connections = state.config.max_connections,
            "connection limit reached, rejecting upgrade"
        );
    }
    permit
}

fn service_unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response()
}

/// GET {chat path}
async fn chat_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    State(state): State<AppState>,
) -> Response {
    let Some(permit) = acquire_slot(&state, "chat") else {
        return service_unavailable();
    };
    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            serve_chat(
                socket,
                peer,
                Arc::clone(&state.broadcaster),
                Arc::clone(&state.config),
                state.shutdown.token(),
            )
            .await;
            drop(permit);
        })
}

/// GET {feed path}
async fn feed_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    State(state): State<AppState>,
) -> Response {
    let Some(permit) = acquire_slot(&state, "feed") else {
        return service_unavailable();
    };
    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            serve_feed(
                socket,
                peer,
                Arc::clone(&state.config),
                state.shutdown.token(),
                Arc::clone(&state.active_feeds),
            )
            .await;
            drop(permit);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.broadcaster.registry().len(),
        state.active_feeds.load(Ordering::Relaxed),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(&state.metrics),
    )
}
