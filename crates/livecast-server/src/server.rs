use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use livecast_core::ConnectionId;
use livecast_engine::RelayEngine;
use livecast_telemetry::MetricsRecorder;
use tokio::sync::mpsc;
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry, Heartbeat, InboundFrame};
use crate::config::{ConfigError, ServerConfig};
use crate::handler::ConnectionHandler;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ConnectionHandler>,
    pub message_tx: mpsc::Sender<(ConnectionId, InboundFrame)>,
    pub heartbeat: Heartbeat,
}

/// CORS policy for the upgrade and health routes.
pub fn cors_layer(config: &ServerConfig) -> Result<CorsLayer, ConfigError> {
    let base = CorsLayer::new().allow_methods([Method::GET, Method::OPTIONS]);
    if config.cors_origin == "*" {
        return Ok(base.allow_origin(Any).allow_headers(Any));
    }
    let origin = HeaderValue::from_str(&config.cors_origin)
        .map_err(|e| ConfigError::InvalidValue(format!("corsOrigin: {e}")))?;
    Ok(base
        .allow_origin(AllowOrigin::exact(origin))
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(config.cors_credentials))
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps it running.
pub async fn start(
    config: ServerConfig,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, anyhow::Error> {
    config.validate()?;
    let cors = cors_layer(&config)?;

    let registry = Arc::new(ClientRegistry::new(
        config.max_send_queue,
        config.client_timeout(),
    ));
    let engine = Arc::new(RelayEngine::new(
        registry.clone(),
        metrics,
        config.relay_config(),
    ));
    let handler = Arc::new(ConnectionHandler::new(
        Arc::clone(&engine),
        Arc::clone(&registry),
    ));

    let cleanup = client::start_cleanup_task(Arc::clone(&registry), config.cleanup_interval());

    // Every inbound frame goes through one dispatcher task
    let (msg_tx, msg_rx) = mpsc::channel::<(ConnectionId, InboundFrame)>(1024);
    let dispatcher = tokio::spawn(process_messages(msg_rx, Arc::clone(&handler)));

    let app_state = AppState {
        handler,
        message_tx: msg_tx,
        heartbeat: Heartbeat {
            interval: config.heartbeat_interval(),
        },
    };

    let router = build_router(app_state, cors);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        cors_origin = %config.cors_origin,
        "Livecast relay started"
    );

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Server terminated");
        }
    });

    Ok(ServerHandle {
        local_addr,
        engine,
        registry,
        server,
        dispatcher,
        cleanup,
    })
}

/// Handle returned by `start()`. Dropping it leaves the tasks running;
/// call [`ServerHandle::shutdown`] to stop them.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    engine: Arc<RelayEngine>,
    registry: Arc<ClientRegistry>,
    server: tokio::task::JoinHandle<()>,
    dispatcher: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn engine(&self) -> &Arc<RelayEngine> {
        &self.engine
    }

    pub fn client_count(&self) -> usize {
        self.registry.count()
    }

    pub fn shutdown(self) {
        self.server.abort();
        self.dispatcher.abort();
        self.cleanup.abort();
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let registry = Arc::clone(state.handler.registry());
    let (client_id, rx) = registry.register();
    state.handler.on_connect(&client_id);

    client::handle_ws_connection(
        socket,
        client_id.clone(),
        rx,
        registry,
        state.message_tx,
        state.heartbeat,
    )
    .await;

    state.handler.on_disconnect(&client_id);
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.handler.engine();
    let streams = engine.store().summaries();
    let active = streams.len();
    Json(serde_json::json!({
        "status": "healthy",
        "activeStreams": active,
        "clients": state.handler.registry().count(),
        "streams": streams,
        "metrics": engine.metrics().snapshot(),
    }))
}

/// Process inbound frames from WebSocket clients, one at a time.
async fn process_messages(
    mut rx: mpsc::Receiver<(ConnectionId, InboundFrame)>,
    handler: Arc<ConnectionHandler>,
) {
    while let Some((client_id, frame)) = rx.recv().await {
        handler.dispatch(&client_id, frame);
    }
    tracing::debug!("Message channel closed, dispatcher exiting");
}
