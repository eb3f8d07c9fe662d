use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use embebot_gateway::{GatewayError, GatewayHandle};
use embebot_telemetry::{LogQuery, TelemetryGuard};

use crate::auth::require_control_token;
use crate::health::start_health_check;
use crate::retention::start_log_retention;

/// Control surface configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub health_interval: Duration,
    pub request_timeout: Duration,
    /// Persisted log records older than this are deleted.
    pub log_retention: Duration,
    pub retention_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            health_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            log_retention: Duration::from_secs(7 * 24 * 3600),
            retention_interval: Duration::from_secs(3600),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: GatewayHandle,
    pub telemetry: TelemetryGuard,
    /// Bearer token for `/connect`, `/disconnect` and `/logs`. Without one
    /// those routes only answer loopback peers.
    pub control_token: Option<SecretString>,
}

/// Serve with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// guarded routes read the peer address.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let guarded = Router::new()
        .route("/connect", post(connect_handler))
        .route("/disconnect", post(disconnect_handler))
        .route("/logs", get(logs_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_control_token,
        ));

    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .merge(guarded)
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_methods([Method::GET, Method::POST]))
}

/// Bind the control surface and start the health check and log retention.
/// All of them stop when `cancel` fires.
pub async fn start(
    config: ServerConfig,
    state: AppState,
    cancel: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let health = start_health_check(state.gateway.clone(), config.health_interval, cancel.clone());
    let retention = start_log_retention(
        state.telemetry.clone(),
        config.log_retention,
        config.retention_interval,
        cancel.clone(),
    );
    if state.control_token.is_none() {
        tracing::warn!("no control token set, guarded routes accept loopback peers only");
    }

    let router = build_router(state, config.request_timeout);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "control server started");

    let server = tokio::spawn(async move {
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "control server failed");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        health,
        retention,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    server: JoinHandle<()>,
    health: JoinHandle<()>,
    retention: JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for every task after cancellation.
    pub async fn join(self) {
        let _ = self.server.await;
        let _ = self.health.await;
        let _ = self.retention.await;
    }
}

fn gateway_error(e: GatewayError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

async fn connect_handler(State(state): State<AppState>) -> Response {
    match state.gateway.connect().await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => gateway_error(e),
    }
}

async fn disconnect_handler(State(state): State<AppState>) -> Response {
    match state.gateway.disconnect().await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => gateway_error(e),
    }
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match state.gateway.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => gateway_error(e),
    }
}

/// 200 while the actor answers, with `connected` reporting the socket.
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.gateway.status().await {
        Ok(status) => {
            let label = if status.connected { "healthy" } else { "degraded" };
            Json(json!({ "status": label, "connected": status.connected })).into_response()
        }
        Err(e) => gateway_error(e),
    }
}

async fn logs_handler(State(state): State<AppState>, Query(query): Query<LogQuery>) -> Response {
    let Some(sink) = state.telemetry.logs() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "log sink disabled" })),
        )
            .into_response();
    };
    match sink.query(&query) {
        Ok(records) => Json(records).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
