//! HTTP server hosting the live event stream.

use crate::config::{self, Config};
use crate::stream::{self, Session};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Path of the live event stream.
pub const LIVE_PATH: &str = "/api/live";

/// Shared state for the server.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    /// Latched to true on shutdown. Live bodies end when they see it, including
    /// bodies subscribed after it was set.
    pub shutdown_tx: watch::Sender<bool>,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            shutdown_tx,
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route(LIVE_PATH, get(live_stream))
        .with_state(state)
}

/// Run the server; binds to config.server.bind:config.server.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_server(config: Config) -> Result<()> {
    let bind = config.server.bind.trim().to_string();
    let port = config.server.port;
    if !config::is_loopback_bind(&bind) {
        log::warn!("binding to {}; live stream consumers are not authenticated", bind);
    }
    let listener = TcpListener::bind((bind.as_str(), port))
        .await
        .with_context(|| format!("binding to {}:{}", bind, port))?;
    log::info!("server listening on {}:{}", bind, port);
    serve(listener, ServerState::new(config), shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` completes, then end
/// every live stream and wait for connections to drain.
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown_tx = state.shutdown_tx.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("shutdown requested, ending live streams and draining connections");
            shutdown_tx.send_replace(true);
        })
        .await
        .context("server exited")?;
    log::info!("server stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// GET / returns a simple health JSON for liveness checks.
async fn health_http(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.server.port,
    }))
}

/// GET /api/live opens a session and streams it as `text/event-stream`.
/// Once shutdown has started no new session is opened.
async fn live_stream(State(state): State<ServerState>) -> Response {
    if *state.shutdown_tx.borrow() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let (transport, frames) = stream::channel(stream::QUEUE_CAPACITY);
    let session = Session::open(transport);
    let body = stream::live_body(session, frames, state.shutdown_tx.subscribe());
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
