//! HTTP transport: JSON-RPC over `POST /rpc` plus liveness endpoints.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::engine::EngineState;
use crate::rpc::Dispatcher;

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/rpc", post(rpc))
        .with_state(dispatcher)
}

/// Serve until `shutdown` resolves, then stop the rendering engine.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("Listening on http://{}", addr);

    let result = axum::serve(listener, router(dispatcher.clone()))
        .with_graceful_shutdown(shutdown)
        .await;

    tracing::info!("Server stopped accepting requests");
    dispatcher.service().shutdown().await;
    result.map_err(Into::into)
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn health(State(dispatcher): State<Arc<Dispatcher>>) -> Json<serde_json::Value> {
    let (state, version) = dispatcher.service().health().await;
    let status = match state {
        EngineState::Ready | EngineState::Uninitialized | EngineState::Starting => "ok",
        _ => "degraded",
    };
    Json(json!({
        "status": status,
        "engine": state.as_str(),
        "version": version,
    }))
}

async fn rpc(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> Response {
    match dispatcher.handle(&body).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
