//! HTTP front door
//!
//! `POST /query` runs one query against the shared peer and returns the full
//! transcript. Any aborted query is a 500 with the error message; a partial
//! transcript is never returned as success.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use relay_core::{Message, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::agent::AgentLoop;
use crate::dispatch::ToolPeer;

/// Shared state for the front door
pub struct AppState<P> {
    pub peer: Arc<Mutex<P>>,
    pub agent: AgentLoop,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub messages: Vec<Message>,
}

/// Build the router
pub fn build_router<P: ToolPeer + 'static>(state: Arc<AppState<P>>) -> Router {
    Router::new()
        .route("/query", post(query_handler::<P>))
        .route("/health", get(health_handler::<P>))
        .route("/tools", get(tools_handler::<P>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn query_handler<P: ToolPeer + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Json(request): Json<QueryRequest>,
) -> Response {
    // Held for the whole query: one conversation per peer at a time
    let peer = state.peer.lock().await;
    let result = state.agent.run(&*peer, &request.query).await;
    drop(peer);

    match result {
        Ok(messages) => Json(QueryResponse { messages }).into_response(),
        Err(e) => {
            error!(error = %e, "Query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn health_handler<P: ToolPeer + 'static>(
    State(state): State<Arc<AppState<P>>>,
) -> Response {
    let (connected, tools) = {
        let peer = state.peer.lock().await;
        (peer.is_connected(), peer.manifest().len())
    };

    if connected {
        Json(json!({ "status": "ok", "tools": tools })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "disconnected", "tools": tools })),
        )
            .into_response()
    }
}

async fn tools_handler<P: ToolPeer + 'static>(
    State(state): State<Arc<AppState<P>>>,
) -> Json<Vec<ToolDescriptor>> {
    Json(state.peer.lock().await.manifest().to_vec())
}

/// Serve until Ctrl-C
pub async fn serve(addr: &str, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(addr = %addr, "Front door listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Front door stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
