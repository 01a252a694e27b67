//! Streamable HTTP transport
//!
//! `POST /mcp` carries one JSON-RPC message per request with the project in
//! the `X-Project-Root` header. `DELETE /mcp` ends a session and
//! `GET /health` answers without touching any project.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::mcp::context::PROJECT_ROOT_HEADER;
use crate::mcp::protocol::JsonRpcMessage;
use crate::mcp::server::McpServer;
use crate::mcp::session::{SESSION_HEADER, SessionStore};

#[derive(Clone)]
pub struct HttpState {
    server: Arc<McpServer>,
    sessions: Arc<SessionStore>,
}

/// Build the HTTP router around `server`
#[inline]
pub fn router(server: Arc<McpServer>, sessions: Arc<SessionStore>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mcp", post(handle_post).delete(handle_delete))
        .with_state(HttpState { server, sessions })
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` on `listener` until `shutdown` is cancelled
#[inline]
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("MCP server listening on http://{}/mcp", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP transport stopped");
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn handle_post(State(state): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    let project = header_str(&headers, PROJECT_ROOT_HEADER);

    let Ok(value) = serde_json::from_str::<Value>(&body) else {
        return respond(state.server.handle_raw(&body, project).await, None);
    };

    let mut opened = None;
    if value.get("method").and_then(Value::as_str) == Some("initialize") {
        opened = Some(state.sessions.create());
    } else if let Some(session) = header_str(&headers, SESSION_HEADER) {
        if !state.sessions.touch(session) {
            debug!("Rejecting request for unknown session {}", session);
            return (StatusCode::NOT_FOUND, "Session not found").into_response();
        }
    }

    respond(state.server.handle_value(value, project).await, opened)
}

async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> StatusCode {
    match header_str(&headers, SESSION_HEADER) {
        None => StatusCode::BAD_REQUEST,
        Some(session) if state.sessions.remove(session) => {
            debug!("Closed session {}", session);
            StatusCode::NO_CONTENT
        }
        Some(_) => StatusCode::NOT_FOUND,
    }
}

fn respond(message: Option<JsonRpcMessage>, session: Option<String>) -> Response {
    let mut response = match message {
        Some(message) => Json(message).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Some(value) = session.and_then(|id| HeaderValue::from_str(&id).ok()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    response
}
