// Swarm Gate - HTTP Transport
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// axum front end: authenticated JSON-RPC on /mcp, unauthenticated health
// probes, and a request log line per call.

use crate::auth::{AuthError, Authenticator};
use crate::mcp::{McpServer, RequestMeta, PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION};
use crate::session::derive_session_id;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SESSION_HEADER: &str = "x-session-id";
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";
pub const TASK_TYPE_HEADER: &str = "x-task-type";

/// Health probes must answer even when the engine hangs.
const DOCKER_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(server: Arc<McpServer>, auth: Authenticator) -> Self {
        Self {
            server,
            auth: Arc::new(auth),
        }
    }

    async fn docker_reachable(&self) -> bool {
        let docker = self.server.executor().docker();
        matches!(
            tokio::time::timeout(DOCKER_PROBE_TIMEOUT, docker.ping()).await,
            Ok(Ok(true))
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/mcp", post(mcp_endpoint))
        .route("/mcp/", post(mcp_endpoint))
        .route("/mcp/health", get(health))
        .route("/mcp/healthz", get(healthz))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    log::info!(
        "{} v{} listening on http://{} ({} tools)",
        SERVER_NAME,
        SERVER_VERSION,
        listener.local_addr()?,
        state.server.tool_count()
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for ctrl-c: {}", e);
        return;
    }
    log::info!("Shutdown signal received");
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let has_query_token = request
        .uri()
        .query()
        .map(|q| q.to_ascii_lowercase().contains("accesstoken="))
        .unwrap_or(false);
    if has_query_token {
        log::warn!("Query parameter authentication is unsupported; remove accessToken from URL");
    }

    let started = Instant::now();
    let response = next.run(request).await;
    log::info!(
        "{} {} -> {} in {:.1}ms",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    response
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn root() -> Json<Value> {
    Json(json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "protocol_version": PROTOCOL_VERSION,
        "routes": {
            "mcp": "POST /mcp",
            "health": "GET /mcp/health",
            "healthz": "GET /mcp/healthz",
        },
    }))
}

fn auth_failure(err: AuthError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
    let body = Json(json!({ "detail": err.to_string() }));
    if status == StatusCode::UNAUTHORIZED {
        (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
    } else {
        (status, body).into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn mcp_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let principal = match state.auth.authenticate(
        header_str(&headers, header::AUTHORIZATION.as_str()),
        header_str(&headers, ACCESS_TOKEN_HEADER),
    ) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Rejected MCP request: {}", e);
            return auth_failure(e);
        }
    };

    let session_id = derive_session_id(header_str(&headers, SESSION_HEADER), Some(&principal.credential));
    let mut meta = RequestMeta::new(session_id, principal);
    meta.task_type_header = header_str(&headers, TASK_TYPE_HEADER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    match state.server.handle_raw(&body, &meta).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::OK.into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let docker_reachable = state.docker_reachable().await;
    Json(json!({
        "status": if docker_reachable { "healthy" } else { "degraded" },
        "docker_reachable": docker_reachable,
        "version": SERVER_VERSION,
    }))
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let docker_reachable = state.docker_reachable().await;
    let tool_count = state.server.tool_count();
    let auth_configured = state.auth.is_configured();
    let mcp_ready = tool_count > 0;
    let status = if !mcp_ready {
        "unhealthy"
    } else if docker_reachable && auth_configured {
        "healthy"
    } else {
        "degraded"
    };
    Json(json!({
        "status": status,
        "mcp_ready": mcp_ready,
        "docker_reachable": docker_reachable,
        "auth_configured": auth_configured,
        "tool_count": tool_count,
        "session_count": state.server.sessions().len(),
        "protocol_version": PROTOCOL_VERSION,
        "version": SERVER_VERSION,
        "endpoints": {
            "mcp_jsonrpc": "/mcp",
            "health": "/mcp/health",
            "detailed_health": "/mcp/healthz",
        },
    }))
}

// ============================================================================
// TESTS
// ============================================================================
