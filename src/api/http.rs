//! HTTP API Server
//!
//! Dashboard endpoints under `/api`, guarded by an optional shared token.

use std::sync::Arc;

use axum::{
    extract::{Json, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::monitor::TzOffset;
use crate::wg::validate_public_key;

/// Header carrying the dashboard token
pub const TOKEN_HEADER: &str = "x-aegis-token";

/// Shared application state
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub auth_token: Option<String>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(config: ApiConfig, gateway: Arc<Gateway>) -> Self {
        let state = Arc::new(AppState {
            gateway,
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
        });
        Self { config, state }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/health", get(handle_health))
            .route("/peers", get(handle_peers))
            .route("/peers/labels", get(handle_labels))
            .route("/peers/label", post(handle_set_label))
            .route("/wg/add", post(handle_add_peer))
            .route("/wg/remove", post(handle_remove_peer))
            .route("/wg/provision", post(handle_provision))
            .route("/monitor/system", get(handle_system))
            .route("/monitor/services", get(handle_services))
            .route("/monitor/traffic", get(handle_traffic))
            .route("/monitor/ssh", get(handle_ssh))
            .route("/monitor/ssh/timeline", get(handle_ssh_timeline))
            .route("/monitor/performance", get(handle_performance))
            .route_layer(middleware::from_fn_with_state(Arc::clone(&self.state), require_token))
            .with_state(Arc::clone(&self.state));

        let mut app = Router::new().nest("/api", api).layer(TraceLayer::new_for_http());
        if self.config.cors_enabled {
            app = app.layer(CorsLayer::permissive());
        }
        app
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }
        if self.state.auth_token.is_none() {
            tracing::warn!("api.auth_token is not set; the API is unauthenticated");
        }

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

#[derive(Debug, Deserialize, Serialize)]
pub struct AddPeerRequest {
    pub public_key: String,
    pub allowed_ip: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RemovePeerRequest {
    pub public_key: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetLabelRequest {
    pub public_key: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct SshQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    #[serde(default)]
    pub tz_offset: i32,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl StatusResponse {
    fn ok(message: Option<&'static str>) -> Json<Self> {
        Json(Self { status: "ok", message })
    }
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Crate errors rendered as `{detail}` with a matching status
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if self.0.is_drift() {
            tracing::error!("Live interface and config file disagree: {}", self.0);
        } else if status.is_server_error() {
            tracing::error!("API request failed: {}", self.0);
        }
        error_response(status, self.0.to_string())
    }
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { detail: detail.into() })).into_response()
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// ============ Middleware ============

async fn require_token(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if let Some(expected) = &state.auth_token {
        match req.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
            None | Some("") => {
                return error_response(StatusCode::UNAUTHORIZED, "Missing auth token")
            }
            Some(token) if token != expected => {
                return error_response(StatusCode::FORBIDDEN, "Invalid auth token")
            }
            Some(_) => {}
        }
    }
    next.run(req).await
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.health().await)
}

async fn handle_peers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "peers": state.gateway.peers().await }))
}

async fn handle_labels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.labels().await)
}

async fn handle_set_label(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetLabelRequest>,
) -> ApiResult<StatusResponse> {
    validate_public_key(&req.public_key)?;
    state.gateway.set_label(&req.public_key, &req.label).await?;
    Ok(StatusResponse::ok(None))
}

async fn handle_add_peer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddPeerRequest>,
) -> ApiResult<StatusResponse> {
    state.gateway.add_peer(&req.public_key, &req.allowed_ip).await?;
    Ok(StatusResponse::ok(Some("peer added")))
}

async fn handle_remove_peer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemovePeerRequest>,
) -> ApiResult<StatusResponse> {
    state.gateway.remove_peer(&req.public_key).await?;
    Ok(StatusResponse::ok(Some("peer removed")))
}

async fn handle_provision(
    State(state): State<Arc<AppState>>,
) -> ApiResult<crate::wg::ProvisionedPeer> {
    Ok(Json(state.gateway.provision().await?))
}

async fn handle_system(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.system_stats().await)
}

async fn handle_services(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "services": state.gateway.services().await }))
}

async fn handle_traffic(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "peers": state.gateway.traffic().await }))
}

async fn handle_ssh(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SshQuery>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "events": state.gateway.ssh_events(query.limit).await }))
}

async fn handle_ssh_timeline(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<serde_json::Value> {
    let offset = TzOffset::new(query.tz_offset)?;
    Ok(Json(serde_json::json!({ "timeline": state.gateway.ssh_timeline(offset).await })))
}

async fn handle_performance(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.performance().await)
}
