use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::monitor::ChatMonitor;
use crate::types::{FlaggedRecord, MessageEvent, UserStatus};

pub mod websocket;

/// Sent back over the socket for any frame that cannot be screened
pub const PROCESSING_ERROR_TEXT: &str = "Error processing message. Please try again.";

/// Chat text that asks for a self reset
pub const RESET_COMMAND: &str = "/reset";

const UNKNOWN: &str = "Unknown";

/// Shared by every handler; cloning only bumps the `Arc`
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<ChatMonitor>,
    pub max_message_length: usize,
}

impl AppState {
    pub fn new(monitor: Arc<ChatMonitor>, max_message_length: usize) -> Self {
        Self {
            monitor,
            max_message_length,
        }
    }

    /// The single path both adapters use to hand a message to the engine
    pub fn handle_message(&self, event: &MessageEvent) -> Result<Vec<String>, ApiError> {
        validate_message(&event.user_id, &event.content, self.max_message_length)?;

        if event.content.trim() == RESET_COMMAND && self.monitor.allows_self_reset() {
            return Ok(vec![self.monitor.reset(&event.user_id)]);
        }

        Ok(self.monitor.screen_event(event)?)
    }
}

pub struct WebServer {
    state: AppState,
}

impl WebServer {
    pub fn new(monitor: Arc<ChatMonitor>, config: &MonitorConfig) -> Self {
        Self {
            state: AppState::new(monitor, config.screening.max_message_length),
        }
    }

    pub fn router(&self) -> Router {
        create_routes(self.state.clone())
    }

    /// Serve until `shutdown` resolves
    pub async fn start_server<F>(&self, bind_address: &str, port: u16, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        let addr = format!("{}:{}", bind_address, port);
        info!("Binding to {}...", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Chat API available at http://{}/users/chat/{{user_id}}", addr);
        info!("Alarm socket available at ws://{}/ws/alarm", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Web server stopped");
        Ok(())
    }
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // Chat screening
        .route("/users/chat/:user_id", post(post_chat))
        .route("/users/chat/reset/:user_id", post(post_reset))
        .route("/users/chat/:user_id/status", get(get_user_status))

        // Moderation
        .route("/users/flagged-users", get(get_flagged_users))
        .route("/users/flagged-users/:user_id", get(get_flag_history))

        .route("/api/status", get(get_status))
        .route("/ws/alarm", get(websocket::websocket_handler))

        // Browser clients are served from another origin
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Rejections surfaced to HTTP clients
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        if err.is_unavailable() {
            error!("Screening unavailable: {}", err);
            ApiError::Unavailable(err.to_string())
        } else {
            error!("Screening failed: {}", err);
            ApiError::Unavailable(format!("screening failed: {}", err))
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "{}", msg),
            ApiError::Unavailable(msg) => write!(f, "{}", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string()
        }));
        (status, body).into_response()
    }
}

pub fn validate_message(user_id: &str, message: &str, max_length: usize) -> Result<(), ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user id must not be blank".to_string()));
    }
    if message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    let length = message.chars().count();
    if length > max_length {
        return Err(ApiError::BadRequest(format!(
            "message is {} characters, limit is {}",
            length, max_length
        )));
    }
    Ok(())
}

fn or_unknown(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

// API Route Handlers

async fn post_chat(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Vec<String>>, ApiError> {
    let event = MessageEvent::new(
        user_id,
        or_unknown(request.username),
        request.message,
        or_unknown(request.location),
    );
    let alerts = state.handle_message(&event).map_err(|e| {
        warn!("Rejected chat message from {}: {}", event.user_id, e);
        e
    })?;
    Ok(Json(alerts))
}

async fn post_reset(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<String, ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user id must not be blank".to_string()));
    }
    Ok(state.monitor.reset(&user_id))
}

async fn get_user_status(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<UserStatus> {
    Json(state.monitor.status(&user_id))
}

async fn get_flagged_users(State(state): State<AppState>) -> Json<Vec<FlaggedRecord>> {
    Json(state.monitor.list_flagged())
}

async fn get_flag_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<FlaggedRecord>>, StatusCode> {
    let history = state.monitor.flag_history(&user_id);
    if history.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(history))
}

async fn get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": {
            "status": "running",
            "timestamp": chrono::Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
            "stats": state.monitor.stats(),
            "categories": state.monitor.categories(),
            "lastFlaggedAt": state.monitor.last_flagged_at()
        }
    }))
}
