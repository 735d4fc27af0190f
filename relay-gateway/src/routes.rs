//! Route definitions for the chat relay.
//!
//! Provides the chat, streaming chat, reset, health, and env-check endpoints
//! plus the static chat UI.

use crate::auth::{access_guard, AccessGuard};
use crate::provider::Provider;
use crate::relay::{ChatInput, ChatRelay, DEFAULT_SESSION_ID};
use crate::session::SessionStore;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use relay_common::config::{Config, UiConfig, UpstreamConfig};
use relay_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: ChatRelay,
    pub key_status: EnvCheckResponse,
}

impl AppState {
    pub fn new(relay: ChatRelay, upstream: &UpstreamConfig) -> Self {
        Self {
            relay,
            key_status: EnvCheckResponse {
                has_key: upstream.has_api_key(),
                length: upstream.api_key_len(),
            },
        }
    }

    /// Build state with a fresh session store for `provider`.
    pub fn from_config(config: &Config, provider: Arc<dyn Provider>) -> Self {
        let store = Arc::new(SessionStore::from_config(&config.session));
        let relay = ChatRelay::new(
            store,
            provider,
            config.upstream.default_model.clone(),
            config.session.max_history,
        );
        Self::new(relay, &config.upstream)
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.relay.store()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `/chat` and `/chat-stream`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Kept untyped so a non-string value is reported as a missing message.
    #[serde(default)]
    pub user_message: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl TryFrom<ChatBody> for ChatInput {
    type Error = Error;

    fn try_from(body: ChatBody) -> Result<Self> {
        let user_message = match body.user_message {
            Some(Value::String(text)) if !text.is_empty() => text,
            _ => return Err(Error::invalid("userMessage required")),
        };

        Ok(ChatInput {
            session_id: body
                .session_id
                .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string()),
            user_message,
            model: body.model.filter(|m| !m.is_empty()),
            system_prompt: body.system_prompt.filter(|p| !p.is_empty()),
        })
    }
}

/// Reply from `/chat`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Body of `/reset`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetBody {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Reply from `/reset`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub ok: bool,
    pub cleared: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: String,
}

/// Upstream key presence, never the key itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvCheckResponse {
    pub has_key: bool,
    pub length: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Build all routes: gated relay endpoints, open info endpoints, static UI.
pub fn build_routes(state: AppState, guard: AccessGuard, ui: &UiConfig) -> Router {
    let relay_routes = Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat-stream", post(chat_stream_handler))
        .route("/reset", post(reset_handler))
        .layer(middleware::from_fn_with_state(guard, access_guard))
        .with_state(state.clone());

    let info_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/env-check", get(env_check_handler))
        .with_state(state);

    Router::new()
        .merge(relay_routes)
        .merge(info_routes)
        .route_service("/", ServeFile::new(ui.index_path()))
        .fallback_service(ServeDir::new(&ui.static_dir))
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_chat_body(body: std::result::Result<Json<ChatBody>, JsonRejection>) -> Result<ChatInput> {
    let Json(body) = body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected chat body");
        Error::invalid("userMessage required")
    })?;
    ChatInput::try_from(body)
}

/// Relay a message and return the full reply.
async fn chat_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>> {
    let input = parse_chat_body(body)?;
    let reply = state.relay.chat(input).await?;
    Ok(Json(ChatReply { reply }))
}

/// Relay a message and stream the reply as chunked plain text.
async fn chat_stream_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response> {
    let input = parse_chat_body(body)?;
    let fragments = state.relay.chat_stream(input).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(fragments))
        .map_err(|e| Error::Internal(format!("Failed to build stream response: {}", e)))
}

/// Clear one session, or every session when no id is given.
async fn reset_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<ResetResponse>> {
    let body: ResetBody = if body.iter().all(u8::is_ascii_whitespace) {
        ResetBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            tracing::debug!(error = %e, "Rejected reset body");
            Error::invalid("Invalid reset body")
        })?
    };

    let cleared = state.store().clear(body.session_id.as_deref());
    tracing::info!(cleared = %cleared, "Sessions reset");

    Ok(Json(ResetResponse {
        ok: true,
        cleared: cleared.to_string(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Info Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Health check handler.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        time: chrono::Utc::now().to_rfc3339(),
    })
}

/// Report whether an upstream key is configured.
async fn env_check_handler(State(state): State<AppState>) -> Json<EnvCheckResponse> {
    Json(state.key_status)
}
