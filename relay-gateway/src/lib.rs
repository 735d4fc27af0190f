//! Relay Gateway - HTTP chat relay in front of a completion API.
//!
//! This crate provides:
//! - Per-session conversation history with LRU-bounded storage
//! - History trimming that keeps the leading system message
//! - Blocking and streaming completion relays
//! - Optional shared-secret access guard
//!
//! ## Architecture
//!
//! ```text
//! Client → access guard → session lock → trim → Provider → commit → Client
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod auth;
pub mod history;
pub mod provider;
pub mod relay;
pub mod routes;
pub mod session;

pub use auth::AccessGuard;
pub use history::trim_history;
pub use provider::{
    ChatRequest, ChatResponse, FragmentStream, Message, OpenAIProvider, Provider, ProviderError,
    Role, TokenUsage,
};
pub use relay::{ChatInput, ChatRelay, ReplyStream};
pub use routes::AppState;
pub use session::{Cleared, SessionGuard, SessionStore};

use axum::Router;
use relay_common::config::Config;
use relay_common::logging::generate_request_id;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the relay router with all routes and middleware.
pub fn build_router(state: AppState, config: &Config) -> relay_common::Result<Router> {
    let guard = AccessGuard::from_config(&config.auth)?;
    if !guard.is_enabled() {
        tracing::warn!("No shared secret configured, relay endpoints are open");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &axum::extract::Request| {
        tracing::info_span!(
            "http",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %generate_request_id(),
        )
    });

    Ok(routes::build_routes(state, guard, &config.ui)
        .layer(cors)
        .layer(trace))
}

/// Start the relay server with the OpenAI-compatible upstream provider.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let provider: Arc<dyn Provider> = Arc::new(OpenAIProvider::from_config(&config.upstream));
    let provider_name = provider.name().to_string();
    let state = AppState::from_config(config, provider);
    let router = build_router(state, config)?;

    if !config.upstream.has_api_key() {
        tracing::warn!("No upstream API key configured, completion calls will fail");
    }

    let addr = config.listen_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        provider = %provider_name,
        model = %config.upstream.default_model,
        max_history = config.session.max_history,
        max_sessions = config.session.max_sessions,
        "Starting chat relay"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
