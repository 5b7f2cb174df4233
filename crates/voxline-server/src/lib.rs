//! Voxline server library logic.

pub mod api;
pub mod config;
pub mod lifecycle;
pub mod media_stream;
pub mod postcall;
pub mod registry;
pub mod sink;
pub mod twiml;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use lifecycle::Lifecycle;
use registry::CallRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use voxline_db::DbPool;
use voxline_voice::TurnOrchestrator;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Drives one call per media-stream socket.
    pub orchestrator: TurnOrchestrator,
    /// Calls currently connected.
    pub registry: CallRegistry,
    /// Host name placed in the media-stream URL, if configured.
    pub public_host: Option<String>,
    /// Shutdown signal and task tracking shared with the sink.
    pub lifecycle: Lifecycle,
}

/// Maximum request body size (64 KiB). Webhook form bodies are small.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_calls": state.registry.len()
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/incoming-call", post(twiml::incoming_call_handler))
        .route("/media-stream", get(media_stream::media_stream_handler))
        .route("/api/conversations", get(api::list_conversations_handler))
        .route(
            "/api/conversations/{callSid}",
            get(api::get_conversation_handler),
        )
        .route("/api/leads", get(api::list_leads_handler))
        .route("/api/statistics", get(api::statistics_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
