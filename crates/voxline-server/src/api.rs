//! Read-only conversation and lead API.

use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use voxline_store::{
    clamp_days, clamp_limit, daily_statistics, get_conversation, list_leads, list_recent,
    ConversationSummary, DailyStatistics, LeadSummary, StoredConversation,
};
use voxline_types::LeadTemperature;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => {
                tracing::error!("request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LeadParams {
    pub temperature: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub days: u32,
    pub since: String,
    pub statistics: Vec<DailyStatistics>,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Serialize)]
pub struct LeadsResponse {
    pub temperature: LeadTemperature,
    pub leads: Vec<LeadSummary>,
}

/// Handler for `GET /api/conversations`.
pub async fn list_conversations_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let limit = clamp_limit(params.limit);

    let conversations = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;
        list_recent(&conn, limit)
            .map_err(|e| ApiError::InternalServerError(format!("db query failed: {}", e)))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    Ok(Json(ConversationsResponse { conversations }))
}

/// Handler for `GET /api/conversations/{callSid}`.
pub async fn get_conversation_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_sid): Path<String>,
) -> Result<Json<StoredConversation>, ApiError> {
    let lookup = call_sid.clone();
    let conversation = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;
        get_conversation(&conn, &lookup)
            .map_err(|e| ApiError::InternalServerError(format!("db query failed: {}", e)))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    conversation
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("conversation not found: {}", call_sid)))
}

/// Handler for `GET /api/leads`. Temperature defaults to `hot`.
pub async fn list_leads_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<LeadParams>,
) -> Result<Json<LeadsResponse>, ApiError> {
    let temperature = match params.temperature.as_deref() {
        None => LeadTemperature::Hot,
        Some(raw) => raw
            .parse::<LeadTemperature>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };
    let limit = clamp_limit(params.limit);

    let leads = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;
        list_leads(&conn, temperature, limit)
            .map_err(|e| ApiError::InternalServerError(format!("db query failed: {}", e)))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    Ok(Json(LeadsResponse { temperature, leads }))
}

/// Handler for `GET /api/statistics`. Covers today and the preceding `days` days.
pub async fn statistics_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<StatisticsParams>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let days = clamp_days(params.days);
    let since = chrono::Utc::now().date_naive() - chrono::Days::new(u64::from(days));

    let statistics = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;
        daily_statistics(&conn, since)
            .map_err(|e| ApiError::InternalServerError(format!("db query failed: {}", e)))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    Ok(Json(StatisticsResponse {
        days,
        since: since.format("%Y-%m-%d").to_string(),
        statistics,
    }))
}
