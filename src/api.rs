//! HTTP API
//!
//! JSON endpoints for topics, conversations, preferences, and transcript
//! export, plus an SSE endpoint streaming conversation events.

mod handlers;
mod sse;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::export::ExportError;
use crate::prefs::{PrefsError, PrefsStore};
use crate::runtime::{ConversationError, ConversationManager};
use crate::topics::TopicCatalog;

#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<ConversationManager>,
    pub topics: Arc<TopicCatalog>,
    pub prefs: PrefsStore,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/topics", get(handlers::list_topics))
        .route("/api/conversations", post(handlers::create_conversation))
        .route("/api/conversations/:id", get(handlers::get_conversation))
        .route("/api/conversations/:id/turns", post(handlers::submit_turn))
        .route(
            "/api/conversations/:id/reset",
            post(handlers::reset_conversation),
        )
        .route(
            "/api/conversations/:id/export",
            post(handlers::export_transcript),
        )
        .route(
            "/api/conversations/:id/stream",
            get(sse::conversation_stream),
        )
        .route(
            "/api/prefs/guide",
            get(handlers::get_guide_seen).put(handlers::set_guide_seen),
        )
        .with_state(state)
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    ExportFailed,
    Internal(String),
}

impl From<ConversationError> for AppError {
    fn from(error: ConversationError) -> Self {
        AppError::NotFound(error.to_string())
    }
}

impl From<PrefsError> for AppError {
    fn from(error: PrefsError) -> Self {
        AppError::Internal(error.to_string())
    }
}

impl From<ExportError> for AppError {
    fn from(error: ExportError) -> Self {
        tracing::error!(%error, "transcript export failed");
        AppError::ExportFailed
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            // The client offers a retry; the message says so.
            AppError::ExportFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "저장 중 오류가 발생했습니다. 다시 시도해주세요.".to_string(),
            ),
            AppError::Internal(detail) => {
                tracing::error!(detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
