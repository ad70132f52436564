//! Request handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AppError, AppState};
use crate::conversation::{Phase, Transcript};
use crate::export::{compose_pdf, export_filename, RenderedReport};
use crate::runtime::ConversationRuntime;
use crate::topics::Topic;

pub async fn list_topics(State(state): State<AppState>) -> Json<Vec<Topic>> {
    Json(state.topics.all().to_vec())
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub topic_id: u32,
}

#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub topic: Topic,
    pub transcript: Transcript,
    pub phase: Phase,
    pub busy: bool,
}

async fn view(runtime: &Arc<ConversationRuntime>) -> ConversationView {
    let (transcript, phase) = runtime.snapshot().await;
    ConversationView {
        id: runtime.id,
        topic: runtime.topic().clone(),
        busy: phase.is_busy(),
        transcript,
        phase,
    }
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationView>), AppError> {
    let topic = state
        .topics
        .get(request.topic_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown topic {}", request.topic_id)))?
        .clone();

    let runtime = state.conversations.create(topic).await;
    tracing::info!(conversation = %runtime.id, topic_id = request.topic_id, "conversation created");
    Ok((StatusCode::CREATED, Json(view(&runtime).await)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationView>, AppError> {
    let runtime = state.conversations.get(id).await?;
    Ok(Json(view(&runtime).await))
}

#[derive(Debug, Deserialize)]
pub struct SubmitTurnRequest {
    pub text: String,
    #[serde(default)]
    pub suggested: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitTurnResponse {
    pub accepted: bool,
}

/// Submit a user turn. A rejected submission (busy, or empty after trimming)
/// is not an error; the client treats it as a no-op.
pub async fn submit_turn(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitTurnRequest>,
) -> Result<Json<SubmitTurnResponse>, AppError> {
    let runtime = state.conversations.get(id).await?;
    let accepted = runtime.submit(request.text, request.suggested).await;
    Ok(Json(SubmitTurnResponse { accepted }))
}

pub async fn reset_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationView>, AppError> {
    let runtime = state.conversations.get(id).await?;
    runtime.reset().await;
    Ok(Json(view(&runtime).await))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub student_info: String,
    /// Base64-encoded PNGs rendered by the client.
    pub header_png: String,
    pub transcript_png: String,
}

pub async fn export_transcript(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, AppError> {
    let runtime = state.conversations.get(id).await?;

    let report = RenderedReport {
        header_png: decode_image(&request.header_png)?,
        transcript_png: decode_image(&request.transcript_png)?,
    };

    let pdf = tokio::task::spawn_blocking(move || compose_pdf(&report))
        .await
        .map_err(|error| AppError::Internal(error.to_string()))??;

    let filename = export_filename(
        &request.student_info,
        &runtime.topic().philosopher,
        chrono::Local::now().date_naive(),
    );
    tracing::info!(conversation = %id, filename, bytes = pdf.len(), "transcript exported");

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename*=UTF-8''{}", rfc5987_encode(&filename)),
            ),
        ],
        pdf,
    )
        .into_response())
}

fn decode_image(encoded: &str) -> Result<Vec<u8>, AppError> {
    // Tolerate a data-URL prefix from canvas.toDataURL().
    let encoded = encoded.rsplit(',').next().unwrap_or(encoded);
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|error| AppError::BadRequest(format!("invalid image encoding: {error}")))
}

/// Percent-encode a filename for the RFC 5987 `filename*` parameter.
fn rfc5987_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    encoded
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GuidePrefs {
    pub seen: bool,
}

pub async fn get_guide_seen(State(state): State<AppState>) -> Result<Json<GuidePrefs>, AppError> {
    Ok(Json(GuidePrefs {
        seen: state.prefs.guide_seen()?,
    }))
}

pub async fn set_guide_seen(
    State(state): State<AppState>,
    Json(request): Json<GuidePrefs>,
) -> Result<StatusCode, AppError> {
    state.prefs.set_guide_seen(request.seen)?;
    Ok(StatusCode::NO_CONTENT)
}
