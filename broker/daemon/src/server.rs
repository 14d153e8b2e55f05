//! HTTP Surface
//!
//! Maps each [`RequestRouter`] operation onto a JSON route:
//!
//! ```text
//! GET  /api/status               -> status()
//! POST /api/chat                 -> chat()
//! POST /api/upload   (multipart) -> upload_document()
//! POST /api/document_question    -> answer_document_question()
//! POST /api/reset                -> reset_session()
//! GET  /api/refresh              -> refresh()
//! GET  /api/models/:model/test   -> test_model()
//! ```
//!
//! Request bodies use camelCase field names. Handlers stay thin: all
//! validation and state changes happen in the router.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use docchat_core::{
    BackendStatus, BrokerError, ChatInput, ChatReply, DocumentQuestion, DocumentUpload,
    ModelState, RequestRouter, UploadOutcome,
};

use crate::api_error::ApiError;

/// Multipart overhead allowed on top of the configured upload size
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

// ============================================================================
// Request and Response Bodies
// ============================================================================

/// Body of `POST /api/chat`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatBody {
    /// Session to continue
    pub session_id: Option<String>,
    /// User message
    pub text: Option<String>,
    /// Base64 image, optionally as a data URL
    pub image: Option<String>,
    /// Model override
    pub model: Option<String>,
}

/// Body of `POST /api/document_question`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentQuestionBody {
    /// The question
    pub text: Option<String>,
    /// Full document text
    #[serde(alias = "pdfText")]
    pub document_text: Option<String>,
    /// Earlier analysis of the document
    pub analysis: Option<String>,
    /// Model override
    pub model: Option<String>,
}

/// Body of `POST /api/reset`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetBody {
    /// Session to reset
    pub session_id: Option<String>,
}

/// Reply to a document question
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    /// Model answer
    pub response_text: String,
}

/// Reply to a session reset
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    /// Confirmation message
    pub status: &'static str,
}

/// Reply to a model test
#[derive(Debug, Serialize)]
pub struct ModelTestResponse {
    /// Model that was probed
    pub model: String,
    /// Its state after the probe
    #[serde(flatten)]
    pub state: ModelState,
}

// ============================================================================
// Router
// ============================================================================

/// Build the HTTP application around a shared broker
pub fn build_router(broker: Arc<RequestRouter>) -> Router {
    let body_limit = broker.settings().storage.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/api/status", get(status))
        .route("/api/chat", post(chat))
        .route("/api/upload", post(upload))
        .route("/api/document_question", post(document_question))
        .route("/api/reset", post(reset))
        .route("/api/refresh", get(refresh))
        .route("/api/models/:model/test", get(test_model))
        .with_state(broker)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

async fn status(State(broker): State<Arc<RequestRouter>>) -> Json<BackendStatus> {
    Json(broker.status().await)
}

async fn chat(
    State(broker): State<Arc<RequestRouter>>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let body = json_body(payload)?;
    let reply = broker
        .chat(ChatInput {
            session_id: body.session_id,
            text: body.text.unwrap_or_default(),
            image: body.image,
            model: body.model,
        })
        .await?;
    Ok(Json(reply))
}

async fn upload(
    State(broker): State<Arc<RequestRouter>>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" && name != "pdf" {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        upload = Some(DocumentUpload {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    let upload = upload
        .ok_or_else(|| BrokerError::Validation("No PDF file provided".to_string()))?;
    tracing::info!(file = %upload.file_name, bytes = upload.bytes.len(), "Received upload");

    Ok(Json(broker.upload_document(upload).await?))
}

async fn document_question(
    State(broker): State<Arc<RequestRouter>>,
    payload: Result<Json<DocumentQuestionBody>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let body = json_body(payload)?;
    let response_text = broker
        .answer_document_question(DocumentQuestion {
            question: body.text.unwrap_or_default(),
            document_text: body.document_text.unwrap_or_default(),
            analysis: body.analysis,
            model: body.model,
        })
        .await?;
    Ok(Json(AnswerResponse { response_text }))
}

async fn reset(
    State(broker): State<Arc<RequestRouter>>,
    payload: Result<Json<ResetBody>, JsonRejection>,
) -> Result<Json<ResetResponse>, ApiError> {
    let body = json_body(payload)?;
    broker
        .reset_session(&body.session_id.unwrap_or_default())
        .await?;
    Ok(Json(ResetResponse {
        status: "Chat history reset successfully",
    }))
}

async fn refresh(
    State(broker): State<Arc<RequestRouter>>,
) -> Result<Json<BackendStatus>, ApiError> {
    Ok(Json(broker.refresh().await?))
}

async fn test_model(
    State(broker): State<Arc<RequestRouter>>,
    Path(model): Path<String>,
) -> Result<Json<ModelTestResponse>, ApiError> {
    let state = broker.test_model(&model).await?;
    Ok(Json(ModelTestResponse { model, state }))
}
