//! Request Router
//!
//! Entry point for every external call. Each operation follows the same
//! shape:
//!
//! ```text
//! validate input ─> backend available? ─> model usable? ─> build request
//!        │                 │                    │               │
//!   Validation     BackendUnavailable   ModelUnavailable     backend
//!                                                               │
//!                                   classify failure <──── error?
//!                                   update health state
//! ```
//!
//! Document flows never trust a cached "available" flag: the model is probed
//! right before use. Analysis never fails the caller; it degrades into an
//! explanatory text instead, because the extracted document text is useful
//! on its own.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use serde::Serialize;

use crate::backend::{BackendError, ChatRequest, ChatResponse, LlmBackend};
use crate::config::{BrokerConfig, DocumentSettings, ModelSettings, StorageSettings};
use crate::document::{analysis_prompt, question_prompt, DocumentContext, TextExtractor};
use crate::error::{classify, classify_message, pull_command, to_broker_error, BrokerError, FailureKind};
use crate::health::{BackendHealthMonitor, BackendStatus, ModelState, ModelStatus};
use crate::probe::ModelProbe;
use crate::session::{ChatTurn, SessionId, SessionStore};

/// Reply given when a question arrives without any document text
pub const NO_DOCUMENT_TEXT: &str = "No document text available to answer questions.";

/// Message when the backend stays unreachable after a manual refresh
const REFRESH_UNAVAILABLE: &str =
    "Ollama service is not available. Please make sure Ollama is installed and running: https://ollama.com/download";

// ============================================================================
// Inputs and Outputs
// ============================================================================

/// A chat turn request
#[derive(Clone, Debug, Default)]
pub struct ChatInput {
    /// Session to continue; a new one is started when absent
    pub session_id: Option<String>,
    /// User message
    pub text: String,
    /// Base64 image, optionally with a `data:...;base64,` prefix
    pub image: Option<String>,
    /// Model to use instead of the configured chat model
    pub model: Option<String>,
}

/// A successful chat turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    /// Session the turn was recorded in
    pub session_id: SessionId,
    /// Model reply
    pub response_text: String,
}

/// A question about a document
#[derive(Clone, Debug, Default)]
pub struct DocumentQuestion {
    /// The question
    pub question: String,
    /// Full document text, resent by the caller every time
    pub document_text: String,
    /// Earlier analysis of the document, if the caller kept it
    pub analysis: Option<String>,
    /// Model to use instead of the configured document model
    pub model: Option<String>,
}

/// Outcome of analysing a document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentAnalysis {
    /// Analysis text, or an explanation of why there is none
    pub text: String,
    /// State of the analysis model afterwards
    pub model_state: ModelState,
}

/// An uploaded document file
#[derive(Clone, Debug)]
pub struct DocumentUpload {
    /// Name the client gave the file
    pub file_name: String,
    /// File contents
    pub bytes: Vec<u8>,
}

/// Result of ingesting an uploaded document
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    /// Text extracted from the file
    pub extracted_text: String,
    /// Analysis of the text, or an explanation of why there is none
    pub analysis: String,
    /// Name the file was stored under
    pub file_id: String,
    /// State of the analysis model
    pub model_status: ModelState,
}

/// Router settings taken from [`BrokerConfig`]
#[derive(Clone, Debug)]
pub struct RouterSettings {
    /// Default models per operation
    pub models: ModelSettings,
    /// Prompt window sizes
    pub documents: DocumentSettings,
    /// Where uploads are written
    pub storage: StorageSettings,
    /// Deadline for chat and document calls
    pub request_timeout: Duration,
}

impl From<&BrokerConfig> for RouterSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            models: config.models.clone(),
            documents: config.documents,
            storage: config.storage.clone(),
            request_timeout: config.backend.request_timeout,
        }
    }
}

// ============================================================================
// Payload Helpers
// ============================================================================

/// Decode a base64 image, dropping any data-URL prefix
///
/// # Errors
///
/// Returns [`BrokerError::ImageDecode`] for malformed base64.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, BrokerError> {
    let data = payload.split_once(',').map_or(payload, |(_, data)| data);
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| BrokerError::ImageDecode(e.to_string()))
}

/// Make a client-supplied string safe to use inside a file name
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Final path component of an uploaded file name, sanitized
fn upload_file_name(raw: &str) -> Option<String> {
    let name = Path::new(raw.trim()).file_name()?.to_str()?;
    let name = sanitize(name);
    (!name.is_empty()).then_some(name)
}

fn has_pdf_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Router
// ============================================================================

/// Request-handling layer in front of the inference backend
pub struct RequestRouter {
    backend: Arc<dyn LlmBackend>,
    health: Arc<BackendHealthMonitor>,
    probe: ModelProbe,
    sessions: Arc<SessionStore>,
    extractor: Arc<dyn TextExtractor>,
    settings: RouterSettings,
}

impl RequestRouter {
    /// Build a router and its health monitor, probe and session store
    pub fn from_config(
        backend: Arc<dyn LlmBackend>,
        extractor: Arc<dyn TextExtractor>,
        config: &BrokerConfig,
    ) -> Self {
        let health = Arc::new(BackendHealthMonitor::new(
            Arc::clone(&backend),
            config.health.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(config.max_turns));
        let probe = ModelProbe::new(
            Arc::clone(&backend),
            Arc::clone(&health),
            config.backend.probe_timeout,
        );
        Self::new(backend, health, probe, sessions, extractor, RouterSettings::from(config))
    }

    /// Assemble a router from existing components
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        health: Arc<BackendHealthMonitor>,
        probe: ModelProbe,
        sessions: Arc<SessionStore>,
        extractor: Arc<dyn TextExtractor>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            backend,
            health,
            probe,
            sessions,
            extractor,
            settings,
        }
    }

    /// Shared health monitor
    #[must_use]
    pub fn health(&self) -> &Arc<BackendHealthMonitor> {
        &self.health
    }

    /// Shared session store
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Router settings
    #[must_use]
    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    /// Check the backend and probe every model it lists
    ///
    /// Meant to run as a background task at startup; requests are served
    /// meanwhile and see the backend as unavailable until the refresh lands.
    pub async fn initialize(&self) {
        let status = self.health.refresh().await;
        if !status.service_available {
            tracing::warn!(
                "Ollama service is not available. AI features won't work until it is started \
                 (https://ollama.com/download)"
            );
            return;
        }

        let listed: Vec<String> = status
            .models
            .iter()
            .filter(|(_, state)| state.status == ModelStatus::Available)
            .map(|(name, _)| name.clone())
            .collect();
        self.probe.test_all(&listed).await;
        tracing::info!(probed = listed.len(), "Backend initialization complete");
    }

    // ------------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------------

    /// Current health, refreshed if stale
    pub async fn status(&self) -> BackendStatus {
        self.health.get_status().await
    }

    /// Force a health refresh and re-probe all tracked models in the background
    ///
    /// # Errors
    ///
    /// [`BrokerError::BackendUnavailable`] if the backend still does not answer.
    pub async fn refresh(&self) -> Result<BackendStatus, BrokerError> {
        let status = self.health.refresh().await;
        if !status.service_available {
            return Err(BrokerError::BackendUnavailable(REFRESH_UNAVAILABLE.to_string()));
        }

        let probe = self.probe.clone();
        let models = self.health.tracked_models();
        tokio::spawn(async move {
            probe.test_all(&models).await;
        });

        Ok(status)
    }

    /// Probe one model on demand
    ///
    /// # Errors
    ///
    /// [`BrokerError::BackendUnavailable`] if the backend is down,
    /// [`BrokerError::ModelNotFound`] if it is not installed, and
    /// [`BrokerError::ModelUnavailable`] if it is installed but does not answer.
    pub async fn test_model(&self, model: &str) -> Result<ModelState, BrokerError> {
        if model.trim().is_empty() {
            return Err(BrokerError::Validation("A model name is required".to_string()));
        }
        self.ensure_backend_available().await?;

        if self.probe.test(model).await {
            return Ok(self.model_state(model));
        }
        Err(self.probe_failure(model))
    }

    // ------------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------------

    /// Send one chat turn, continuing the session's conversation
    ///
    /// # Errors
    ///
    /// Fails before touching the session on validation, availability and
    /// image errors; backend failures are classified after the call.
    pub async fn chat(&self, input: ChatInput) -> Result<ChatReply, BrokerError> {
        let session_id = SessionId::from_optional(input.session_id.as_deref());
        let model = non_empty(input.model).unwrap_or_else(|| self.settings.models.chat_model.clone());
        let image = non_empty(input.image);

        if input.text.trim().is_empty() && image.is_none() {
            return Err(BrokerError::Validation(
                "A message text or an image is required".to_string(),
            ));
        }

        let status = self.ensure_backend_available().await?;
        if status.is_model_unavailable(&model) {
            return Err(BrokerError::ModelUnavailable {
                reason: status.model(&model).and_then(|m| m.last_error.clone()),
                model,
            });
        }

        let image_path = match image {
            Some(ref payload) => Some(self.store_image(&session_id, payload).await?),
            None => None,
        };

        let (session_id, handle) = self.sessions.get_or_create(Some(session_id.as_str()));
        let mut session = handle.lock().await;

        let user_turn = ChatTurn::user(input.text, image_path);
        let request =
            ChatRequest::new(model.as_str()).with_messages(session.build_messages(Some(&user_turn)));

        tracing::info!(
            session = %session_id,
            model = %model,
            messages = request.messages.len(),
            "Sending chat request"
        );

        match self.send(&request).await {
            Ok(reply) => {
                session.append(user_turn);
                session.append(ChatTurn::assistant(reply.content.clone()));
                Ok(ChatReply {
                    session_id,
                    response_text: reply.content,
                })
            }
            Err(e) => {
                if let Some(ref path) = user_turn.attached_image_path {
                    discard_file(path).await;
                }
                Err(self.handle_backend_failure(&model, &e))
            }
        }
    }

    /// Clear a session's history
    ///
    /// # Errors
    ///
    /// [`BrokerError::SessionNotFound`] if no such session exists.
    pub async fn reset_session(&self, session_id: &str) -> Result<(), BrokerError> {
        if self.sessions.reset(session_id).await {
            Ok(())
        } else {
            Err(BrokerError::SessionNotFound(session_id.to_string()))
        }
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// Analyse a document with the analysis model
    ///
    /// Never fails: if the model cannot be used the returned text explains
    /// why.
    pub async fn analyze_document(&self, text: &str) -> DocumentAnalysis {
        let model = self.settings.models.analysis_model.as_str();

        if !self.probe.test(model).await {
            let text = if self.probe_failure_kind(model) == FailureKind::Connectivity {
                analysis_placeholder_text(FailureKind::Connectivity, model, "")
            } else {
                let error = self.model_state(model).last_error.unwrap_or_default();
                format!(
                    "Cannot perform analysis: Model {model} is not available or not working correctly. \
                     Error: {error}. Please run: {}",
                    pull_command(model)
                )
            };
            return DocumentAnalysis {
                text,
                model_state: self.model_state(model),
            };
        }

        let prompt = analysis_prompt(
            &DocumentContext::new(text),
            self.settings.documents.analysis_window_chars,
        );
        tracing::info!(model, "Sending analysis request");

        let text = match self.send(&ChatRequest::single(model, prompt)).await {
            Ok(reply) => {
                self.health.record_working(model);
                reply.content
            }
            Err(e) => {
                let kind = classify(&e);
                self.record_failure(model, kind, &e);
                analysis_placeholder(kind, model, &e)
            }
        };

        DocumentAnalysis {
            text,
            model_state: self.model_state(model),
        }
    }

    /// Answer a question about a document
    ///
    /// # Errors
    ///
    /// Validation, availability and probe failures, then classified backend
    /// failures.
    pub async fn answer_document_question(
        &self,
        question: DocumentQuestion,
    ) -> Result<String, BrokerError> {
        if question.question.trim().is_empty() {
            return Err(BrokerError::Validation("A question is required".to_string()));
        }
        if question.document_text.trim().is_empty() {
            return Ok(NO_DOCUMENT_TEXT.to_string());
        }

        let model =
            non_empty(question.model).unwrap_or_else(|| self.settings.models.document_model.clone());

        self.ensure_backend_available().await?;
        if !self.probe.test(&model).await {
            return Err(self.probe_failure(&model));
        }

        let mut document = DocumentContext::new(question.document_text);
        if let Some(analysis) = non_empty(question.analysis) {
            document = document.with_analysis(analysis);
        }
        let prompt = question_prompt(
            &document,
            &question.question,
            self.settings.documents.question_window_chars,
        );

        tracing::info!(model = %model, chars = document.full_text.len(), "Sending document question");
        match self.send(&ChatRequest::single(model.as_str(), prompt)).await {
            Ok(reply) => Ok(reply.content),
            Err(e) => Err(self.handle_backend_failure(&model, &e)),
        }
    }

    /// Store an uploaded document, extract its text and analyse it
    ///
    /// # Errors
    ///
    /// [`BrokerError::BackendUnavailable`] when the backend is down,
    /// [`BrokerError::Validation`] for a bad file or empty extraction.
    pub async fn upload_document(
        &self,
        upload: DocumentUpload,
    ) -> Result<UploadOutcome, BrokerError> {
        self.ensure_backend_available().await?;

        let file_name = upload_file_name(&upload.file_name)
            .ok_or_else(|| BrokerError::Validation("No file selected".to_string()))?;
        if !has_pdf_extension(&file_name) {
            return Err(BrokerError::Validation(
                "File does not appear to be a PDF".to_string(),
            ));
        }

        let file_id = format!("{}_{file_name}", Utc::now().timestamp());
        let path = self
            .write_file(&self.settings.storage.document_dir, &file_id, &upload.bytes)
            .await?;
        tracing::info!(path = %path.display(), "Document saved");

        let text = match self.extractor.extract(&path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Text extraction failed");
                String::new()
            }
        };

        if text.trim().is_empty() {
            return Err(BrokerError::Validation(
                "Could not extract text from the document. The file may be empty or corrupted."
                    .to_string(),
            ));
        }

        let analysis = self.analyze_document(&text).await;
        Ok(UploadOutcome {
            extracted_text: text,
            analysis: analysis.text,
            file_id,
            model_status: analysis.model_state,
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Cached health if the backend is up, otherwise one fresh check
    async fn ensure_backend_available(&self) -> Result<BackendStatus, BrokerError> {
        let status = if self.health.snapshot().service_available {
            self.health.get_status().await
        } else {
            self.health.refresh().await
        };

        if status.service_available {
            Ok(status)
        } else {
            Err(BrokerError::backend_unavailable())
        }
    }

    fn model_state(&self, model: &str) -> ModelState {
        self.health
            .snapshot()
            .model(model)
            .cloned()
            .unwrap_or_default()
    }

    /// Classify the failure a probe of `model` just recorded
    ///
    /// An unreachable backend is reflected in shared health right away.
    fn probe_failure_kind(&self, model: &str) -> FailureKind {
        let kind = self
            .model_state(model)
            .last_error
            .as_deref()
            .map_or(FailureKind::Other, classify_message);
        if kind == FailureKind::Connectivity {
            self.health.mark_unavailable();
        }
        kind
    }

    /// Error for a model that just failed its probe
    fn probe_failure(&self, model: &str) -> BrokerError {
        match self.probe_failure_kind(model) {
            FailureKind::Connectivity => BrokerError::connection_lost(),
            FailureKind::ModelNotFound => BrokerError::ModelNotFound {
                model: model.to_string(),
            },
            FailureKind::ContextTooLarge | FailureKind::Timeout | FailureKind::Other => {
                BrokerError::ModelUnavailable {
                    model: model.to_string(),
                    reason: self.model_state(model).last_error,
                }
            }
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        tokio::time::timeout(self.settings.request_timeout, self.backend.chat(request))
            .await
            .unwrap_or(Err(BackendError::Timeout))
    }

    fn handle_backend_failure(&self, model: &str, err: &BackendError) -> BrokerError {
        let kind = classify(err);
        self.record_failure(model, kind, err);
        to_broker_error(kind, model, err)
    }

    /// Reflect a classified failure in shared health state
    fn record_failure(&self, model: &str, kind: FailureKind, err: &BackendError) {
        tracing::error!(model, error = %err, kind = ?kind, "Backend request failed");
        match kind {
            FailureKind::Connectivity => self.health.mark_unavailable(),
            FailureKind::ModelNotFound => self.health.record_not_found(model, err.to_string()),
            FailureKind::ContextTooLarge | FailureKind::Timeout | FailureKind::Other => {
                self.health.record_last_error(model, err.to_string());
            }
        }
    }

    async fn store_image(&self, session: &SessionId, payload: &str) -> Result<PathBuf, BrokerError> {
        let bytes = decode_image_payload(payload)?;
        let name = format!(
            "{}_{}_{}.jpg",
            sanitize(session.as_str()),
            Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4().simple()
        );
        let path = self
            .write_file(&self.settings.storage.upload_dir, &name, &bytes)
            .await?;
        tracing::info!(path = %path.display(), "Image saved");
        Ok(path)
    }

    async fn write_file(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, BrokerError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| BrokerError::Internal(format!("cannot create {}: {e}", dir.display())))?;
        let path = dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| BrokerError::Internal(format!("cannot write {}: {e}", path.display())))?;
        Ok(path)
    }
}

/// Remove a stored file that no turn refers to
async fn discard_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove unused file");
    }
}

/// Explanation returned in place of an analysis
fn analysis_placeholder(kind: FailureKind, model: &str, err: &BackendError) -> String {
    analysis_placeholder_text(kind, model, &err.to_string())
}

fn analysis_placeholder_text(kind: FailureKind, model: &str, err: &str) -> String {
    match kind {
        FailureKind::ModelNotFound => format!(
            "Cannot analyze document: Model {model} is not available. Please run: {}",
            pull_command(model)
        ),
        FailureKind::ContextTooLarge => "The document is too large for the model's context window. \
             Try asking specific questions about sections instead."
            .to_string(),
        FailureKind::Connectivity => "Cannot analyze document: lost connection to Ollama. \
             You can still ask questions about it once the service is back."
            .to_string(),
        FailureKind::Timeout | FailureKind::Other => format!(
            "Error analyzing the document: {err}. You can still ask questions about it."
        ),
    }
}
