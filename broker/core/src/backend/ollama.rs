//! Ollama Backend Implementation
//!
//! LLM backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! Two endpoints are used:
//! - `/api/tags` - List installed models
//! - `/api/chat` - Chat completion over a full message history
//!
//! Chat requests are always sent with `"stream": false`; the broker hands
//! complete replies back to its callers.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;

use super::traits::{
    BackendError, ChatMessage, ChatRequest, ChatResponse, LlmBackend, ModelInfo,
};
use crate::config::BackendSettings;

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// `request_timeout` bounds every HTTP call made through this client;
    /// callers may impose tighter limits on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Connect(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            host: host.into(),
            port,
            http_client,
        })
    }

    /// Create from the `[backend]` configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(settings: &BackendSettings) -> Result<Self, BackendError> {
        Self::new(
            settings.host.clone(),
            settings.port,
            settings.request_timeout,
        )
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for `/api/chat`, inlining image attachments
    async fn build_chat_body(
        &self,
        request: &ChatRequest,
    ) -> Result<serde_json::Value, BackendError> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            messages.push(encode_message(message).await?);
        }

        Ok(serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        }))
    }
}

/// Convert one message to Ollama's wire shape
async fn encode_message(message: &ChatMessage) -> Result<serde_json::Value, BackendError> {
    let mut value = serde_json::json!({
        "role": message.role,
        "content": message.content,
    });

    if !message.images.is_empty() {
        let mut images = Vec::with_capacity(message.images.len());
        for path in &message.images {
            images.push(read_image_base64(path).await?);
        }
        value["images"] = serde_json::json!(images);
    }

    Ok(value)
}

async fn read_image_base64(path: &Path) -> Result<String, BackendError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| BackendError::Attachment {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Turn a non-success response into a `BackendError::Status`
///
/// Ollama reports failures as `{"error": "..."}`; fall back to the raw body.
async fn status_error(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);
    BackendError::Status { status, message }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let response = self.http_client.get(self.tags_url()).send().await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let data: serde_json::Value = response.json().await?;

        let models = data
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let name = m.get("name")?.as_str()?.to_string();
                        let size = m.get("size").and_then(serde_json::Value::as_u64);
                        let parameters = m
                            .get("details")
                            .and_then(|d| d.get("parameter_size"))
                            .and_then(|p| p.as_str())
                            .map(String::from);

                        Some(ModelInfo {
                            name,
                            size,
                            parameters,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let start = Instant::now();
        let body = self.build_chat_body(request).await?;

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let data: serde_json::Value = response.json().await?;

        if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
            return Err(BackendError::Status {
                status: 200,
                message: error.to_string(),
            });
        }

        let content = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| BackendError::Protocol("reply has no message content".to_string()))?
            .to_string();

        let tokens_used = data
            .get("eval_count")
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u32::try_from(c).ok());

        Ok(ChatResponse {
            content,
            model: request.model.clone(),
            tokens_used,
            duration_ms: u64::try_from(start.elapsed().as_millis()).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MessageRole;

    fn backend() -> OllamaBackend {
        OllamaBackend::new("localhost", 11434, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_ollama_backend_creation() {
        let backend = backend();
        assert_eq!(backend.host, "localhost");
        assert_eq!(backend.port, 11434);
        assert_eq!(backend.base_url(), "http://localhost:11434");
        assert_eq!(backend.tags_url(), "http://localhost:11434/api/tags");
        assert_eq!(backend.chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_from_config() {
        let settings = BackendSettings {
            host: "example.com".to_string(),
            port: 8080,
            ..BackendSettings::default()
        };

        let backend = OllamaBackend::from_config(&settings).unwrap();
        assert_eq!(backend.base_url(), "http://example.com:8080");
    }

    #[tokio::test]
    async fn test_chat_body_shape() {
        let request = ChatRequest::new("mistral:latest")
            .with_message(ChatMessage::user("Hello"))
            .with_message(ChatMessage::assistant("Hi"));

        let body = backend().build_chat_body(&request).await.unwrap();
        assert_eq!(body["model"], "mistral:latest");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Hi");
        assert!(body["messages"][0].get("images").is_none());
    }

    #[tokio::test]
    async fn test_chat_body_inlines_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.jpg");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let request =
            ChatRequest::new("llava").with_message(ChatMessage::user("what is this").with_image(&path));
        let body = backend().build_chat_body(&request).await.unwrap();

        assert_eq!(body["messages"][0]["images"][0], "YWJj");
    }

    #[tokio::test]
    async fn test_missing_attachment_is_reported() {
        let request = ChatRequest::new("llava")
            .with_message(ChatMessage::user("x").with_image("/nonexistent/pic.jpg"));

        let err = backend().build_chat_body(&request).await.unwrap_err();
        assert!(matches!(err, BackendError::Attachment { .. }));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::json!(MessageRole::Assistant), "assistant");
    }
}
