//! LLM Backend Traits
//!
//! Trait definitions for inference backends. The broker only needs two
//! things from a backend: the list of models it knows about, and a
//! non-streaming chat round-trip. Everything else (health bookkeeping,
//! sessions, prompt shaping) lives above this seam.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who authored a chat message sent to the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user
    User,
    /// Model reply
    Assistant,
}

/// A single message in a chat request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    /// Who sent this message
    pub role: MessageRole,
    /// Message text
    pub content: String,
    /// Images attached to this message, as paths on local disk
    pub images: Vec<PathBuf>,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Attach an image stored at `path`
    #[must_use]
    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.images.push(path.into());
        self
    }
}

/// A chat request: the model plus the full conversation to send
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Conversation, oldest first
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Create a request for `model` with no messages yet
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
        }
    }

    /// Create a single-turn request carrying one user prompt
    pub fn single(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(model).with_message(ChatMessage::user(prompt))
    }

    /// Append a message
    #[must_use]
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Append several messages
    #[must_use]
    pub fn with_messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.messages.extend(messages);
        self
    }
}

/// Response from a chat request
#[derive(Clone, Debug)]
pub struct ChatResponse {
    /// The reply text
    pub content: String,
    /// Model that generated the reply
    pub model: String,
    /// Tokens generated (if reported)
    pub tokens_used: Option<u32>,
    /// Generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// Information about a model the backend reports as installed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Model identifier, e.g. `mistral:latest`
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count (if known)
    pub parameters: Option<String>,
}

impl ModelInfo {
    /// Create a model entry with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            parameters: None,
        }
    }
}

/// Failures talking to a backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached at all
    #[error("failed to connect to backend: {0}")]
    Connect(String),

    /// The backend did not answer in time
    #[error("backend request timed out")]
    Timeout,

    /// The backend answered with a non-success status
    #[error("backend returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Error text reported by the backend
        message: String,
    },

    /// The backend answered with something we could not interpret
    #[error("unexpected backend response: {0}")]
    Protocol(String),

    /// A local attachment could not be prepared for sending
    #[error("could not read attachment {path}: {reason}")]
    Attachment {
        /// Path of the attachment
        path: String,
        /// Why it failed
        reason: String,
    },
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Connect(err.to_string())
        }
    }
}

/// LLM Backend trait
///
/// Implement this trait to put a different inference server behind the broker.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// List installed models
    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError>;

    /// Send a conversation and wait for the complete reply
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError>;
}
