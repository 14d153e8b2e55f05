//! LLM Backend Integration
//!
//! Abstracted access to the inference server behind a common trait.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use docchat_core::backend::{ChatRequest, LlmBackend, OllamaBackend};
//!
//! let backend = OllamaBackend::from_config(&config.backend)?;
//! let reply = backend.chat(&ChatRequest::single("mistral:latest", "Hello!")).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{
    BackendError, ChatMessage, ChatRequest, ChatResponse, LlmBackend, MessageRole, ModelInfo,
};
