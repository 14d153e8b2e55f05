//! DocChat Core - Health-Aware Chat Broker for a Local Ollama Backend
//!
//! This crate holds everything between an HTTP surface and the inference
//! backend: health tracking, model probing, conversation sessions and
//! document prompt assembly. It knows nothing about HTTP; the daemon crate
//! maps [`RequestRouter`] operations onto routes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        HTTP daemon (axum)                         │
//! │   status · chat · upload · document_question · reset · refresh    │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          DOCCHAT CORE                             │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                      RequestRouter                          │  │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌────────────┐  │  │
//! │  │  │  Health  │  │  Model   │  │ Session  │  │  Document  │  │  │
//! │  │  │ Monitor  │  │  Probe   │  │  Store   │  │  Prompts   │  │  │
//! │  │  └────┬─────┘  └────┬─────┘  └──────────┘  └────────────┘  │  │
//! │  └───────┼─────────────┼──────────────────────────────────────┘  │
//! │          └──────┬──────┘                                          │
//! │          LlmBackend (Ollama)                                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`RequestRouter`]: Validates requests, gates them on health, calls the backend
//! - [`BackendHealthMonitor`]: Cached backend and per-model status
//! - [`ModelProbe`]: One-shot round-trip test of a model
//! - [`SessionStore`]: Per-session conversation history
//! - [`BrokerError`]: Every failure a caller can see
//!
//! # Module Overview
//!
//! - [`backend`]: LLM backend abstraction and the Ollama client
//! - [`config`]: TOML, environment and CLI configuration
//! - [`document`]: Character-window prompt assembly and the text extraction seam
//! - [`error`]: Broker errors and backend failure classification
//! - [`health`]: Backend health monitoring
//! - [`probe`]: Model probing
//! - [`router`]: Request routing
//! - [`session`]: Conversation sessions

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod health;
pub mod probe;
pub mod router;
pub mod session;

// Re-exports for convenience
pub use backend::{
    BackendError, ChatMessage, ChatRequest, ChatResponse, LlmBackend, MessageRole, ModelInfo,
    OllamaBackend,
};
pub use document::{DocumentContext, ExtractError, TextExtractor};
pub use error::{BrokerError, FailureKind};
pub use health::{BackendHealthMonitor, BackendStatus, ModelState, ModelStatus};
pub use probe::ModelProbe;
pub use router::{
    ChatInput, ChatReply, DocumentAnalysis, DocumentQuestion, DocumentUpload, RequestRouter,
    RouterSettings, UploadOutcome,
};
pub use session::{ChatTurn, Session, SessionId, SessionStore, TurnRole};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BrokerConfig, BrokerToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
