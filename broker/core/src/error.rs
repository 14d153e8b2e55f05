//! Broker Errors and Backend Failure Classification
//!
//! [`BrokerError`] is the user-facing taxonomy every router operation fails
//! with. [`classify`] is the one place that decides what a raw
//! [`BackendError`] means; the router uses the resulting [`FailureKind`] both
//! to pick the error it returns and to update shared health state.

use thiserror::Error;

use crate::backend::BackendError;

/// Command that installs a model on the backend
#[must_use]
pub fn pull_command(model: &str) -> String {
    format!("ollama pull {model}")
}

/// Errors surfaced to broker callers
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The backend cannot be reached or failed its health check
    #[error("{0}")]
    BackendUnavailable(String),

    /// The model is known but not ready to serve requests
    #[error("Model {model} is not available{}. Please run: ollama pull {model}", reason_suffix(.reason))]
    ModelUnavailable {
        /// Requested model
        model: String,
        /// Last recorded failure for the model, if any
        reason: Option<String>,
    },

    /// The backend reports the model does not exist
    #[error("Model {model} not found. Please run: ollama pull {model}")]
    ModelNotFound {
        /// Requested model
        model: String,
    },

    /// The prompt exceeded the model's context window
    #[error("The request is too large for the context window of {model}. Try asking about a specific section instead.")]
    ContextTooLarge {
        /// Model that rejected the prompt
        model: String,
    },

    /// An attached image payload could not be decoded
    #[error("Error processing image: {0}")]
    ImageDecode(String),

    /// A required field is missing or malformed
    #[error("{0}")]
    Validation(String),

    /// No session with the given id exists
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// Anything not covered above
    #[error("Error: {0}")]
    Internal(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default()
}

impl BrokerError {
    /// Default message when the backend cannot be reached
    #[must_use]
    pub fn backend_unavailable() -> Self {
        Self::BackendUnavailable(
            "Ollama service is not available. Please start Ollama and try again.".to_string(),
        )
    }

    /// Message when a previously healthy backend drops mid-request
    #[must_use]
    pub fn connection_lost() -> Self {
        Self::BackendUnavailable(
            "Lost connection to Ollama service. Please check if Ollama is still running."
                .to_string(),
        )
    }

    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::ModelUnavailable { .. } => "MODEL_UNAVAILABLE",
            Self::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            Self::ContextTooLarge { .. } => "CONTEXT_TOO_LARGE",
            Self::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Shell command that fixes the problem, when there is one
    #[must_use]
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::ModelUnavailable { model, .. } | Self::ModelNotFound { model } => {
                Some(pull_command(model))
            }
            Self::BackendUnavailable(_) => Some("ollama serve".to_string()),
            _ => None,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// What a backend failure means for the broker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The backend process is unreachable
    Connectivity,
    /// The backend does not know the requested model
    ModelNotFound,
    /// The prompt overflowed the model's context window
    ContextTooLarge,
    /// The call exceeded its deadline
    Timeout,
    /// Anything else
    Other,
}

/// Classify a backend failure
#[must_use]
pub fn classify(err: &BackendError) -> FailureKind {
    match err {
        BackendError::Connect(_) => FailureKind::Connectivity,
        BackendError::Timeout => FailureKind::Timeout,
        BackendError::Status { message, .. } | BackendError::Protocol(message) => {
            classify_message(message)
        }
        BackendError::Attachment { .. } => FailureKind::Other,
    }
}

/// Classify a free-form backend error message by its known substrings
#[must_use]
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();

    if lower.contains("failed to connect") || lower.contains("connection refused") {
        FailureKind::Connectivity
    } else if lower.contains("no such model")
        || lower.contains("model not found")
        || (lower.contains("model") && lower.contains("not found"))
    {
        FailureKind::ModelNotFound
    } else if lower.contains("context") && lower.contains("length") {
        FailureKind::ContextTooLarge
    } else {
        FailureKind::Other
    }
}

/// Map a classified backend failure for `model` to the error callers see
#[must_use]
pub fn to_broker_error(kind: FailureKind, model: &str, err: &BackendError) -> BrokerError {
    match kind {
        FailureKind::Connectivity => BrokerError::connection_lost(),
        FailureKind::ModelNotFound => BrokerError::ModelNotFound {
            model: model.to_string(),
        },
        FailureKind::ContextTooLarge => BrokerError::ContextTooLarge {
            model: model.to_string(),
        },
        FailureKind::Timeout => {
            BrokerError::Internal(format!("model {model} did not answer in time"))
        }
        FailureKind::Other => BrokerError::Internal(err.to_string()),
    }
}
