//! API error type with structured JSON responses
//!
//! Every failing route answers with
//!
//! ```json
//! { "error": { "code": "MODEL_UNAVAILABLE", "message": "...", "remediation": "ollama pull m1" } }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use docchat_core::BrokerError;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Error details
    pub error: ErrorDetail,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable code
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
    /// Command that fixes the problem, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

/// Errors returned by HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A broker operation failed
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The request could not be read
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// HTTP status for a broker error
pub fn status_for(err: &BrokerError) -> StatusCode {
    match err {
        BrokerError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BrokerError::ModelUnavailable { .. }
        | BrokerError::ModelNotFound { .. }
        | BrokerError::ContextTooLarge { .. }
        | BrokerError::ImageDecode(_)
        | BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
        BrokerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        BrokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Broker(err) => {
                let status = status_for(&err);
                let message = match err {
                    BrokerError::Internal(ref detail) => {
                        tracing::error!(detail, "API internal error");
                        "An internal error occurred".to_string()
                    }
                    ref other => other.to_string(),
                };
                (
                    status,
                    ErrorDetail {
                        code: err.code(),
                        message,
                        remediation: err.remediation(),
                    },
                )
            }
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "BAD_REQUEST",
                    message: detail,
                    remediation: None,
                },
            ),
        };

        (status, Json(ErrorBody { error })).into_response()
    }
}
