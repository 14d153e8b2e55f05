//! Model Probing
//!
//! A model being listed by the backend does not mean it can answer: weights
//! may be corrupt or the machine may lack memory to load it. [`ModelProbe`]
//! sends one tiny chat request and records the outcome in the shared
//! [`BackendHealthMonitor`].

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendError, ChatRequest, LlmBackend};
use crate::health::BackendHealthMonitor;

/// Prompt sent when probing a model
pub const PROBE_PROMPT: &str = "Hello, test message";

/// Active round-trip check of a model
#[derive(Clone)]
pub struct ModelProbe {
    backend: Arc<dyn LlmBackend>,
    health: Arc<BackendHealthMonitor>,
    timeout: Duration,
}

impl ModelProbe {
    /// Create a probe reporting into `health`
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        health: Arc<BackendHealthMonitor>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            health,
            timeout,
        }
    }

    /// Probe `model`; `true` if it answered
    ///
    /// Success marks the model `working`; any failure, including a timeout,
    /// marks it `error` with the failure message. Never fails itself.
    pub async fn test(&self, model: &str) -> bool {
        tracing::info!(model, "Testing model");

        let request = ChatRequest::single(model, PROBE_PROMPT);
        let result = tokio::time::timeout(self.timeout, self.backend.chat(&request))
            .await
            .unwrap_or(Err(BackendError::Timeout));

        match result {
            Ok(_) => {
                tracing::info!(model, "Model is working");
                self.health.record_working(model);
                true
            }
            Err(e) => {
                tracing::error!(model, error = %e, "Model probe failed");
                self.health.record_error(model, e.to_string());
                false
            }
        }
    }

    /// Probe every model in `models` one after another
    pub async fn test_all(&self, models: &[String]) {
        for model in models {
            self.test(model).await;
        }
    }
}
