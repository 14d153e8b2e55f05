//! Scripted backend and extractor shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use docchat_core::backend::{BackendError, ChatRequest, ChatResponse, LlmBackend, ModelInfo};
use docchat_core::config::BrokerConfig;
use docchat_core::document::{ExtractError, TextExtractor};
use docchat_core::probe::PROBE_PROMPT;
use docchat_core::RequestRouter;

pub const CHAT_MODEL: &str = "chat:latest";
pub const DOC_MODEL: &str = "docs:latest";

/// Backend whose answers are set up by the test
///
/// Chat replies echo the last message so tests can see what was sent.
pub struct MockBackend {
    listed: Mutex<Result<Vec<ModelInfo>, BackendError>>,
    failures: Mutex<HashMap<String, BackendError>>,
    work_failures: Mutex<HashMap<String, BackendError>>,
    requests: Mutex<Vec<ChatRequest>>,
    list_delay: Mutex<Duration>,
    chat_delay: Mutex<Duration>,
    list_calls: AtomicUsize,
    chat_calls: AtomicUsize,
}

impl MockBackend {
    /// Backend listing `models`
    pub fn listing(models: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            listed: Mutex::new(Ok(models.iter().map(|m| ModelInfo::named(*m)).collect())),
            failures: Mutex::new(HashMap::new()),
            work_failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            list_delay: Mutex::new(Duration::ZERO),
            chat_delay: Mutex::new(Duration::ZERO),
            list_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
        })
    }

    /// Backend listing both default test models
    pub fn healthy() -> Arc<Self> {
        Self::listing(&[CHAT_MODEL, DOC_MODEL])
    }

    /// Backend that refuses connections
    pub fn unreachable() -> Arc<Self> {
        let backend = Self::healthy();
        backend.set_list_result(Err(BackendError::Connect("connection refused".into())));
        backend
    }

    pub fn set_list_result(&self, result: Result<Vec<ModelInfo>, BackendError>) {
        *self.listed.lock() = result;
    }

    /// Every chat call for `model` fails with `err`
    pub fn fail_model(&self, model: &str, err: BackendError) {
        self.failures.lock().insert(model.to_string(), err);
    }

    /// Health-check prompts to `model` succeed; every other chat call fails with `err`
    pub fn fail_model_requests(&self, model: &str, err: BackendError) {
        self.work_failures.lock().insert(model.to_string(), err);
    }

    pub fn heal_model(&self, model: &str) {
        self.failures.lock().remove(model);
        self.work_failures.lock().remove(model);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock() = delay;
    }

    pub fn set_chat_delay(&self, delay: Duration) {
        *self.chat_delay.lock() = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.listed.lock().clone()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let delay = *self.chat_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.failures.lock().get(&request.model) {
            return Err(err.clone());
        }

        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if last != PROBE_PROMPT {
            if let Some(err) = self.work_failures.lock().get(&request.model) {
                return Err(err.clone());
            }
        }
        Ok(ChatResponse {
            content: format!("echo: {last}"),
            model: request.model.clone(),
            tokens_used: None,
            duration_ms: Some(1),
        })
    }
}

/// Extractor returning fixed text
pub struct StubExtractor {
    text: String,
    calls: AtomicUsize,
}

impl StubExtractor {
    pub fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(ExtractError(format!("{} does not exist", path.display())));
        }
        Ok(self.text.clone())
    }
}

/// Configuration pointing storage at `dir` and using the test models
pub fn test_config(dir: &Path) -> BrokerConfig {
    let mut config = BrokerConfig::new();
    config.health.tracked_models = vec![CHAT_MODEL.to_string(), DOC_MODEL.to_string()];
    config.health.timeout = Duration::from_secs(2);
    config.models.chat_model = CHAT_MODEL.to_string();
    config.models.analysis_model = DOC_MODEL.to_string();
    config.models.document_model = DOC_MODEL.to_string();
    config.backend.request_timeout = Duration::from_secs(5);
    config.backend.probe_timeout = Duration::from_secs(2);
    config.storage.upload_dir = dir.join("uploads");
    config.storage.document_dir = dir.join("documents");
    config
}

pub fn router(backend: &Arc<MockBackend>, extractor: &Arc<StubExtractor>, dir: &Path) -> RequestRouter {
    router_with(backend, extractor, test_config(dir))
}

pub fn router_with(
    backend: &Arc<MockBackend>,
    extractor: &Arc<StubExtractor>,
    config: BrokerConfig,
) -> RequestRouter {
    RequestRouter::from_config(backend.clone(), extractor.clone(), &config)
}
