//! Backend Health Monitoring
//!
//! [`BackendHealthMonitor`] owns the single shared [`BackendStatus`]: whether
//! the backend answers at all, and what is known about each tracked model.
//!
//! # Refresh Policy
//!
//! ```text
//!  get_status() ──fresh?──yes──> snapshot
//!       │
//!       no
//!       │
//!  refresh in flight? ──yes──> snapshot (never block on another refresh)
//!       │
//!       no
//!       ▼
//!  refresh() ──> GET model list (bounded timeout) ──> snapshot
//! ```
//!
//! Model states change only through [`BackendHealthMonitor::refresh`] or the
//! `record_*` methods, which the probe and the router call to reflect
//! observed outcomes.
//!
//! # Thread Safety
//!
//! The status lives behind a `parking_lot::RwLock` and is only ever handed
//! out as a cloned snapshot. Refreshes are serialized by an async mutex so
//! concurrent stale reads and concurrent forced refreshes trigger one backend
//! call, not many.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, LlmBackend, ModelInfo};
use crate::config::HealthSettings;
use crate::error::pull_command;

// ============================================================================
// Model State
// ============================================================================

/// What is known about a model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Not checked yet
    #[default]
    Unknown,
    /// Listed by the backend
    Available,
    /// Answered a probe
    Working,
    /// Not listed by the backend
    NotFound,
    /// Listed but failed to answer
    Error,
}

impl ModelStatus {
    /// Whether requests to the model should be refused without trying
    #[must_use]
    pub fn is_unavailable(self) -> bool {
        matches!(self, Self::NotFound | Self::Error)
    }
}

/// State of one model
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelState {
    /// Current status
    pub status: ModelStatus,
    /// Last failure message, cleared on success
    pub last_error: Option<String>,
}

impl ModelState {
    fn with_status(status: ModelStatus, last_error: Option<String>) -> Self {
        Self { status, last_error }
    }
}

// ============================================================================
// Backend Status
// ============================================================================

/// Snapshot of backend and model health
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    /// Whether the backend answered its last health check
    pub service_available: bool,
    /// When the backend was last checked (`None` until the first check)
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Per-model state, keyed by model name
    pub models: BTreeMap<String, ModelState>,
}

impl BackendStatus {
    fn tracking(models: &[String]) -> Self {
        Self {
            service_available: false,
            last_checked_at: None,
            models: models
                .iter()
                .map(|m| (m.clone(), ModelState::default()))
                .collect(),
        }
    }

    /// State of `model`, if tracked
    #[must_use]
    pub fn model(&self, model: &str) -> Option<&ModelState> {
        self.models.get(model)
    }

    /// Whether the cache says `model` cannot serve requests
    #[must_use]
    pub fn is_model_unavailable(&self, model: &str) -> bool {
        self.model(model).is_some_and(|m| m.status.is_unavailable())
    }

    /// Whether this snapshot is older than `staleness` at `now`
    #[must_use]
    pub fn is_stale(&self, staleness: Duration, now: DateTime<Utc>) -> bool {
        match self.last_checked_at {
            None => true,
            Some(checked) => {
                let age = now.signed_duration_since(checked);
                age.to_std().is_ok_and(|age| age >= staleness)
            }
        }
    }

    /// Advance `last_checked_at`, never moving it backwards
    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_checked_at = Some(match self.last_checked_at {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }
}

// ============================================================================
// Model Matching
// ============================================================================

/// Portion of a model name before the version tag (`mistral:latest` → `mistral`)
#[must_use]
pub fn base_name(model: &str) -> &str {
    model.split(':').next().unwrap_or(model)
}

/// Whether `tracked` is among the models the backend reports
///
/// An exact name match counts, and so does a listed model with the same base
/// name under a different tag. Prefixes do not: `mistral` does not match
/// `mistral-nemo`.
#[must_use]
pub fn is_listed(tracked: &str, listed: &[ModelInfo]) -> bool {
    let tracked_base = base_name(tracked);
    listed
        .iter()
        .any(|m| m.name == tracked || base_name(&m.name) == tracked_base)
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Tracks backend availability and per-model readiness
pub struct BackendHealthMonitor {
    backend: Arc<dyn LlmBackend>,
    settings: HealthSettings,
    status: RwLock<BackendStatus>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl BackendHealthMonitor {
    /// Create a monitor; nothing is contacted until the first refresh
    pub fn new(backend: Arc<dyn LlmBackend>, settings: HealthSettings) -> Self {
        let status = BackendStatus::tracking(&settings.tracked_models);
        Self {
            backend,
            settings,
            status: RwLock::new(status),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current cached status without contacting the backend
    pub fn snapshot(&self) -> BackendStatus {
        self.status.read().clone()
    }

    /// Names of all tracked models
    pub fn tracked_models(&self) -> Vec<String> {
        self.status.read().models.keys().cloned().collect()
    }

    /// Cached status, refreshed first if older than the staleness threshold
    ///
    /// If another refresh is already running, the current snapshot is
    /// returned instead of waiting for it.
    pub async fn get_status(&self) -> BackendStatus {
        if !self.snapshot().is_stale(self.settings.staleness, Utc::now()) {
            return self.snapshot();
        }

        let Ok(_guard) = self.refresh_lock.try_lock() else {
            tracing::debug!("Health refresh already in flight, serving cached status");
            return self.snapshot();
        };

        // Another caller may have refreshed between the check and the lock
        if self.snapshot().is_stale(self.settings.staleness, Utc::now()) {
            self.refresh_locked().await;
        }
        self.snapshot()
    }

    /// Contact the backend and update the cached status
    ///
    /// Callers queued behind a running refresh share its result instead of
    /// polling the backend again once it finishes.
    pub async fn refresh(&self) -> BackendStatus {
        let seen = self.snapshot().last_checked_at;
        let _guard = self.refresh_lock.lock().await;

        if self.snapshot().last_checked_at != seen {
            tracing::debug!("Health refreshed while waiting, reusing its result");
            return self.snapshot();
        }
        self.refresh_locked().await;
        self.snapshot()
    }

    async fn refresh_locked(&self) {
        let result = tokio::time::timeout(self.settings.timeout, self.backend.list_models())
            .await
            .unwrap_or(Err(BackendError::Timeout));

        let mut status = self.status.write();
        status.touch(Utc::now());

        let listed = match result {
            Ok(listed) => listed,
            Err(e) => {
                tracing::error!(
                    backend = self.backend.name(),
                    error = %e,
                    "Cannot reach inference backend"
                );
                status.service_available = false;
                return;
            }
        };

        status.service_available = true;
        tracing::info!(
            backend = self.backend.name(),
            models = listed.len(),
            "Inference backend is running"
        );

        for (name, state) in &mut status.models {
            if is_listed(name, &listed) {
                tracing::info!(model = %name, "Model is available");
                *state = ModelState::with_status(ModelStatus::Available, None);
            } else {
                tracing::warn!(
                    model = %name,
                    fix = %pull_command(name),
                    "Model is not installed"
                );
                *state = ModelState::with_status(
                    ModelStatus::NotFound,
                    Some(format!("Model {name} not found")),
                );
            }
        }
    }

    /// Record that the backend stopped answering
    pub fn mark_unavailable(&self) {
        let mut status = self.status.write();
        if status.service_available {
            tracing::warn!("Marking inference backend unavailable");
        }
        status.service_available = false;
    }

    /// Record a successful round-trip with `model`
    pub fn record_working(&self, model: &str) {
        self.set_model(model, ModelState::with_status(ModelStatus::Working, None));
    }

    /// Record that `model` failed to answer
    pub fn record_error(&self, model: &str, error: impl Into<String>) {
        self.set_model(
            model,
            ModelState::with_status(ModelStatus::Error, Some(error.into())),
        );
    }

    /// Record that the backend does not know `model`
    pub fn record_not_found(&self, model: &str, error: impl Into<String>) {
        self.set_model(
            model,
            ModelState::with_status(ModelStatus::NotFound, Some(error.into())),
        );
    }

    /// Keep the status of `model` but remember the last failure
    pub fn record_last_error(&self, model: &str, error: impl Into<String>) {
        let mut status = self.status.write();
        status.models.entry(model.to_string()).or_default().last_error = Some(error.into());
    }

    /// Replace the state of `model`, starting to track it if needed
    fn set_model(&self, model: &str, state: ModelState) {
        self.status.write().models.insert(model.to_string(), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn listed(names: &[&str]) -> Vec<ModelInfo> {
        names.iter().map(|n| ModelInfo::named(*n)).collect()
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("mistral:latest"), "mistral");
        assert_eq!(base_name("llama3.2-vision:11b"), "llama3.2-vision");
        assert_eq!(base_name("phi3"), "phi3");
    }

    #[test]
    fn test_is_listed_exact_and_base_name() {
        let models = listed(&["mistral:7b", "llama3.2-vision:latest"]);

        assert!(is_listed("llama3.2-vision:latest", &models));
        assert!(is_listed("mistral:latest", &models));
        assert!(!is_listed("llama3.2:latest", &models));
    }

    #[test]
    fn test_is_listed_rejects_shared_prefixes() {
        let models = listed(&["mistral-nemo:latest"]);
        assert!(!is_listed("mistral:latest", &models));
    }

    #[test]
    fn test_staleness() {
        let checked = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let status = BackendStatus {
            last_checked_at: Some(checked),
            ..BackendStatus::default()
        };

        let staleness = Duration::from_secs(30);
        assert!(!status.is_stale(staleness, checked + chrono::Duration::seconds(10)));
        assert!(status.is_stale(staleness, checked + chrono::Duration::seconds(30)));
        assert!(BackendStatus::default().is_stale(staleness, checked));
    }

    #[test]
    fn test_touch_is_monotonic() {
        let later = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

        let mut status = BackendStatus::default();
        status.touch(later);
        status.touch(earlier);
        assert_eq!(status.last_checked_at, Some(later));
    }

    #[test]
    fn test_unavailable_statuses() {
        assert!(ModelStatus::NotFound.is_unavailable());
        assert!(ModelStatus::Error.is_unavailable());
        assert!(!ModelStatus::Unknown.is_unavailable());
        assert!(!ModelStatus::Available.is_unavailable());
        assert!(!ModelStatus::Working.is_unavailable());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let mut status = BackendStatus::tracking(&["m1".to_string()]);
        status.models.insert(
            "m1".to_string(),
            ModelState::with_status(ModelStatus::NotFound, Some("gone".into())),
        );

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["serviceAvailable"], false);
        assert!(json["lastCheckedAt"].is_null());
        assert_eq!(json["models"]["m1"]["status"], "not_found");
        assert_eq!(json["models"]["m1"]["lastError"], "gone");
    }
}
