//! Health monitor and model probe tests against a scripted backend

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{MockBackend, CHAT_MODEL, DOC_MODEL};
use docchat_core::backend::BackendError;
use docchat_core::config::HealthSettings;
use docchat_core::health::{BackendHealthMonitor, ModelStatus};
use docchat_core::probe::ModelProbe;

fn settings(staleness: Duration) -> HealthSettings {
    HealthSettings {
        timeout: Duration::from_secs(2),
        staleness,
        tracked_models: vec![CHAT_MODEL.to_string(), DOC_MODEL.to_string()],
    }
}

fn monitor(backend: &Arc<MockBackend>, staleness: Duration) -> Arc<BackendHealthMonitor> {
    Arc::new(BackendHealthMonitor::new(backend.clone(), settings(staleness)))
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test]
async fn test_initial_status_is_unknown() {
    let backend = MockBackend::healthy();
    let monitor = monitor(&backend, Duration::from_secs(30));

    let snapshot = monitor.snapshot();
    assert!(!snapshot.service_available);
    assert!(snapshot.last_checked_at.is_none());
    assert_eq!(snapshot.models[CHAT_MODEL].status, ModelStatus::Unknown);
    assert_eq!(backend.list_calls(), 0);
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let backend = MockBackend::listing(&[CHAT_MODEL]);
    let monitor = monitor(&backend, Duration::from_secs(30));

    let first = monitor.refresh().await;
    let second = monitor.refresh().await;

    assert_eq!(first.service_available, second.service_available);
    assert_eq!(first.models, second.models);
    assert!(second.last_checked_at >= first.last_checked_at);
    assert_eq!(second.models[CHAT_MODEL].status, ModelStatus::Available);
    assert_eq!(second.models[DOC_MODEL].status, ModelStatus::NotFound);
}

#[tokio::test]
async fn test_sequential_refreshes_each_contact_backend() {
    let backend = MockBackend::healthy();
    let monitor = monitor(&backend, Duration::from_secs(30));

    monitor.refresh().await;
    monitor.refresh().await;

    assert_eq!(backend.list_calls(), 2);
}

#[tokio::test]
async fn test_queued_refreshes_share_the_running_one() {
    let backend = MockBackend::unreachable();
    backend.set_list_delay(Duration::from_millis(100));
    let monitor = monitor(&backend, Duration::from_secs(30));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let monitor = Arc::clone(&monitor);
        handles.push(tokio::spawn(async move { monitor.refresh().await }));
    }
    for handle in handles {
        let status = handle.await.unwrap();
        assert!(!status.service_available);
        assert!(status.last_checked_at.is_some());
    }

    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test]
async fn test_refresh_matches_other_tags() {
    let backend = MockBackend::listing(&["chat:7b", "docs-extended:latest"]);
    let monitor = monitor(&backend, Duration::from_secs(30));

    let status = monitor.refresh().await;
    assert_eq!(status.models[CHAT_MODEL].status, ModelStatus::Available);
    assert_eq!(status.models[DOC_MODEL].status, ModelStatus::NotFound);
}

#[tokio::test]
async fn test_failed_refresh_still_records_check_time() {
    let backend = MockBackend::unreachable();
    let monitor = monitor(&backend, Duration::from_secs(30));

    let status = monitor.refresh().await;
    assert!(!status.service_available);
    assert!(status.last_checked_at.is_some());
}

#[tokio::test]
async fn test_slow_backend_counts_as_unavailable() {
    let backend = MockBackend::healthy();
    backend.set_list_delay(Duration::from_millis(500));
    let monitor = Arc::new(BackendHealthMonitor::new(
        backend.clone(),
        HealthSettings {
            timeout: Duration::from_millis(50),
            ..settings(Duration::from_secs(30))
        },
    ));

    assert!(!monitor.refresh().await.service_available);
}

#[tokio::test]
async fn test_fresh_status_is_served_from_cache() {
    let backend = MockBackend::healthy();
    let monitor = monitor(&backend, Duration::from_secs(30));

    monitor.get_status().await;
    monitor.get_status().await;
    monitor.get_status().await;

    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test]
async fn test_stale_status_refreshes_every_time() {
    let backend = MockBackend::healthy();
    let monitor = monitor(&backend, Duration::ZERO);

    for _ in 0..3 {
        assert!(monitor.get_status().await.service_available);
    }
    assert_eq!(backend.list_calls(), 3);
}

#[tokio::test]
async fn test_concurrent_stale_reads_trigger_one_refresh() {
    let backend = MockBackend::healthy();
    backend.set_list_delay(Duration::from_millis(100));
    let monitor = monitor(&backend, Duration::from_secs(30));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let monitor = Arc::clone(&monitor);
        handles.push(tokio::spawn(async move { monitor.get_status().await }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(backend.list_calls(), 1);
    assert!(monitor.snapshot().service_available);
}

#[tokio::test]
async fn test_recorded_outcomes() {
    let backend = MockBackend::healthy();
    let monitor = monitor(&backend, Duration::from_secs(30));
    monitor.refresh().await;

    monitor.record_working(CHAT_MODEL);
    monitor.record_error(DOC_MODEL, "out of memory");
    monitor.record_working("new:latest");

    let status = monitor.snapshot();
    assert_eq!(status.models[CHAT_MODEL].status, ModelStatus::Working);
    assert!(status.is_model_unavailable(DOC_MODEL));
    assert_eq!(
        status.models[DOC_MODEL].last_error.as_deref(),
        Some("out of memory")
    );
    assert_eq!(status.models["new:latest"].status, ModelStatus::Working);
    assert!(monitor.tracked_models().contains(&"new:latest".to_string()));

    // a later successful refresh restores listed models
    let status = monitor.refresh().await;
    assert_eq!(status.models[DOC_MODEL].status, ModelStatus::Available);
    assert!(status.models[DOC_MODEL].last_error.is_none());
}

// =============================================================================
// Probe
// =============================================================================

#[tokio::test]
async fn test_probe_success_marks_working() {
    let backend = MockBackend::healthy();
    let monitor = monitor(&backend, Duration::from_secs(30));
    let probe = ModelProbe::new(backend.clone(), Arc::clone(&monitor), Duration::from_secs(2));

    assert!(probe.test(CHAT_MODEL).await);
    assert_eq!(
        monitor.snapshot().models[CHAT_MODEL].status,
        ModelStatus::Working
    );
}

#[tokio::test]
async fn test_probe_failure_marks_error() {
    let backend = MockBackend::healthy();
    backend.fail_model(
        DOC_MODEL,
        BackendError::Status {
            status: 500,
            message: "model failed to load".to_string(),
        },
    );
    let monitor = monitor(&backend, Duration::from_secs(30));
    let probe = ModelProbe::new(backend.clone(), Arc::clone(&monitor), Duration::from_secs(2));

    assert!(!probe.test(DOC_MODEL).await);
    let state = monitor.snapshot().models[DOC_MODEL].clone();
    assert_eq!(state.status, ModelStatus::Error);
    assert_eq!(
        state.last_error.as_deref(),
        Some("backend returned 500: model failed to load")
    );
}

#[tokio::test]
async fn test_probe_timeout_marks_error() {
    let backend = MockBackend::healthy();
    backend.set_chat_delay(Duration::from_millis(500));
    let monitor = monitor(&backend, Duration::from_secs(30));
    let probe = ModelProbe::new(backend.clone(), Arc::clone(&monitor), Duration::from_millis(50));

    assert!(!probe.test(CHAT_MODEL).await);
    let state = monitor.snapshot().models[CHAT_MODEL].clone();
    assert_eq!(state.status, ModelStatus::Error);
    assert!(state.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_probe_all_records_each_model() {
    let backend = MockBackend::healthy();
    backend.fail_model(
        DOC_MODEL,
        BackendError::Status {
            status: 500,
            message: "boom".to_string(),
        },
    );
    let monitor = monitor(&backend, Duration::from_secs(30));
    let probe = ModelProbe::new(backend.clone(), Arc::clone(&monitor), Duration::from_secs(2));

    probe.test_all(&monitor.tracked_models()).await;

    let status = monitor.snapshot();
    assert_eq!(status.models[CHAT_MODEL].status, ModelStatus::Working);
    assert_eq!(status.models[DOC_MODEL].status, ModelStatus::Error);
    assert_eq!(backend.chat_calls(), 2);
}
