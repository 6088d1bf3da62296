//! Integration tests for session lifecycle and request correlation
//!
//! These drive real child processes (stub workers from `common`) through
//! the full acquire → send → correlate → settle path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use vazal_agent::{
    AgentError, AgentService, Classification, SessionManager, WorkerState,
};

#[tokio::test]
async fn concurrent_cold_acquires_share_one_worker() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(SessionManager::new(common::stub_config(
        &dir,
        common::ECHO_WORKER,
    )));
    let service = AgentService::new(manager.clone());

    let (a, b) = tokio::join!(
        service.classify("u1", "Hi"),
        service.classify("u1", "Hi")
    );

    for result in [a, b] {
        match result.unwrap() {
            Classification::Chat { response } => assert_eq!(response, "Hello!"),
            other => panic!("expected chat classification, got {other:?}"),
        }
    }
    assert_eq!(common::spawn_count(&dir), 1);
    assert_eq!(manager.session_count().await, 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn pipelined_requests_correlate_by_id_not_send_order() -> anyhow::Result<()> {
    common::init_logging();
    let dir = tempfile::tempdir()?;
    let manager = Arc::new(SessionManager::new(common::stub_config(
        &dir,
        common::ECHO_WORKER,
    )));
    let service = AgentService::new(manager.clone());

    let (classified, planned, executed) = tokio::join!(
        service.classify("u1", "Hi"),
        service.plan("u1", "make a deck"),
        service.execute("u1", "make a deck", &[]),
    );

    assert!(matches!(
        classified?,
        Classification::Chat { response } if response == "Hello!"
    ));

    let plan = planned?;
    assert_eq!(plan.steps, vec!["Step 1", "Step 2"]);
    assert_eq!(plan.estimated_time, "30 seconds");

    let outcome = executed?;
    assert_eq!(outcome.result, "Done. Saved report.pdf");
    assert_eq!(outcome.output_files, vec!["report.pdf"]);

    // All three shared the one warm worker.
    assert_eq!(common::spawn_count(&dir), 1);
    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn execute_timeout_leaves_the_session_usable() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::stub_config(&dir, common::SILENT_EXECUTE_WORKER);
    config.execute_timeout = Duration::from_millis(500);
    let manager = Arc::new(SessionManager::new(config));
    let service = AgentService::new(manager.clone());

    let err = service.execute("u1", "never answered", &[]).await.unwrap_err();
    match &err {
        AgentError::RequestTimeout { timeout_secs, .. } => assert_eq!(*timeout_secs, 0),
        other => panic!("expected request timeout, got {other:?}"),
    }
    assert!(err.is_retryable());

    // The timed-out entry is gone and the warm worker still serves.
    let session = manager.get("u1").await.unwrap();
    assert_eq!(session.in_flight(), 0);
    assert!(!session.is_terminated());

    let classified = service.classify("u1", "Hi").await.unwrap();
    assert!(matches!(classified, Classification::Chat { .. }));
    assert_eq!(common::spawn_count(&dir), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn evicting_a_worker_rejects_every_outstanding_request() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(SessionManager::new(common::stub_config(
        &dir,
        common::SILENT_EXECUTE_WORKER,
    )));
    let service = AgentService::new(manager.clone());

    // Warm the session, then pile up requests that will never be answered.
    service.classify("u1", "Hi").await.unwrap();
    let session = manager.get("u1").await.unwrap();

    let pending: Vec<_> = (0..3)
        .map(|n| {
            let service = service.clone();
            tokio::spawn(async move { service.execute("u1", &format!("task {n}"), &[]).await })
        })
        .collect();

    // Let the requests reach the worker before pulling the plug.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.in_flight(), 3);
    assert!(manager.evict("u1").await);

    for handle in pending {
        match handle.await.unwrap() {
            Err(AgentError::WorkerTerminated { .. }) => {}
            other => panic!("expected worker-terminated, got {other:?}"),
        }
    }
    assert_eq!(session.in_flight(), 0);
    assert!(session.is_terminated());
    assert_eq!(manager.session_count().await, 0);

    // A retry transparently spawns a fresh worker.
    service.classify("u1", "Hi").await.unwrap();
    assert_eq!(common::spawn_count(&dir), 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn worker_crash_settles_the_caller_and_respawns_on_retry() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(SessionManager::new(common::stub_config(
        &dir,
        common::CRASH_ON_EXECUTE_WORKER,
    )));
    let service = AgentService::new(manager.clone());

    let err = service.execute("u1", "boom", &[]).await.unwrap_err();
    assert!(matches!(err, AgentError::WorkerTerminated { .. }));
    assert!(err.is_retryable());

    // The crashed session is pruned; the next request gets a new worker.
    let classified = service.classify("u1", "Hi").await.unwrap();
    assert!(matches!(classified, Classification::Chat { .. }));
    assert_eq!(common::spawn_count(&dir), 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn idle_sessions_are_swept_and_respawn_on_demand() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::stub_config(&dir, common::ECHO_WORKER);
    config.idle_timeout = Duration::from_millis(300);
    config.sweep_interval = Duration::from_millis(100);
    let manager = Arc::new(SessionManager::new(config));
    let service = AgentService::new(manager.clone());

    service.classify("u1", "Hi").await.unwrap();
    assert_eq!(manager.session_count().await, 1);

    // Wait for the sweep to notice the idle session.
    let mut evicted = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if manager.session_count().await == 0 {
            evicted = true;
            break;
        }
    }
    assert!(evicted, "idle session was never evicted");

    service.classify("u1", "Hi").await.unwrap();
    assert_eq!(common::spawn_count(&dir), 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn startup_timeout_fails_the_key_cleanly() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::stub_config(&dir, common::SLOW_START_WORKER);
    config.startup_timeout = Duration::from_millis(300);
    let manager = Arc::new(SessionManager::new(config));

    let err = manager.acquire("u1").await.unwrap_err();
    assert!(matches!(err, AgentError::StartupTimeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(manager.session_count().await, 0);

    // The key is not poisoned: a retry runs a fresh creation attempt.
    let err = manager.acquire("u1").await.unwrap_err();
    assert!(matches!(err, AgentError::StartupTimeout { .. }));
    assert_eq!(common::spawn_count(&dir), 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn spawn_failure_fails_the_key_cleanly() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::stub_config(&dir, common::ECHO_WORKER);
    config.program = "definitely-not-a-real-binary-7f3a".into();
    let manager = Arc::new(SessionManager::new(config));

    for _ in 0..2 {
        let err = manager.acquire("u1").await.unwrap_err();
        assert!(matches!(err, AgentError::SpawnFailure(_)));
        assert!(err.is_retryable());
        assert_eq!(manager.session_count().await, 0);
    }
}

#[tokio::test]
async fn legacy_sentinel_banner_marks_readiness() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(SessionManager::new(common::stub_config(
        &dir,
        common::SENTINEL_WORKER,
    )));
    let service = AgentService::new(manager.clone());

    let classified = service.classify("u1", "Hi").await.unwrap();
    assert!(matches!(classified, Classification::Chat { .. }));

    manager.shutdown().await;
}

#[tokio::test]
async fn session_info_reports_state_and_unknown_keys() -> anyhow::Result<()> {
    common::init_logging();
    let dir = tempfile::tempdir()?;
    let manager = Arc::new(SessionManager::new(common::stub_config(
        &dir,
        common::ECHO_WORKER,
    )));
    let service = AgentService::new(manager.clone());

    service.classify("u1", "Hi").await?;

    let info = manager.session_info("u1").await?;
    assert_eq!(info.key, "u1");
    assert_eq!(info.state, WorkerState::Ready);
    assert_eq!(info.in_flight, 0);
    assert!(info.pid.is_some());

    assert_eq!(manager.list_sessions().await.len(), 1);
    assert!(matches!(
        manager.session_info("nobody").await.unwrap_err(),
        AgentError::SessionNotFound(_)
    ));

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_rejects_new_acquires() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(SessionManager::new(common::stub_config(
        &dir,
        common::ECHO_WORKER,
    )));

    manager.acquire("u1").await.unwrap();
    manager.shutdown().await;
    assert_eq!(manager.session_count().await, 0);

    assert!(matches!(
        manager.acquire("u1").await.unwrap_err(),
        AgentError::ShuttingDown
    ));
}
