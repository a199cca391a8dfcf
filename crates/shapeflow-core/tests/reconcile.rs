//! Reconciliation and event stream tests against the scripted backend.

mod common;

use std::time::Duration;

use common::{FakeBackend, status_event};
use shapeflow_core::model::{AnalyzerConfig, AnalyzerId, AnalyzerState, QueueState, UNNAMED};
use shapeflow_core::store::LOST_CONNECTION_NOTICE;

fn id(s: &str) -> AnalyzerId {
    AnalyzerId::from(s)
}

// =============================================================================
// Single pass
// =============================================================================

#[tokio::test]
async fn converges_onto_backend_membership() {
    let backend = FakeBackend::with_analyzers(&["B", "C", "D"]);
    let client = common::client(&backend);
    {
        let mut store = client.store().write().await;
        for name in ["A", "B", "C"] {
            store.queue_analyzer(&id(name));
            store.set_config(&id(name), AnalyzerConfig::named(name));
        }
    }

    let report = client.sync().sync_once().await.unwrap();

    assert_eq!(report.unqueued, vec![id("A")]);
    assert_eq!(report.queued, vec![id("D")]);
    assert_eq!(report.configs_fetched, 1);
    assert_eq!(backend.call_count("get_config"), 1);

    let store = client.store().read().await;
    assert_eq!(store.queue().ids(), &[id("B"), id("C"), id("D")]);
    assert!(!store.registry().contains(&id("A")));
    assert_eq!(store.registry().config(&id("D")).unwrap().display_name(), "D");
    assert_eq!(
        store.registry().status(&id("D")).unwrap().state,
        Some(AnalyzerState::CanLaunch)
    );
    assert!(store.is_connected());
}

#[tokio::test]
async fn single_pass_outside_loop_does_not_open_events() {
    let backend = FakeBackend::with_analyzers(&["a"]);
    let client = common::client(&backend);
    let report = client.sync().sync_once().await.unwrap();
    assert!(!report.events_opened);
    assert_eq!(backend.call_count("events"), 0);
}

#[tokio::test]
async fn queue_state_is_adopted() {
    let backend = FakeBackend::new();
    backend.script().q_state = QueueState::Paused;
    let client = common::client(&backend);
    client.sync().sync_once().await.unwrap();
    assert_eq!(client.store().read().await.queue_state(), QueueState::Paused);
}

#[tokio::test]
async fn nameless_backend_config_gets_sentinel_and_is_not_refetched() {
    let backend = FakeBackend::new();
    backend.add_remote("e", None);
    let client = common::client(&backend);

    client.sync().sync_once().await.unwrap();
    client.sync().sync_once().await.unwrap();

    let store = client.store().read().await;
    assert_eq!(store.registry().config(&id("e")).unwrap().name.as_deref(), Some(UNNAMED));
    assert_eq!(backend.call_count("get_config"), 1);
}

#[tokio::test]
async fn config_backfill_failure_is_retried_next_pass() {
    let backend = FakeBackend::with_analyzers(&["a", "b"]);
    backend.script().failing_configs.insert(id("b"));
    let client = common::client(&backend);

    let first = client.sync().sync_once().await.unwrap();
    assert_eq!(first.configs_fetched, 1);
    assert_eq!(first.config_failures, 1);
    {
        let store = client.store().read().await;
        assert!(store.registry().config_is_empty(&id("b")));
        // A single failed fetch inside the grace window keeps us connected.
        assert!(store.is_connected());
    }

    backend.script().failing_configs.clear();
    let second = client.sync().sync_once().await.unwrap();
    assert_eq!(second.missing_config, vec![id("b")]);
    assert_eq!(second.configs_fetched, 1);
    assert_eq!(
        client.store().read().await.registry().config(&id("b")).unwrap().display_name(),
        "b"
    );
}

#[tokio::test]
async fn analyzer_removed_remotely_is_dropped() {
    let backend = FakeBackend::with_analyzers(&["a", "b"]);
    let client = common::client(&backend);
    client.sync().sync_once().await.unwrap();

    backend.remove_remote("a");
    let report = client.sync().sync_once().await.unwrap();
    assert_eq!(report.unqueued, vec![id("a")]);
    assert_eq!(client.store().read().await.queue().ids(), &[id("b")]);
}

// =============================================================================
// Connectivity
// =============================================================================

#[tokio::test(start_paused = true)]
async fn disconnect_is_debounced_by_grace_window() {
    let backend = FakeBackend::new();
    let client = common::client(&backend);
    client.sync().sync_once().await.unwrap();
    assert!(client.is_connected().await);

    backend.set_offline(true);
    let err = client.sync().sync_once().await.unwrap_err();
    assert!(err.is_transport());
    assert!(client.is_connected().await, "one failure inside grace must not disconnect");

    tokio::time::advance(Duration::from_secs(6)).await;
    client.sync().sync_once().await.unwrap_err();
    assert!(!client.is_connected().await);
    client.sync().sync_once().await.unwrap_err();

    let snapshot = client.snapshot().await;
    let lost: Vec<_> = snapshot
        .notices
        .iter()
        .filter(|n| n.message == LOST_CONNECTION_NOTICE)
        .collect();
    assert_eq!(lost.len(), 1, "disconnect notice is pushed once per edge");

    backend.set_offline(false);
    client.sync().sync_once().await.unwrap();
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn never_connected_failure_stays_disconnected() {
    let backend = FakeBackend::new();
    backend.set_offline(true);
    let client = common::client(&backend);
    assert!(client.sync().sync_once().await.is_err());
    assert!(!client.is_connected().await);
    assert!(client.snapshot().await.notices.is_empty());
}

// =============================================================================
// Event stream
// =============================================================================

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn loop_opens_stream_and_applies_events() {
    let backend = FakeBackend::with_analyzers(&["a", "b"]);
    let client = common::client(&backend);
    client.sync().start_loop();
    settle().await;

    assert!(client.sync().events_open());
    assert!(backend.stream_attached());
    let calls = backend.calls();
    let detach = calls.iter().position(|c| c == "stop_events").unwrap();
    let open = calls.iter().position(|c| c == "events").unwrap();
    assert!(detach < open, "previous stream is detached before opening");

    assert!(backend.push_event(&status_event("a", AnalyzerState::Analyzing)));
    assert!(backend.push_event(r#"{"category":"close","id":"b"}"#));
    settle().await;

    {
        let store = client.store().read().await;
        assert_eq!(
            store.registry().status(&id("a")).unwrap().state,
            Some(AnalyzerState::Analyzing)
        );
        assert!(!store.queue().contains(&id("b")));
    }
    client.sync().stop_loop();
}

#[tokio::test(start_paused = true)]
async fn malformed_events_are_dropped_and_stream_stays_open() {
    let backend = FakeBackend::with_analyzers(&["a"]);
    let client = common::client(&backend);
    client.sync().start_loop();
    settle().await;

    for bad in [
        "not json",
        r#"{"id":"a","data":{}}"#,
        r#"{"category":"status","id":null,"data":{"state":1}}"#,
        r#"{"category":"config","id":"a"}"#,
        r#"{"category":"mystery","id":"a","data":{}}"#,
    ] {
        assert!(backend.push_event(bad));
    }
    backend.push_event(
        r#"{"category":"notice","id":null,"data":{"message":"backend ready","uuid":"n-1"}}"#,
    );
    settle().await;

    assert!(client.sync().events_open());
    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.notices.len(), 1);
    assert_eq!(snapshot.notices[0].message, "backend ready");
    assert_eq!(snapshot.notices[0].analyzer, None);
    client.sync().stop_loop();
}

#[tokio::test(start_paused = true)]
async fn broken_stream_is_reopened_by_next_successful_pass() {
    let backend = FakeBackend::with_analyzers(&["a"]);
    let client = common::client(&backend);
    client.sync().start_loop();
    settle().await;
    assert_eq!(backend.call_count("events"), 1);

    assert!(backend.break_stream());
    settle().await;
    assert!(!client.sync().events_open());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(client.sync().events_open());
    assert_eq!(backend.call_count("events"), 2);
    client.sync().stop_loop();
}

#[tokio::test(start_paused = true)]
async fn failed_poll_closes_stream() {
    let backend = FakeBackend::with_analyzers(&["a"]);
    let client = common::client(&backend);
    client.sync().start_loop();
    settle().await;
    assert!(client.sync().events_open());

    backend.set_offline(true);
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(!client.sync().events_open());
    client.sync().stop_loop();
}
