// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Reconciliation Integration Tests
//!
//! Drives the session registry against an in-memory OPC UA server.
//!
//! ## Test Categories
//!
//! - Publish, unpublish and duplicate detection
//! - Subscription grouping
//! - Namespace resolution and server rejections
//! - Connection loss: keep-alive, invalid sessions, refused connects
//! - Value flow: suppression, skip-first, heartbeat
//! - Listings and write-back requests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uapub_opcua::client::DataChange;
use uapub_opcua::{
    AdminError, OpcUaError, PersistenceHook, PointState, SessionSettings, SessionState,
    StatusCode, UaValue,
};
use uapub_tests::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Publish / Unpublish
// =============================================================================

#[tokio::test]
async fn test_reconcile_publish_monitors_point() {
    init_test_logging();
    let h = RegistryHarness::new();

    let outcome = h.publish(vec![point("ns=2;s=Line1.Temperature")]).await.unwrap();
    assert_eq!(outcome.added, 1);
    h.points().await.assert_point("ns=2;s=Line1.Temperature", PointState::Unmonitored);
    assert_eq!(h.connector.connect_count(), 0);

    h.reconcile().await;

    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.session_state().await, Some(SessionState::Connected));
    assert_eq!(h.connector.monitored_nodes(), vec!["ns=2;s=Line1.Temperature"]);
    h.points().await.assert_point("ns=2;s=Line1.Temperature", PointState::Monitored);

    let request = &h.connector.connect_requests()[0];
    assert_eq!(request.endpoint_url, ENDPOINT);
    assert!(!request.use_security);
}

#[tokio::test]
async fn test_reconcile_republish_is_noop_in_either_form() {
    let h = RegistryHarness::new();
    h.publish(vec![point("ns=2;s=A")]).await.unwrap();
    h.reconcile().await;
    let version = h.registry.context().version.current();

    let outcome = h.publish(vec![point("ns=2;s=A")]).await.unwrap();
    assert_eq!((outcome.added, outcome.already_published), (0, 1));

    let uri_form = format!("nsu={PLANT_NAMESPACE};s=A");
    let outcome = h.publish(vec![point(&uri_form)]).await.unwrap();
    assert_eq!((outcome.added, outcome.already_published), (0, 1));

    h.reconcile().await;
    assert_eq!(h.points().await.len(), 1);
    assert_eq!(h.connector.monitored_nodes().len(), 1);
    assert_eq!(h.registry.context().version.current(), version);
}

#[tokio::test]
async fn test_reconcile_unpublish_removes_point() {
    let h = RegistryHarness::new();
    h.publish(vec![point("ns=2;s=A"), point("ns=2;s=B")]).await.unwrap();
    h.reconcile().await;
    let before = h.registry.context().version.current();

    // Tag by the URI form of a point configured in index form.
    let uri_form = format!("nsu={PLANT_NAMESPACE};s=A");
    let tagged = h
        .registry
        .unpublish_nodes(ENDPOINT, &[point_id(&uri_form)])
        .await
        .unwrap();
    assert_eq!(tagged, 1);
    assert!(h.registry.context().version.current() > before);

    // Tagged points disappear from listings before the server is touched.
    assert_eq!(h.points().await.len(), 1);
    assert_eq!(h.connector.monitored_nodes().len(), 2);

    h.reconcile().await;
    assert_eq!(h.connector.monitored_nodes(), vec!["ns=2;s=B"]);
    assert_eq!(h.session_state().await, Some(SessionState::Connected));
}

#[tokio::test]
async fn test_reconcile_unpublish_last_point_removes_session() {
    let h = RegistryHarness::new();
    h.publish(vec![point("ns=2;s=A")]).await.unwrap();
    h.reconcile().await;
    assert_eq!(h.connector.subscription_count(), 1);

    let tagged = h.registry.unpublish_all(Some(ENDPOINT)).await.unwrap();
    assert_eq!(tagged, 1);
    let tagged_again = h.registry.unpublish_all(Some(ENDPOINT)).await.unwrap();
    assert_eq!(tagged_again, 0);

    h.reconcile().await;

    assert_eq!(h.registry.session_count().await, 0);
    assert_eq!(h.connector.subscription_count(), 0);
    assert_eq!(h.connector.close_count(), 1);
    assert!(h.points().await.is_empty());
}

#[tokio::test]
async fn test_reconcile_unpublish_unknown_endpoint() {
    let h = RegistryHarness::new();
    let result = h
        .registry
        .unpublish_nodes(OTHER_ENDPOINT, &[point_id("ns=2;s=A")])
        .await;

    assert!(matches!(
        result,
        Err(OpcUaError::Admin(AdminError::EndpointNotFound { .. }))
    ));
}

#[tokio::test]
async fn test_reconcile_publish_rejected_after_shutdown() {
    let h = RegistryHarness::new();
    h.publish(vec![point("ns=2;s=A")]).await.unwrap();
    h.reconcile().await;
    h.shutdown().await;

    let result = h.publish(vec![point("ns=2;s=B")]).await;
    assert!(matches!(result, Err(OpcUaError::Admin(AdminError::ShuttingDown))));
    assert_eq!(h.connector.close_count(), 1);
    assert_eq!(h.connector.subscription_count(), 0);
}

// =============================================================================
// Subscription Grouping
// =============================================================================

#[tokio::test]
async fn test_reconcile_groups_points_by_publishing_interval() {
    let h = RegistryHarness::new();

    // Zero asks the server to choose; the fake revises it to one second.
    h.publish(vec![point_with("ns=2;s=P1", publishing(0))]).await.unwrap();
    h.reconcile().await;

    let subscriptions = h.connector.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].publishing_interval, Duration::from_millis(1000));

    // Default interval and the revised interval both join the same subscription.
    let p2 = format!("nsu={PLANT_NAMESPACE};s=P2");
    h.publish(vec![
        point_with(&p2, sampling(500)),
        point_with("ns=2;s=P3", publishing(1000)),
    ])
    .await
    .unwrap();
    h.reconcile().await;

    let subscriptions = h.connector.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].nodes, vec!["ns=2;s=P1", "ns=2;s=P2", "ns=2;s=P3"]);
    assert_eq!(h.connector.connect_count(), 1);

    // A different interval gets its own subscription.
    h.publish(vec![point_with("ns=2;s=P4", publishing(5000))]).await.unwrap();
    h.reconcile().await;

    let subscriptions = h.connector.subscriptions();
    assert_eq!(subscriptions.len(), 2);
    assert_eq!(subscriptions[1].publishing_interval, Duration::from_millis(5000));
    assert_eq!(subscriptions[1].nodes, vec!["ns=2;s=P4"]);
}

#[tokio::test]
async fn test_reconcile_points_configured_before_first_connect() {
    let h = RegistryHarness::new();
    let p2 = format!("nsu={PLANT_NAMESPACE};s=P2");
    h.publish(vec![
        point_with("ns=2;s=P1", sampling(1000)),
        point_with(&p2, sampling(250)),
        point("ns=2;s=P3"),
        point_with("ns=2;s=P4", publishing(5000)),
    ])
    .await
    .unwrap();

    let points = h.points().await;
    points.assert_point("ns=2;s=P1", PointState::Unmonitored);
    points.assert_point(&p2, PointState::UnmonitoredNamespaceUpdateRequested);
    assert_eq!(h.connector.connect_count(), 0);

    h.reconcile().await;

    h.points().await.assert_all(PointState::Monitored);
    assert_eq!(h.connector.connect_count(), 1);
    let subscriptions = h.connector.subscriptions();
    assert_eq!(subscriptions.len(), 2);
    assert_eq!(subscriptions[0].publishing_interval, Duration::from_millis(1000));
    assert_eq!(subscriptions[0].nodes, vec!["ns=2;s=P1", "ns=2;s=P2", "ns=2;s=P3"]);
    assert_eq!(subscriptions[1].publishing_interval, Duration::from_millis(5000));
    assert_eq!(subscriptions[1].nodes, vec!["ns=2;s=P4"]);
}

#[tokio::test]
async fn test_reconcile_merges_subscriptions_with_equal_revised_interval() {
    let h = RegistryHarness::new();

    // Both intervals end up at one second on the fake server.
    h.publish(vec![
        point_with("ns=2;s=P1", publishing(0)),
        point_with("ns=2;s=P2", publishing(1000)),
    ])
    .await
    .unwrap();
    h.reconcile().await;

    let subscriptions = h.connector.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].publishing_interval, Duration::from_millis(1000));
    assert_eq!(subscriptions[0].nodes, vec!["ns=2;s=P1", "ns=2;s=P2"]);
    assert_eq!(h.registry.diagnostics().await.subscriptions, 1);
    h.points().await.assert_all(PointState::Monitored);

    // Values of the moved point still reach the sink.
    assert_eq!(h.connector.publish("ns=2;s=P2", UaValue::Int32(7)), 1);
    assert_eq!(h.sink.records_for("ns=2;s=P2").len(), 1);

    // A reconnect rebuilds a single subscription.
    for _ in 0..5 {
        h.connector.keep_alive(StatusCode::BAD_TIMEOUT);
    }
    let h = &h;
    assert!(
        eventually(WAIT, || async move {
            h.session_state().await == Some(SessionState::Disconnected)
        })
        .await
    );
    h.reconcile().await;

    let subscriptions = h.connector.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].nodes, vec!["ns=2;s=P1", "ns=2;s=P2"]);
    assert_eq!(h.registry.diagnostics().await.subscriptions, 1);
    h.points().await.assert_all(PointState::Monitored);
}

// =============================================================================
// Namespaces and Rejections
// =============================================================================

#[tokio::test]
async fn test_reconcile_resolves_namespace_uri() {
    let h = RegistryHarness::new();
    let pressure = format!("nsu={PLANT_NAMESPACE};s=Line1.Pressure");
    h.publish(vec![point(&pressure), point("nsu=urn:unknown;s=Ghost")])
        .await
        .unwrap();

    let points = h.points().await;
    points.assert_all(PointState::UnmonitoredNamespaceUpdateRequested);

    h.reconcile().await;

    let points = h.points().await;
    points.assert_point(&pressure, PointState::Monitored);
    points.assert_point("nsu=urn:unknown;s=Ghost", PointState::UnmonitoredNamespaceUpdateRequested);
    assert_eq!(h.connector.monitored_nodes(), vec!["ns=2;s=Line1.Pressure"]);
}

#[tokio::test]
async fn test_reconcile_retries_rejected_node() {
    let h = RegistryHarness::new();
    h.connector.fail_node("ns=2;s=Missing", StatusCode::BAD_NODE_ID_UNKNOWN);
    h.publish(vec![point("ns=2;s=A"), point("ns=2;s=Missing")]).await.unwrap();

    h.reconcile().await;
    let points = h.points().await;
    points.assert_point("ns=2;s=A", PointState::Monitored);
    points.assert_point("ns=2;s=Missing", PointState::Unmonitored);

    h.connector.heal_node("ns=2;s=Missing");
    h.reconcile().await;

    h.points().await.assert_all(PointState::Monitored);
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.connector.monitored_nodes().len(), 2);
}

// =============================================================================
// Connection Loss
// =============================================================================

#[tokio::test]
async fn test_reconcile_keep_alive_threshold_disconnects() {
    let h = RegistryHarness::new();
    h.publish(vec![point("ns=2;s=A"), point("ns=2;s=B")]).await.unwrap();
    h.reconcile().await;

    // A good keep-alive resets the count.
    for _ in 0..4 {
        assert!(h.connector.keep_alive(StatusCode::BAD_TIMEOUT));
    }
    h.connector.keep_alive(StatusCode::GOOD);
    for _ in 0..4 {
        h.connector.keep_alive(StatusCode::BAD_TIMEOUT);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.session_state().await, Some(SessionState::Connected));

    h.connector.keep_alive(StatusCode::BAD_TIMEOUT);
    let h = &h;
    assert!(
        eventually(WAIT, || async move {
            h.session_state().await == Some(SessionState::Disconnected)
        })
        .await
    );

    h.points().await.assert_all(PointState::Unmonitored);
    assert_eq!(h.connector.close_count(), 1);
    assert_eq!(h.connector.subscription_count(), 0);

    h.reconcile().await;
    assert_eq!(h.connector.connect_count(), 2);
    h.points().await.assert_all(PointState::Monitored);
    assert_eq!(h.connector.monitored_nodes().len(), 2);
}

#[tokio::test]
async fn test_reconcile_keep_alive_loss_while_connecting() {
    let h = RegistryHarness::new();
    h.connector.fail_keep_alives_on_connect(5);
    h.publish(vec![point("ns=2;s=A")]).await.unwrap();

    h.reconcile().await;
    assert_eq!(h.session_state().await, Some(SessionState::Disconnected));
    assert_eq!(h.connector.close_count(), 1);
    assert_eq!(h.connector.subscription_count(), 0);
    h.points().await.assert_point("ns=2;s=A", PointState::Unmonitored);

    h.reconcile().await;
    assert_eq!(h.session_state().await, Some(SessionState::Connected));
    assert_eq!(h.connector.connect_count(), 2);
    h.points().await.assert_point("ns=2;s=A", PointState::Monitored);
}

#[tokio::test]
async fn test_reconcile_invalid_session_reconnects() {
    let h = RegistryHarness::new();
    h.connector.fail_next_item(StatusCode::BAD_SESSION_ID_INVALID);
    h.publish(vec![point("ns=2;s=A")]).await.unwrap();

    h.reconcile().await;
    assert_eq!(h.session_state().await, Some(SessionState::Disconnected));
    assert_eq!(h.connector.close_count(), 1);
    h.points().await.assert_point("ns=2;s=A", PointState::Unmonitored);

    h.reconcile().await;
    assert_eq!(h.connector.connect_count(), 2);
    h.points().await.assert_point("ns=2;s=A", PointState::Monitored);
}

#[tokio::test]
async fn test_reconcile_refused_connect_backs_off() {
    let h = RegistryHarness::new();
    h.connector.fail_connects(2);
    h.publish(vec![point("ns=2;s=A")]).await.unwrap();

    h.reconcile().await;
    h.reconcile().await;
    let session = h.registry.session(ENDPOINT).await.unwrap();
    let diagnostics = session.diagnostics().await;
    assert_eq!(diagnostics.state, SessionState::Disconnected);
    assert_eq!(diagnostics.unsuccessful_connects, 2);

    h.reconcile().await;
    assert_eq!(h.connector.connect_count(), 3);
    assert_eq!(session.diagnostics().await.unsuccessful_connects, 0);
    h.points().await.assert_point("ns=2;s=A", PointState::Monitored);
}

#[tokio::test]
async fn test_reconcile_retry_wait_is_capped() {
    let settings = SessionSettings {
        reconcile_interval: Duration::from_secs(2),
        backoff_cap: 3,
        ..test_settings()
    };
    assert_eq!(settings.retry_wait(0), Duration::from_secs(2));
    assert_eq!(settings.retry_wait(1), Duration::from_secs(4));
    assert_eq!(settings.retry_wait(10), Duration::from_secs(6));
}

// =============================================================================
// Value Flow
// =============================================================================

#[tokio::test]
async fn test_reconcile_values_reach_sink() {
    let h = RegistryHarness::new();
    let pressure = format!("nsu={PLANT_NAMESPACE};s=Line1.Pressure");
    h.publish(vec![point("ns=2;s=Line1.Temperature"), point(&pressure)])
        .await
        .unwrap();
    h.reconcile().await;

    assert_eq!(h.connector.publish("ns=2;s=Line1.Temperature", UaValue::Double(21.5)), 1);
    assert_eq!(h.connector.publish("ns=2;s=Line1.Pressure", UaValue::Int32(7)), 1);

    let temperature = h.sink.records_for("ns=2;s=Line1.Temperature");
    assert_eq!(temperature.len(), 1);
    assert_eq!(temperature[0].endpoint_url, ENDPOINT);
    assert_eq!(temperature[0].value.as_deref(), Some("21.5"));
    assert!(temperature[0].source_timestamp.is_some());

    // Records carry the identifier as configured.
    let pressure_records = h.sink.records_for(&pressure);
    assert_eq!(pressure_records.len(), 1);
    assert_eq!(pressure_records[0].value.as_deref(), Some("7"));
}

#[tokio::test]
async fn test_reconcile_suppressed_status_dropped() {
    let h = RegistryHarness::new();
    h.publish(vec![point("ns=2;s=A")]).await.unwrap();
    h.reconcile().await;

    h.connector.publish_with("ns=2;s=A", |handle| DataChange {
        status: StatusCode::BAD_NO_COMMUNICATION,
        ..DataChange::new(handle, UaValue::Int32(0))
    });
    h.connector.publish_with("ns=2;s=A", |handle| DataChange {
        value: None,
        ..DataChange::new(handle, UaValue::Int32(0))
    });
    assert!(h.sink.is_empty());

    h.connector.publish_with("ns=2;s=A", |handle| DataChange {
        status: StatusCode::BAD_SENSOR_FAILURE,
        ..DataChange::new(handle, UaValue::Int32(0))
    });
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test]
async fn test_reconcile_skip_first_rearms_on_reconnect() {
    let h = RegistryHarness::new();
    h.publish(vec![point_with("ns=2;s=A", skip_first())]).await.unwrap();
    h.reconcile().await;

    h.connector.publish("ns=2;s=A", UaValue::Int32(1));
    h.connector.publish("ns=2;s=A", UaValue::Int32(2));
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value.as_deref(), Some("2"));

    h.connector.fail_next_item(StatusCode::BAD_SESSION_CLOSED);
    h.publish(vec![point("ns=2;s=B")]).await.unwrap();
    h.reconcile().await;
    h.reconcile().await;
    h.points().await.assert_all(PointState::Monitored);

    h.sink.clear();
    h.connector.publish("ns=2;s=A", UaValue::Int32(3));
    h.connector.publish("ns=2;s=A", UaValue::Int32(4));
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value.as_deref(), Some("4"));
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_heartbeat_resends_last_value() {
    let h = RegistryHarness::new();
    h.publish(vec![point_with("ns=2;s=A", heartbeat(5))]).await.unwrap();
    h.reconcile().await;

    // No value yet: the timer fires without anything to send.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(h.sink.is_empty());

    h.connector.publish("ns=2;s=A", UaValue::Boolean(true));
    tokio::time::sleep(Duration::from_secs(11)).await;

    let records = h.sink.records();
    assert_eq!(records.len(), 3);
    let first = records[0].source_timestamp.unwrap();
    assert_eq!(records[1].source_timestamp.unwrap() - first, chrono::Duration::seconds(5));
    assert_eq!(records[2].source_timestamp.unwrap() - first, chrono::Duration::seconds(10));
    assert!(records.iter().all(|r| r.value.as_deref() == Some("true")));
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_heartbeat_stops_on_removal() {
    let h = RegistryHarness::new();
    h.publish(vec![point_with("ns=2;s=A", heartbeat(5)), point("ns=2;s=B")])
        .await
        .unwrap();
    h.reconcile().await;
    h.connector.publish("ns=2;s=A", UaValue::Int32(1));

    h.registry
        .unpublish_nodes(ENDPOINT, &[point_id("ns=2;s=A")])
        .await
        .unwrap();
    h.reconcile().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.sink.len(), 1);
}

// =============================================================================
// Listings and Write-back
// =============================================================================

#[tokio::test]
async fn test_reconcile_paged_listing() {
    let h = RegistryHarness::builder()
        .settings(SessionSettings {
            page_size: 2,
            ..test_settings()
        })
        .build();
    let points: Vec<_> = (0..5).map(|i| point(&format!("ns=2;s=Tag{i}"))).collect();
    h.publish(points).await.unwrap();

    let first = h.registry.list_points(ENDPOINT, None).await.unwrap();
    assert_eq!(first.items.len(), 2);
    let token = first.continuation.clone().unwrap();

    let second = h.registry.list_points(ENDPOINT, Some(&token)).await.unwrap();
    assert_eq!(second.items.len(), 2);
    assert_eq!(second.items[0].id, "ns=2;s=Tag2");
    let token = second.continuation.clone().unwrap();

    let third = h.registry.list_points(ENDPOINT, Some(&token)).await.unwrap();
    assert_eq!(third.items.len(), 1);
    assert!(third.continuation.is_none());

    let endpoints = h.registry.list_endpoints(None).await.unwrap();
    assert_eq!(endpoints.items.len(), 1);
    assert_eq!(endpoints.items[0].point_count, 5);

    // Any change invalidates outstanding tokens.
    h.publish(vec![point("ns=2;s=Late")]).await.unwrap();
    let stale = h.registry.list_points(ENDPOINT, Some(&token)).await;
    assert!(matches!(
        stale,
        Err(OpcUaError::Admin(AdminError::ConcurrentModification { .. }))
    ));
}

#[derive(Default)]
struct LatestVersion(AtomicU64);

impl PersistenceHook for LatestVersion {
    fn request_write_back(&self, version: u64) {
        self.0.fetch_max(version, Ordering::AcqRel);
    }
}

#[tokio::test]
async fn test_reconcile_requests_write_back() {
    let hook = Arc::new(LatestVersion::default());
    let h = RegistryHarness::builder().persistence(hook.clone()).build();

    h.publish(vec![point("ns=2;s=A"), point("ns=2;s=B")]).await.unwrap();
    h.reconcile().await;
    let requested = hook.0.load(Ordering::Acquire);
    assert_eq!(requested, h.registry.context().version.current());
    assert!(requested >= 2);

    // Nothing changed, nothing new requested.
    h.reconcile().await;
    assert_eq!(hook.0.load(Ordering::Acquire), requested);

    h.registry
        .unpublish_nodes(ENDPOINT, &[point_id("ns=2;s=B")])
        .await
        .unwrap();
    h.reconcile().await;
    assert!(hook.0.load(Ordering::Acquire) > requested);

    let published = h.registry.published_configuration().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].points.len(), 1);
    assert_eq!(published[0].points[0].id, "ns=2;s=A");
}

#[tokio::test]
async fn test_reconcile_loops_run_in_background() {
    let h = RegistryHarness::new();
    h.registry.start().await;
    h.publish(vec![point("ns=2;s=A")]).await.unwrap();

    let h = &h;
    assert!(
        eventually(WAIT, || async move {
            h.point_state("ns=2;s=A").await == Some(PointState::Monitored)
        })
        .await
    );

    h.registry
        .unpublish_nodes(ENDPOINT, &[point_id("ns=2;s=A")])
        .await
        .unwrap();
    assert!(eventually(WAIT, || async move { h.registry.session_count().await == 0 }).await);
    assert_eq!(h.connector.subscription_count(), 0);

    h.shutdown().await;
}
