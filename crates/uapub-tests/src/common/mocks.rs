// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! Fakes of the two outer boundaries of the publisher:
//!
//! - [`FakeConnector`]: an in-memory OPC UA server behind the
//!   [`UaConnector`] / [`UaSession`] traits
//! - [`RecordingTransport`]: a [`TelemetryTransport`] that keeps every frame
//! - [`CollectingSink`]: a [`RecordSink`] that keeps every record
//!
//! All fakes support fault injection and record their interactions.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use uapub_buffer::{Frame, TelemetryTransport, TransportError};
use uapub_core::{MessageRecord, RecordSink};
use uapub_opcua::client::{
    ConnectRequest, CreatedMonitoredItem, CreatedSubscription, DataChange, DataChangeHandler,
    KeepAliveHandler, MonitoredItemRequest,
};
use uapub_opcua::{
    NodeId, OpcUaError, OpcUaResult, StatusCode, SubscriptionError, UaConnector, UaSession,
    UaValue,
};

// =============================================================================
// Fake OPC UA Server
// =============================================================================

struct FakeSubscription {
    publishing_interval: Duration,
    handler: Arc<dyn DataChangeHandler>,
    items: BTreeMap<u32, MonitoredItemRequest>,
}

#[derive(Default)]
struct ServerState {
    namespaces: Mutex<Vec<String>>,
    application_uri: Mutex<Option<String>>,
    minimum_publishing_interval: Mutex<Duration>,
    connect_failures: AtomicU32,
    connect_keep_alive_faults: AtomicU32,
    subscription_fault: Mutex<Option<StatusCode>>,
    node_faults: Mutex<HashMap<String, StatusCode>>,
    next_item_fault: Mutex<Option<StatusCode>>,
    display_names: Mutex<HashMap<String, String>>,
    subscriptions: Mutex<BTreeMap<u32, FakeSubscription>>,
    keep_alive: Mutex<Option<Arc<dyn KeepAliveHandler>>>,
    connect_requests: Mutex<Vec<ConnectRequest>>,
    next_id: AtomicU32,
    connects: AtomicU32,
    closes: AtomicU32,
}

impl ServerState {
    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Snapshot of one server-side subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    /// Server subscription id.
    pub subscription_id: u32,
    /// Revised publishing interval.
    pub publishing_interval: Duration,
    /// Monitored node ids in `ns=<index>;<id>` form.
    pub nodes: Vec<String>,
}

/// An in-memory OPC UA server reachable through [`UaConnector`].
///
/// Subscriptions live until deleted or until the session is closed.
pub struct FakeConnector {
    state: Arc<ServerState>,
}

impl FakeConnector {
    /// Creates a server with the given namespace array.
    pub fn new(namespaces: &[&str]) -> Arc<Self> {
        let state = ServerState::default();
        *state.namespaces.lock() = namespaces.iter().map(|s| s.to_string()).collect();
        *state.minimum_publishing_interval.lock() = Duration::from_millis(1000);
        Arc::new(Self {
            state: Arc::new(state),
        })
    }

    /// Sets the server's application URI.
    pub fn set_application_uri(&self, uri: impl Into<String>) {
        *self.state.application_uri.lock() = Some(uri.into());
    }

    /// Replaces the namespace array seen by future sessions.
    pub fn set_namespaces(&self, namespaces: &[&str]) {
        *self.state.namespaces.lock() = namespaces.iter().map(|s| s.to_string()).collect();
    }

    /// Publishing intervals below this are revised up to it.
    pub fn set_minimum_publishing_interval(&self, interval: Duration) {
        *self.state.minimum_publishing_interval.lock() = interval;
    }

    /// Refuses the next `count` connect attempts.
    pub fn fail_connects(&self, count: u32) {
        self.state.connect_failures.store(count, Ordering::Release);
    }

    /// Reports `count` bad keep-alives while the next connect is in flight.
    pub fn fail_keep_alives_on_connect(&self, count: u32) {
        self.state.connect_keep_alive_faults.store(count, Ordering::Release);
    }

    /// Rejects subscription creation with `status` until cleared with `None`.
    pub fn fail_subscriptions(&self, status: Option<StatusCode>) {
        *self.state.subscription_fault.lock() = status;
    }

    /// Rejects monitored items for `node_id` with `status`.
    pub fn fail_node(&self, node_id: &str, status: StatusCode) {
        self.state.node_faults.lock().insert(node_id.to_string(), status);
    }

    /// Accepts monitored items for `node_id` again.
    pub fn heal_node(&self, node_id: &str) {
        self.state.node_faults.lock().remove(node_id);
    }

    /// Fails the next monitored item creation with `status`.
    pub fn fail_next_item(&self, status: StatusCode) {
        *self.state.next_item_fault.lock() = Some(status);
    }

    /// Sets the display name attribute of a node.
    pub fn set_display_name(&self, node_id: &str, name: impl Into<String>) {
        self.state
            .display_names
            .lock()
            .insert(node_id.to_string(), name.into());
    }

    /// Number of connect attempts, failed ones included.
    pub fn connect_count(&self) -> u32 {
        self.state.connects.load(Ordering::Acquire)
    }

    /// Number of closed sessions.
    pub fn close_count(&self) -> u32 {
        self.state.closes.load(Ordering::Acquire)
    }

    /// Connect requests received so far.
    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.state.connect_requests.lock().clone()
    }

    /// Live subscriptions, ordered by id.
    pub fn subscriptions(&self) -> Vec<SubscriptionSnapshot> {
        self.state
            .subscriptions
            .lock()
            .iter()
            .map(|(id, sub)| SubscriptionSnapshot {
                subscription_id: *id,
                publishing_interval: sub.publishing_interval,
                nodes: sub.items.values().map(|i| i.node_id.to_string()).collect(),
            })
            .collect()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.lock().len()
    }

    /// Node ids of every live monitored item.
    pub fn monitored_nodes(&self) -> Vec<String> {
        self.subscriptions().into_iter().flat_map(|s| s.nodes).collect()
    }

    /// Delivers a keep-alive result to the current session.
    ///
    /// Returns `false` if no session has connected yet.
    pub fn keep_alive(&self, status: StatusCode) -> bool {
        let handler = self.state.keep_alive.lock().clone();
        match handler {
            Some(handler) => {
                handler.on_keep_alive(status);
                true
            }
            None => false,
        }
    }

    /// Reports a good value for every monitored item on `node_id`.
    ///
    /// Returns the number of items notified.
    pub fn publish(&self, node_id: &str, value: UaValue) -> usize {
        self.publish_with(node_id, |handle| DataChange::new(handle, value.clone()))
    }

    /// Reports a value built by `change` for every monitored item on `node_id`.
    pub fn publish_with(&self, node_id: &str, change: impl Fn(u32) -> DataChange) -> usize {
        let targets: Vec<(Arc<dyn DataChangeHandler>, u32)> = self
            .state
            .subscriptions
            .lock()
            .values()
            .flat_map(|sub| {
                sub.items
                    .values()
                    .filter(|item| item.node_id.to_string() == node_id)
                    .map(|item| (Arc::clone(&sub.handler), item.client_handle))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (handler, client_handle) in &targets {
            handler.on_data_change(change(*client_handle));
        }
        targets.len()
    }
}

#[async_trait]
impl UaConnector for FakeConnector {
    async fn connect(
        &self,
        request: &ConnectRequest,
        keep_alive: Arc<dyn KeepAliveHandler>,
    ) -> OpcUaResult<Arc<dyn UaSession>> {
        self.state.connects.fetch_add(1, Ordering::AcqRel);
        self.state.connect_requests.lock().push(request.clone());

        let refuse = self
            .state
            .connect_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(OpcUaError::connection_refused(&request.endpoint_url, "injected failure"));
        }

        *self.state.keep_alive.lock() = Some(Arc::clone(&keep_alive));
        let faults = self.state.connect_keep_alive_faults.swap(0, Ordering::AcqRel);
        if faults > 0 {
            for _ in 0..faults {
                keep_alive.on_keep_alive(StatusCode::BAD_TIMEOUT);
            }
            // Let work spawned by the callbacks run before the connect returns.
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        }
        Ok(Arc::new(FakeSession {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session handed out by [`FakeConnector`].
pub struct FakeSession {
    state: Arc<ServerState>,
    closed: AtomicBool,
}

impl FakeSession {
    fn ensure_open(&self) -> OpcUaResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OpcUaError::not_connected());
        }
        Ok(())
    }
}

#[async_trait]
impl UaSession for FakeSession {
    async fn read_namespace_array(&self) -> OpcUaResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.state.namespaces.lock().clone())
    }

    fn server_application_uri(&self) -> Option<String> {
        self.state.application_uri.lock().clone()
    }

    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> OpcUaResult<CreatedSubscription> {
        self.ensure_open()?;
        if let Some(status) = *self.state.subscription_fault.lock() {
            return Err(SubscriptionError::creation_failed(publishing_interval, status).into());
        }

        let minimum = *self.state.minimum_publishing_interval.lock();
        let revised = publishing_interval.max(minimum);
        let subscription_id = self.state.next_id();
        self.state.subscriptions.lock().insert(
            subscription_id,
            FakeSubscription {
                publishing_interval: revised,
                handler,
                items: BTreeMap::new(),
            },
        );
        Ok(CreatedSubscription {
            subscription_id,
            revised_publishing_interval: revised,
        })
    }

    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()> {
        self.ensure_open()?;
        match self.state.subscriptions.lock().remove(&subscription_id) {
            Some(_) => Ok(()),
            None => Err(OpcUaError::fault(
                "DeleteSubscriptions",
                StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            )),
        }
    }

    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: MonitoredItemRequest,
    ) -> OpcUaResult<CreatedMonitoredItem> {
        self.ensure_open()?;
        if let Some(status) = self.state.next_item_fault.lock().take() {
            return Err(OpcUaError::fault("CreateMonitoredItems", status));
        }
        let node = request.node_id.to_string();
        if let Some(status) = self.state.node_faults.lock().get(&node).copied() {
            return Err(OpcUaError::monitored_item_failed(node, status));
        }

        let monitored_item_id = self.state.next_id();
        let revised_sampling_interval = request.sampling_interval;
        let mut subscriptions = self.state.subscriptions.lock();
        let subscription = subscriptions.get_mut(&subscription_id).ok_or_else(|| {
            OpcUaError::fault("CreateMonitoredItems", StatusCode::BAD_SUBSCRIPTION_ID_INVALID)
        })?;
        subscription.items.insert(monitored_item_id, request);
        Ok(CreatedMonitoredItem {
            monitored_item_id,
            revised_sampling_interval,
        })
    }

    async fn delete_monitored_item(
        &self,
        subscription_id: u32,
        monitored_item_id: u32,
    ) -> OpcUaResult<()> {
        self.ensure_open()?;
        let mut subscriptions = self.state.subscriptions.lock();
        let removed = subscriptions
            .get_mut(&subscription_id)
            .and_then(|s| s.items.remove(&monitored_item_id));
        match removed {
            Some(_) => Ok(()),
            None => Err(OpcUaError::fault(
                "DeleteMonitoredItems",
                StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
            )),
        }
    }

    async fn read_display_name(&self, node_id: &NodeId) -> OpcUaResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.state.display_names.lock().get(&node_id.to_string()).cloned())
    }

    async fn close(&self) -> OpcUaResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.state.closes.fetch_add(1, Ordering::AcqRel);
        self.state.subscriptions.lock().clear();
        Ok(())
    }
}

// =============================================================================
// Recording Transport
// =============================================================================

/// A transport that records frames instead of sending them.
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
    closed: AtomicBool,
    overhead: usize,
    sent: Notify,
}

impl RecordingTransport {
    /// Creates a transport without protocol overhead.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a transport reporting `overhead` bytes per frame.
    pub fn with_overhead(overhead: usize) -> Arc<Self> {
        Arc::new(Self {
            overhead,
            ..Self::default()
        })
    }

    /// Makes every send fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Accepted frame payloads.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    /// Accepted frames parsed as JSON arrays.
    pub fn decoded_frames(&self) -> Vec<Vec<serde_json::Value>> {
        self.frames
            .lock()
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap_or_default())
            .collect()
    }

    /// Number of accepted frames.
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Number of records across accepted frames.
    pub fn record_count(&self) -> usize {
        self.decoded_frames().iter().map(Vec::len).sum()
    }

    /// Number of send attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// Returns `true` once the batcher closed the transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits until at least `count` frames were accepted.
    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.sent.notified();
                if self.frame_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl TelemetryTransport for RecordingTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        if self.failing.load(Ordering::Acquire) {
            return Err(TransportError::publish(frame.len(), "injected failure"));
        }
        self.frames.lock().push(frame.into_payload());
        self.sent.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }

    fn protocol_overhead(&self) -> usize {
        self.overhead
    }

    fn is_healthy(&self) -> bool {
        !self.failing.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// =============================================================================
// Collecting Sink
// =============================================================================

/// A record sink that keeps everything it is offered.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<MessageRecord>>,
    rejecting: AtomicBool,
    rejected: AtomicUsize,
    arrived: Notify,
}

impl CollectingSink {
    /// Creates an accepting sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rejects every record until reset, as a full queue would.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::Release);
    }

    /// Records accepted so far.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.records.lock().clone()
    }

    /// Accepted records for one configured identifier.
    pub fn records_for(&self, node_id: &str) -> Vec<MessageRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.node_id.as_deref() == Some(node_id))
            .cloned()
            .collect()
    }

    /// Number of accepted records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing was accepted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rejected records.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Acquire)
    }

    /// Drops everything collected so far.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Waits until at least `count` records were accepted.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.arrived.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl RecordSink for CollectingSink {
    fn enqueue(&self, record: MessageRecord) -> bool {
        if self.rejecting.load(Ordering::Acquire) {
            self.rejected.fetch_add(1, Ordering::AcqRel);
            return false;
        }
        self.records.lock().push(record);
        self.arrived.notify_waiters();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_connector_refuses_then_connects() {
        struct Ignore;
        impl KeepAliveHandler for Ignore {
            fn on_keep_alive(&self, _status: StatusCode) {}
        }

        let connector = FakeConnector::new(&["http://opcfoundation.org/UA/"]);
        connector.fail_connects(1);
        let request = ConnectRequest {
            endpoint_url: "opc.tcp://fake:4840".into(),
            use_security: false,
            identity: Default::default(),
            session_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(2),
        };

        assert!(connector.connect(&request, Arc::new(Ignore)).await.is_err());
        let session = connector.connect(&request, Arc::new(Ignore)).await.unwrap();
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(session.read_namespace_array().await.unwrap().len(), 1);

        session.close().await.unwrap();
        assert!(session.read_namespace_array().await.is_err());
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_recording_transport_failure() {
        let transport = RecordingTransport::new();
        transport.set_failing(true);
        assert!(transport.send(Frame::single(b"{}")).await.is_err());
        transport.set_failing(false);
        transport.send(Frame::single(b"{}")).await.unwrap();

        assert_eq!(transport.attempts(), 2);
        assert_eq!(transport.frame_count(), 1);
        assert_eq!(transport.record_count(), 1);
    }

    #[test]
    fn test_collecting_sink_rejects() {
        let sink = CollectingSink::new();
        sink.set_rejecting(true);
        assert!(!sink.enqueue(MessageRecord::new("opc.tcp://x:4840")));
        assert_eq!(sink.rejected(), 1);
        assert!(sink.is_empty());
    }
}
