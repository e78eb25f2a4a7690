// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Sessions and the per-endpoint reconciliation pass.
//!
//! A [`Session`] owns every subscription and point configured for one
//! endpoint. All structural state lives behind one async mutex. The mutex is
//! released while connecting, so listings and admin requests do not wait on
//! slow or unreachable servers; it is held across registration calls, which
//! are bounded by the operation timeout.
//!
//! # Reconciliation pass
//!
//! 1. Connect if disconnected and points are waiting.
//! 2. Resolve and register pending points, creating subscriptions on demand.
//! 3. Deregister points tagged for removal.
//! 4. Drop empty subscriptions.
//!
//! Removal of empty sessions and persistence requests are driven by the
//! [`SessionRegistry`](crate::registry::SessionRegistry).

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admin::{EndpointInfo, PointCounts, PointInfo, SessionDiagnostics};
use crate::client::{AuthMode, ConnectRequest, KeepAliveHandler, MonitoredItemRequest, UaSession, UserIdentity};
use crate::context::PublisherContext;
use crate::error::{AdminError, ConnectionError, OpcUaResult, SessionError, TimeoutError};
use crate::heartbeat::Heartbeat;
use crate::point::{MonitoredPoint, PointRequest, PointRuntime};
use crate::subscription::Subscription;
use crate::translate::NotificationTranslator;
use crate::types::{NamespaceTable, PointId, StatusCode};

// =============================================================================
// EndpointRequest
// =============================================================================

/// Connection parameters of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRequest {
    /// Endpoint URL.
    pub endpoint_url: String,
    /// Prefer a secured endpoint.
    pub use_security: bool,
    /// User identity.
    pub identity: UserIdentity,
}

impl EndpointRequest {
    /// Creates an anonymous, unsecured endpoint request.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            use_security: false,
            identity: UserIdentity::Anonymous,
        }
    }

    /// Sets the security preference.
    pub fn with_security(mut self, use_security: bool) -> Self {
        self.use_security = use_security;
        self
    }

    /// Sets the user identity.
    pub fn with_identity(mut self, identity: UserIdentity) -> Self {
        self.identity = identity;
        self
    }
}

// =============================================================================
// SessionState
// =============================================================================

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and activated.
    Connected,
}

impl SessionState {
    /// Returns `true` if connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if disconnected.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Live server state of a connected session.
#[derive(Clone)]
struct Link {
    client: Arc<dyn UaSession>,
    namespaces: NamespaceTable,
    application_uri: Option<String>,
}

enum Connection {
    Disconnected,
    Connecting,
    Connected(Link),
}

enum ConnectionEvent {
    Started,
    Established(Link),
    Failed,
    Lost,
}

impl Connection {
    fn state(&self) -> SessionState {
        match self {
            Self::Disconnected => SessionState::Disconnected,
            Self::Connecting => SessionState::Connecting,
            Self::Connected(_) => SessionState::Connected,
        }
    }

    fn on(self, event: ConnectionEvent) -> Self {
        use Connection as C;
        use ConnectionEvent as E;

        match (self, event) {
            (C::Disconnected, E::Started) => C::Connecting,
            (C::Connecting, E::Established(link)) => C::Connected(link),
            (C::Connecting, E::Failed) => C::Disconnected,
            (_, E::Lost) => C::Disconnected,
            (current, _) => current,
        }
    }

    fn link(&self) -> Option<&Link> {
        match self {
            Self::Connected(link) => Some(link),
            _ => None,
        }
    }
}

struct SessionInner {
    connection: Connection,
    unsuccessful_connects: u32,
    subscriptions: Vec<Subscription>,
    last_namespaces: Option<NamespaceTable>,
}

impl SessionInner {
    fn transition(&mut self, event: ConnectionEvent) -> (SessionState, SessionState) {
        let before = self.connection.state();
        let current = std::mem::replace(&mut self.connection, Connection::Disconnected);
        self.connection = current.on(event);
        (before, self.connection.state())
    }

    fn namespaces(&self) -> Option<&NamespaceTable> {
        self.connection
            .link()
            .map(|link| &link.namespaces)
            .or(self.last_namespaces.as_ref())
    }

    fn has_pending(&self) -> bool {
        self.subscriptions.iter().any(Subscription::has_pending)
    }

    fn points(&self) -> impl Iterator<Item = &MonitoredPoint> {
        self.subscriptions.iter().flat_map(|s| s.points().iter())
    }
}

// =============================================================================
// Session
// =============================================================================

/// Result of adding a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new point was created.
    Added,
    /// An equivalent point is already configured.
    AlreadyPublished,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    /// Wait before the next pass.
    pub next_wait: Duration,
    /// `true` if the session holds no subscriptions.
    pub empty: bool,
}

/// One logical connection to an endpoint.
pub struct Session {
    endpoint: EndpointRequest,
    context: Arc<PublisherContext>,
    translator: Arc<NotificationTranslator>,
    inner: Mutex<SessionInner>,
    removed: AtomicBool,
    recheck: Notify,
    cancel: CancellationToken,
    missed_keep_alives: AtomicU32,
    generation: AtomicU64,
    next_client_handle: AtomicU32,
}

impl Session {
    /// Creates a disconnected session without points.
    pub fn new(endpoint: EndpointRequest, context: Arc<PublisherContext>) -> Arc<Self> {
        let translator = NotificationTranslator::new(
            endpoint.endpoint_url.clone(),
            context.telemetry.clone(),
            context.suppressed_status_codes.clone(),
            context.sink.clone(),
        );
        let cancel = context.shutdown.child_token();
        Arc::new(Self {
            endpoint,
            translator: Arc::new(translator),
            inner: Mutex::new(SessionInner {
                connection: Connection::Disconnected,
                unsuccessful_connects: 0,
                subscriptions: Vec::new(),
                last_namespaces: None,
            }),
            removed: AtomicBool::new(false),
            recheck: Notify::new(),
            cancel,
            missed_keep_alives: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            next_client_handle: AtomicU32::new(1),
            context,
        })
    }

    /// Endpoint parameters.
    pub fn endpoint(&self) -> &EndpointRequest {
        &self.endpoint
    }

    /// Endpoint URL.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint.endpoint_url
    }

    /// Returns `true` once the session left the registry.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Cancellation token of the session's tasks.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wakes the reconciliation loop.
    pub fn recheck(&self) {
        self.recheck.notify_one();
    }

    /// Waits for a recheck signal.
    pub async fn rechecked(&self) {
        self.recheck.notified().await;
    }

    /// Current connection state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.connection.state()
    }

    // =========================================================================
    // Administrative mutation
    // =========================================================================

    /// Adds points, skipping those already configured.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Removed`] if the session left the registry;
    /// the caller retries on a fresh session.
    pub async fn add_points(&self, requests: Vec<PointRequest>) -> OpcUaResult<Vec<AddOutcome>> {
        let mut inner = self.inner.lock().await;
        if self.is_removed() {
            return Err(SessionError::Removed {
                endpoint: self.endpoint.endpoint_url.clone(),
            }
            .into());
        }

        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.add_point_locked(&mut inner, request));
        }
        Ok(outcomes)
    }

    fn add_point_locked(&self, inner: &mut SessionInner, request: PointRequest) -> AddOutcome {
        let namespaces = inner.namespaces().cloned();
        let exists = inner.points().any(|p| {
            !p.state().is_removal_requested() && p.matches(&request.id, namespaces.as_ref())
        });
        if exists {
            debug!(endpoint = %self.endpoint_url(), node_id = %request.original, "Point already published");
            return AddOutcome::AlreadyPublished;
        }

        let settings = &self.context.settings;
        let publishing_interval = request
            .settings
            .publishing_interval
            .unwrap_or(settings.default_publishing_interval);
        let heartbeat = Heartbeat::new(
            request.original.clone(),
            request
                .settings
                .heartbeat_interval
                .unwrap_or(settings.default_heartbeat_interval),
            self.context.sink.clone(),
            self.context.runtime.clone(),
            self.cancel.clone(),
        );
        let runtime = Arc::new(PointRuntime::new(
            self.endpoint_url(),
            request.original.clone(),
            request.settings.display_name.clone(),
            request.settings.skip_first.unwrap_or(settings.default_skip_first),
            heartbeat,
        ));
        let handle = self.next_client_handle.fetch_add(1, Ordering::Relaxed);
        let point = MonitoredPoint::new(request, handle, runtime);

        let index = match inner
            .subscriptions
            .iter()
            .position(|s| s.accepts_interval(publishing_interval))
        {
            Some(index) => index,
            None => {
                inner
                    .subscriptions
                    .push(Subscription::new(publishing_interval, self.translator.clone()));
                inner.subscriptions.len() - 1
            }
        };

        info!(
            endpoint = %self.endpoint_url(),
            node_id = %point.original_id(),
            state = %point.state(),
            "Point added"
        );
        inner.subscriptions[index].add(point);
        self.context.version.bump();
        AddOutcome::Added
    }

    /// Tags matching points for removal. Returns the number newly tagged.
    pub async fn request_removal(&self, ids: &[PointId]) -> usize {
        let mut inner = self.inner.lock().await;
        let namespaces = inner.namespaces().cloned();

        let mut tagged = 0;
        for subscription in &mut inner.subscriptions {
            for point in subscription.points_mut() {
                if ids.iter().any(|id| point.matches(id, namespaces.as_ref())) && point.request_removal() {
                    debug!(endpoint = %self.endpoint_url(), node_id = %point.original_id(), "Point tagged for removal");
                    tagged += 1;
                }
            }
        }
        if tagged > 0 {
            self.context.version.bump();
        }
        tagged
    }

    /// Tags every point for removal. Returns the number newly tagged.
    pub async fn request_removal_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let tagged: usize = inner
            .subscriptions
            .iter_mut()
            .flat_map(|s| s.points_mut().iter_mut())
            .map(|p| usize::from(p.request_removal()))
            .sum();
        if tagged > 0 {
            self.context.version.bump();
        }
        tagged
    }

    // =========================================================================
    // Read-only queries
    // =========================================================================

    /// Lists configured points, excluding those tagged for removal.
    pub async fn points(&self) -> Vec<PointInfo> {
        let inner = self.inner.lock().await;
        inner
            .points()
            .filter(|p| !p.state().is_removal_requested())
            .map(|p| PointInfo::new(p.original_id(), p.state(), p.settings()))
            .collect()
    }

    /// Describes the endpoint.
    pub async fn info(&self) -> EndpointInfo {
        let inner = self.inner.lock().await;
        EndpointInfo {
            endpoint_url: self.endpoint.endpoint_url.clone(),
            use_security: self.endpoint.use_security,
            auth_mode: self.endpoint.identity.mode(),
            state: inner.connection.state(),
            point_count: inner
                .points()
                .filter(|p| !p.state().is_removal_requested())
                .count(),
        }
    }

    /// Authentication mode.
    pub fn auth_mode(&self) -> AuthMode {
        self.endpoint.identity.mode()
    }

    /// Collects diagnostics.
    pub async fn diagnostics(&self) -> SessionDiagnostics {
        let inner = self.inner.lock().await;
        let mut points = PointCounts::default();
        for point in inner.points() {
            points.record(point.state());
        }
        SessionDiagnostics {
            endpoint_url: self.endpoint.endpoint_url.clone(),
            state: inner.connection.state(),
            unsuccessful_connects: inner.unsuccessful_connects,
            missed_keep_alives: self.missed_keep_alives.load(Ordering::Relaxed),
            subscriptions: inner.subscriptions.len(),
            attached_subscriptions: inner.subscriptions.iter().filter(|s| s.is_attached()).count(),
            points,
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Runs one reconciliation pass.
    pub async fn reconcile_once(self: &Arc<Self>) -> PassOutcome {
        let settings = &self.context.settings;
        let ready = PassOutcome {
            next_wait: settings.reconcile_interval,
            empty: false,
        };
        if self.cancel.is_cancelled() {
            return ready;
        }

        // Connect with the lock released.
        let connect = {
            let mut inner = self.inner.lock().await;
            if inner.connection.state().is_disconnected() && inner.has_pending() {
                inner.transition(ConnectionEvent::Started);
                true
            } else {
                false
            }
        };
        if connect {
            let result = self.connect().await;
            let mut inner = self.inner.lock().await;
            match result {
                Ok(link) if !self.cancel.is_cancelled() => {
                    let namespaces = link.namespaces.clone();
                    let client = Arc::clone(&link.client);
                    let (_, after) = inner.transition(ConnectionEvent::Established(link));
                    if !after.is_connected() {
                        // Released while connecting, e.g. by the keep-alive monitor.
                        drop(inner);
                        debug!(endpoint = %self.endpoint_url(), "Connection released before it was established");
                        if let Err(e) = self.call("close", client.close()).await {
                            debug!(endpoint = %self.endpoint_url(), error = %e, "Close failed, ignoring");
                        }
                        return ready;
                    }
                    inner.last_namespaces = Some(namespaces);
                    inner.unsuccessful_connects = 0;
                    info!(endpoint = %self.endpoint_url(), "Session connected");
                }
                Ok(link) => {
                    inner.transition(ConnectionEvent::Failed);
                    drop(inner);
                    let _ = self.call("close", link.client.close()).await;
                    return ready;
                }
                Err(e) => {
                    inner.transition(ConnectionEvent::Failed);
                    inner.unsuccessful_connects = inner.unsuccessful_connects.saturating_add(1);
                    let next_wait = settings.retry_wait(inner.unsuccessful_connects);
                    warn!(
                        endpoint = %self.endpoint_url(),
                        failures = inner.unsuccessful_connects,
                        retry_in = ?next_wait,
                        error = %e,
                        "Connect failed"
                    );
                    let mut outcome = self.unmonitor_removed(&mut inner).await;
                    outcome.next_wait = next_wait;
                    return outcome;
                }
            }
        }

        let mut inner = self.inner.lock().await;
        if !self.cancel.is_cancelled() && self.monitor_pending(&mut inner).await.is_err() {
            self.release_locked(&mut inner, false).await;
            warn!(endpoint = %self.endpoint_url(), "Session invalidated by server, reconnecting");
            self.recheck();
        }
        self.unmonitor_removed(&mut inner).await
    }

    async fn connect(self: &Arc<Self>) -> OpcUaResult<Link> {
        let settings = &self.context.settings;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.missed_keep_alives.store(0, Ordering::Release);

        let keep_alive: Arc<dyn KeepAliveHandler> = Arc::new(KeepAliveMonitor {
            session: Arc::downgrade(self),
            generation,
        });
        let request = ConnectRequest {
            endpoint_url: self.endpoint.endpoint_url.clone(),
            use_security: self.endpoint.use_security,
            identity: self.endpoint.identity.clone(),
            session_timeout: settings.session_timeout,
            keep_alive_interval: settings.keep_alive_interval,
        };

        debug!(endpoint = %self.endpoint_url(), "Connecting");
        let connect = tokio::time::timeout(
            settings.connect_timeout,
            self.context.connector.connect(&request, keep_alive),
        );
        let client = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AdminError::ShuttingDown.into()),
            result = connect => result.map_err(|_| {
                ConnectionError::timed_out(self.endpoint_url(), settings.connect_timeout)
            })??,
        };

        let namespaces = match self.call("read namespace array", client.read_namespace_array()).await {
            Ok(namespaces) => NamespaceTable::new(namespaces),
            Err(e) => {
                let _ = self.call("close", client.close()).await;
                return Err(e);
            }
        };
        Ok(Link {
            application_uri: client.server_application_uri(),
            client,
            namespaces,
        })
    }

    /// Registers pending points. Fails only if the session became invalid.
    ///
    /// A subscription whose revised publishing interval matches one already
    /// on the server is folded into it.
    async fn monitor_pending(&self, inner: &mut MutexGuard<'_, SessionInner>) -> Result<(), ()> {
        let Some(link) = inner.connection.link().cloned() else {
            return Ok(());
        };

        let mut index = 0;
        while index < inner.subscriptions.len() {
            if self.cancel.is_cancelled() {
                break;
            }
            if !inner.subscriptions[index].has_pending() {
                index += 1;
                continue;
            }

            if !inner.subscriptions[index].is_attached() {
                let subscription = &inner.subscriptions[index];
                let created = self
                    .call(
                        "create subscription",
                        link.client.create_subscription(
                            subscription.requested_publishing_interval(),
                            subscription.handler(),
                        ),
                    )
                    .await;
                match created {
                    Ok(created) => {
                        debug!(
                            endpoint = %self.endpoint_url(),
                            subscription_id = created.subscription_id,
                            revised = ?created.revised_publishing_interval,
                            "Subscription created"
                        );
                        inner.subscriptions[index].attach(created);
                    }
                    Err(e) if e.is_session_invalid() => return Err(()),
                    Err(e) => {
                        e.log("create subscription");
                        index += 1;
                        continue;
                    }
                }

                if let Some(target) = self.merge_duplicate(&link, inner, index).await {
                    self.monitor_points(&link, &mut inner.subscriptions[target]).await?;
                    continue;
                }
            }

            self.monitor_points(&link, &mut inner.subscriptions[index]).await?;
            index += 1;
        }
        Ok(())
    }

    /// Folds the subscription at `index` into another attached subscription
    /// with the same revised publishing interval.
    ///
    /// Returns the new index of the receiving subscription.
    async fn merge_duplicate(
        &self,
        link: &Link,
        inner: &mut MutexGuard<'_, SessionInner>,
        index: usize,
    ) -> Option<usize> {
        let revised = inner.subscriptions[index].revised_publishing_interval()?;
        let target = inner
            .subscriptions
            .iter()
            .enumerate()
            .position(|(i, s)| i != index && s.revised_publishing_interval() == Some(revised))?;

        let duplicate = inner.subscriptions.remove(index);
        if let Some(sid) = duplicate.subscription_id() {
            if let Err(e) = self.call("delete subscription", link.client.delete_subscription(sid)).await {
                debug!(subscription_id = sid, error = %e, "Subscription delete failed, ignoring");
            }
        }

        let target = if target > index { target - 1 } else { target };
        let points = duplicate.into_points();
        debug!(
            endpoint = %self.endpoint_url(),
            points = points.len(),
            revised = ?revised,
            "Merged subscription with equal revised publishing interval"
        );
        for point in points {
            inner.subscriptions[target].add(point);
        }
        Some(target)
    }

    /// Registers the pending points of one attached subscription.
    async fn monitor_points(&self, link: &Link, subscription: &mut Subscription) -> Result<(), ()> {
        let Some(subscription_id) = subscription.subscription_id() else {
            return Ok(());
        };
        let settings = &self.context.settings;

        for point in subscription.points_mut() {
            if self.cancel.is_cancelled() {
                break;
            }
            if !point.state().is_pending() {
                continue;
            }

            let node_id = match point.id().resolve(&link.namespaces) {
                Ok(node_id) => node_id,
                Err(e) => {
                    warn!(endpoint = %self.endpoint_url(), node_id = %point.original_id(), error = %e, "Namespace not resolvable, skipping point");
                    point.mark_namespace_unresolved();
                    continue;
                }
            };

            let request = MonitoredItemRequest {
                node_id: node_id.clone(),
                client_handle: point.client_handle(),
                sampling_interval: point
                    .settings()
                    .sampling_interval
                    .unwrap_or(settings.default_sampling_interval),
                queue_size: settings.queue_size,
            };
            match self
                .call("create monitored item", link.client.create_monitored_item(subscription_id, request))
                .await
            {
                Ok(created) => {
                    point.mark_registered(
                        node_id.clone(),
                        created,
                        &link.namespaces,
                        link.application_uri.clone(),
                    );
                    debug!(endpoint = %self.endpoint_url(), node_id = %point.original_id(), "Point monitored");

                    if settings.fetch_display_names && point.settings().display_name.is_none() {
                        match self.call("read display name", link.client.read_display_name(&node_id)).await {
                            Ok(Some(name)) => point.set_server_display_name(name),
                            Ok(None) => {}
                            Err(e) => debug!(node_id = %point.original_id(), error = %e, "Display name read failed"),
                        }
                    }
                }
                Err(e) if e.is_session_invalid() => return Err(()),
                Err(e) if e.is_bad_node_id() => {
                    warn!(endpoint = %self.endpoint_url(), node_id = %point.original_id(), error = %e, "Server rejected point, retrying next pass");
                }
                Err(e) => e.log("create monitored item"),
            }
        }
        Ok(())
    }

    /// Deregisters removal-tagged points and drops empty subscriptions.
    async fn unmonitor_removed(&self, inner: &mut MutexGuard<'_, SessionInner>) -> PassOutcome {
        let link = inner.connection.link().cloned();

        for subscription in inner.subscriptions.iter_mut() {
            let subscription_id = subscription.subscription_id();
            for mut point in subscription.take_removed() {
                if let (Some(link), Some(sid), Some(mid)) = (&link, subscription_id, point.monitored_item_id()) {
                    if let Err(e) = self.call("delete monitored item", link.client.delete_monitored_item(sid, mid)).await {
                        debug!(node_id = %point.original_id(), error = %e, "Deregistration failed, ignoring");
                    }
                }
                point.dispose();
                self.context.version.bump();
                info!(endpoint = %self.endpoint_url(), node_id = %point.original_id(), "Point removed");
            }
        }

        let mut kept = Vec::with_capacity(inner.subscriptions.len());
        for subscription in std::mem::take(&mut inner.subscriptions) {
            if !subscription.is_empty() {
                kept.push(subscription);
                continue;
            }
            if let (Some(link), Some(sid)) = (&link, subscription.subscription_id()) {
                if let Err(e) = self.call("delete subscription", link.client.delete_subscription(sid)).await {
                    debug!(subscription_id = sid, error = %e, "Subscription delete failed, ignoring");
                }
            }
        }
        inner.subscriptions = kept;

        PassOutcome {
            next_wait: self.context.settings.reconcile_interval,
            empty: inner.subscriptions.is_empty(),
        }
    }

    /// Disconnects and re-arms every point for the next connect.
    ///
    /// A graceful disconnect deletes server subscriptions first.
    pub async fn disconnect(&self, graceful: bool) {
        let mut inner = self.inner.lock().await;
        self.release_locked(&mut inner, graceful).await;
    }

    async fn release_locked(&self, inner: &mut MutexGuard<'_, SessionInner>, graceful: bool) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.missed_keep_alives.store(0, Ordering::Release);

        let link = inner.connection.link().cloned();
        for subscription in inner.subscriptions.iter_mut() {
            if let (true, Some(link), Some(sid)) = (graceful, &link, subscription.subscription_id()) {
                if let Err(e) = self.call("delete subscription", link.client.delete_subscription(sid)).await {
                    debug!(subscription_id = sid, error = %e, "Subscription delete failed, ignoring");
                }
            }
            subscription.detach();
        }

        let (before, _) = inner.transition(ConnectionEvent::Lost);
        if let Some(link) = link {
            if let Err(e) = self.call("close", link.client.close()).await {
                debug!(endpoint = %self.endpoint_url(), error = %e, "Close failed, ignoring");
            }
        }
        if before.is_connected() {
            info!(endpoint = %self.endpoint_url(), "Session disconnected");
        }
    }

    /// Marks the session removed if it holds no subscriptions.
    pub(crate) async fn mark_removed_if_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        if !inner.subscriptions.is_empty() {
            return false;
        }
        self.removed.store(true, Ordering::Release);
        true
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> OpcUaResult<T>
    where
        F: Future<Output = OpcUaResult<T>>,
    {
        let deadline = self.context.settings.operation_timeout;
        tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| TimeoutError::new(operation, deadline))?
    }

    fn on_keep_alive(self: &Arc<Self>, generation: u64, status: StatusCode) {
        if generation != self.generation.load(Ordering::Acquire) {
            return;
        }
        if status.is_good() {
            let missed = self.missed_keep_alives.swap(0, Ordering::AcqRel);
            if missed > 0 {
                debug!(endpoint = %self.endpoint_url(), missed, "Keep-alive recovered");
            }
            return;
        }

        let missed = self.missed_keep_alives.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(endpoint = %self.endpoint_url(), missed, status = %status, "Keep-alive failed");
        if missed == self.context.settings.keep_alive_threshold {
            warn!(endpoint = %self.endpoint_url(), "Keep-alive threshold reached, disconnecting");
            let session = Arc::clone(self);
            self.context.runtime.spawn(async move {
                let mut inner = session.inner.lock().await;
                if session.generation.load(Ordering::Acquire) == generation {
                    session.release_locked(&mut inner, true).await;
                }
                drop(inner);
                session.recheck();
            });
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("removed", &self.is_removed())
            .finish_non_exhaustive()
    }
}

/// Keep-alive callback bound to one connect attempt.
struct KeepAliveMonitor {
    session: Weak<Session>,
    generation: u64,
}

impl KeepAliveHandler for KeepAliveMonitor {
    fn on_keep_alive(&self, status: StatusCode) {
        if let Some(session) = self.session.upgrade() {
            session.on_keep_alive(self.generation, status);
        }
    }
}
