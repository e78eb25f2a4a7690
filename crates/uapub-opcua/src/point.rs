// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored points and their lifecycle.
//!
//! A [`MonitoredPoint`] is owned by a [`Subscription`](crate::subscription::Subscription)
//! and mutated only under its session's lock. The parts that protocol
//! callbacks need (display name, skip flag, heartbeat) live in a shared
//! [`PointRuntime`] so notification delivery never touches the session lock.
//!
//! # Lifecycle
//!
//! ```text
//!  Unmonitored ──────────────┐
//!      │  namespace missing   │ registered
//!      ▼                      ▼
//!  UnmonitoredNamespace ──► Monitored ──session lost──► Unmonitored
//!  UpdateRequested
//!
//!  any state ──unpublish──► RemovalRequested ──next pass──► (removed)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::client::CreatedMonitoredItem;
use crate::heartbeat::Heartbeat;
use crate::types::{NamespaceTable, NodeId, PointId};

// =============================================================================
// PointState
// =============================================================================

/// Lifecycle state of a monitored point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointState {
    /// Not yet registered with the server.
    Unmonitored,
    /// Needs namespace resolution before registration.
    UnmonitoredNamespaceUpdateRequested,
    /// Registered and reporting.
    Monitored,
    /// Tagged for teardown on the next pass.
    RemovalRequested,
}

/// Events driving [`PointState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointEvent {
    /// The server accepted the monitored item.
    Registered,
    /// The namespace URI could not be resolved.
    NamespaceUnresolved,
    /// An administrator unpublished the point.
    RemovalRequested,
    /// The owning session disconnected.
    SessionLost,
}

impl PointState {
    /// Returns the initial state for an identifier.
    pub fn initial(id: &PointId) -> Self {
        if id.needs_namespace() {
            Self::UnmonitoredNamespaceUpdateRequested
        } else {
            Self::Unmonitored
        }
    }

    /// Returns the state after `event`.
    pub fn on(self, event: PointEvent) -> Self {
        use PointEvent as E;
        use PointState as S;

        match (self, event) {
            (S::RemovalRequested, _) => S::RemovalRequested,
            (_, E::RemovalRequested) => S::RemovalRequested,

            (S::Unmonitored | S::UnmonitoredNamespaceUpdateRequested, E::Registered) => S::Monitored,
            (S::Monitored, E::Registered) => S::Monitored,

            (S::Unmonitored | S::UnmonitoredNamespaceUpdateRequested, E::NamespaceUnresolved) => {
                S::UnmonitoredNamespaceUpdateRequested
            }
            (S::Monitored, E::NamespaceUnresolved) => S::Monitored,

            (S::Monitored, E::SessionLost) => S::Unmonitored,
            (s @ (S::Unmonitored | S::UnmonitoredNamespaceUpdateRequested), E::SessionLost) => s,
        }
    }

    /// Returns `true` if the point awaits registration.
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Unmonitored | Self::UnmonitoredNamespaceUpdateRequested
        )
    }

    /// Returns `true` if the point is reporting.
    #[inline]
    pub fn is_monitored(&self) -> bool {
        matches!(self, Self::Monitored)
    }

    /// Returns `true` if the point is tagged for removal.
    #[inline]
    pub fn is_removal_requested(&self) -> bool {
        matches!(self, Self::RemovalRequested)
    }
}

impl fmt::Display for PointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmonitored => write!(f, "Unmonitored"),
            Self::UnmonitoredNamespaceUpdateRequested => {
                write!(f, "UnmonitoredNamespaceUpdateRequested")
            }
            Self::Monitored => write!(f, "Monitored"),
            Self::RemovalRequested => write!(f, "RemovalRequested"),
        }
    }
}

// =============================================================================
// PointSettings
// =============================================================================

/// Per-point settings as configured.
///
/// `None` means "not set by configuration"; the session defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointSettings {
    /// Display name.
    pub display_name: Option<String>,
    /// Sampling interval.
    pub sampling_interval: Option<Duration>,
    /// Publishing interval of the owning subscription.
    pub publishing_interval: Option<Duration>,
    /// Heartbeat interval.
    pub heartbeat_interval: Option<Duration>,
    /// Suppress the first notification after registration.
    pub skip_first: Option<bool>,
}

/// A request to publish one point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRequest {
    /// Parsed identifier.
    pub id: PointId,
    /// Identifier text as configured.
    pub original: String,
    /// Configured settings.
    pub settings: PointSettings,
}

impl PointRequest {
    /// Parses an identifier with default settings.
    pub fn parse(text: &str) -> crate::error::OpcUaResult<Self> {
        Ok(Self {
            id: text.parse()?,
            original: text.trim().to_string(),
            settings: PointSettings::default(),
        })
    }

    /// Sets the configured settings.
    pub fn with_settings(mut self, settings: PointSettings) -> Self {
        self.settings = settings;
        self
    }
}

// =============================================================================
// PointRuntime
// =============================================================================

/// State shared between a point and the callbacks that deliver its values.
pub struct PointRuntime {
    endpoint_url: String,
    original_id: String,
    display_name: RwLock<Option<String>>,
    expanded_id: RwLock<Option<String>>,
    application_uri: RwLock<Option<String>>,
    skip_first: bool,
    skip_next: AtomicBool,
    heartbeat: Arc<Heartbeat>,
}

impl PointRuntime {
    /// Creates the runtime of a point.
    pub fn new(
        endpoint_url: impl Into<String>,
        original_id: impl Into<String>,
        display_name: Option<String>,
        skip_first: bool,
        heartbeat: Arc<Heartbeat>,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            original_id: original_id.into(),
            display_name: RwLock::new(display_name),
            expanded_id: RwLock::new(None),
            application_uri: RwLock::new(None),
            skip_first,
            skip_next: AtomicBool::new(false),
            heartbeat,
        }
    }

    /// Endpoint URL.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Identifier text as configured.
    pub fn original_id(&self) -> &str {
        &self.original_id
    }

    /// Current display name.
    pub fn display_name(&self) -> Option<String> {
        self.display_name.read().clone()
    }

    /// URI-qualified identifier, known once registered.
    pub fn expanded_id(&self) -> Option<String> {
        self.expanded_id.read().clone()
    }

    /// Application URI of the server.
    pub fn application_uri(&self) -> Option<String> {
        self.application_uri.read().clone()
    }

    /// Heartbeat of the point.
    pub fn heartbeat(&self) -> &Arc<Heartbeat> {
        &self.heartbeat
    }

    /// Consumes the skip flag; returns `true` if this notification is dropped.
    pub fn take_skip(&self) -> bool {
        self.skip_next.swap(false, Ordering::AcqRel)
    }

    fn on_registered(&self, expanded_id: Option<String>, application_uri: Option<String>) {
        *self.expanded_id.write() = expanded_id;
        *self.application_uri.write() = application_uri;
        self.skip_next.store(self.skip_first, Ordering::Release);
        self.heartbeat.arm();
    }

    fn set_display_name(&self, name: String) {
        *self.display_name.write() = Some(name);
    }
}

impl fmt::Debug for PointRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointRuntime")
            .field("endpoint_url", &self.endpoint_url)
            .field("original_id", &self.original_id)
            .field("skip_first", &self.skip_first)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// MonitoredPoint
// =============================================================================

/// One data point under observation.
#[derive(Debug)]
pub struct MonitoredPoint {
    id: PointId,
    settings: PointSettings,
    state: PointState,
    client_handle: u32,
    resolved: Option<NodeId>,
    monitored_item_id: Option<u32>,
    revised_sampling_interval: Option<Duration>,
    runtime: Arc<PointRuntime>,
}

impl MonitoredPoint {
    /// Creates an unregistered point.
    pub fn new(request: PointRequest, client_handle: u32, runtime: Arc<PointRuntime>) -> Self {
        Self {
            state: PointState::initial(&request.id),
            id: request.id,
            settings: request.settings,
            client_handle,
            resolved: None,
            monitored_item_id: None,
            revised_sampling_interval: None,
            runtime,
        }
    }

    /// Identifier.
    pub fn id(&self) -> &PointId {
        &self.id
    }

    /// Identifier text as configured.
    pub fn original_id(&self) -> &str {
        self.runtime.original_id()
    }

    /// Configured settings.
    pub fn settings(&self) -> &PointSettings {
        &self.settings
    }

    /// Lifecycle state.
    pub fn state(&self) -> PointState {
        self.state
    }

    /// Client handle used to route notifications.
    pub fn client_handle(&self) -> u32 {
        self.client_handle
    }

    /// Node id the point was last registered under.
    pub fn resolved(&self) -> Option<&NodeId> {
        self.resolved.as_ref()
    }

    /// Server monitored item id while registered.
    pub fn monitored_item_id(&self) -> Option<u32> {
        self.monitored_item_id
    }

    /// Sampling interval accepted by the server.
    pub fn revised_sampling_interval(&self) -> Option<Duration> {
        self.revised_sampling_interval
    }

    /// Shared runtime.
    pub fn runtime(&self) -> &Arc<PointRuntime> {
        &self.runtime
    }

    /// Returns `true` if this point is `id` under namespace-aware equivalence.
    ///
    /// Falls back to the last resolved node id when the forms differ and no
    /// namespace table is available.
    pub fn matches(&self, id: &PointId, table: Option<&NamespaceTable>) -> bool {
        if self.id.equivalent(id, table) {
            return true;
        }
        match (&self.resolved, id) {
            (Some(resolved), PointId::Indexed(node_id)) => resolved == node_id,
            _ => false,
        }
    }

    /// Marks the point registered.
    pub fn mark_registered(
        &mut self,
        node_id: NodeId,
        created: CreatedMonitoredItem,
        table: &NamespaceTable,
        application_uri: Option<String>,
    ) {
        let expanded = self.id.qualify(table).ok().map(|id| id.to_string());
        self.resolved = Some(node_id);
        self.monitored_item_id = Some(created.monitored_item_id);
        self.revised_sampling_interval = Some(created.revised_sampling_interval);
        self.state = self.state.on(PointEvent::Registered);
        self.runtime.on_registered(expanded, application_uri);
    }

    /// Records a failed namespace lookup.
    pub fn mark_namespace_unresolved(&mut self) {
        self.state = self.state.on(PointEvent::NamespaceUnresolved);
    }

    /// Tags the point for removal. Returns `false` if it already was.
    pub fn request_removal(&mut self) -> bool {
        let already = self.state.is_removal_requested();
        self.state = self.state.on(PointEvent::RemovalRequested);
        !already
    }

    /// Re-arms the point after its session disconnected.
    pub fn mark_session_lost(&mut self) {
        self.monitored_item_id = None;
        self.revised_sampling_interval = None;
        self.state = self.state.on(PointEvent::SessionLost);
        self.runtime.heartbeat().disarm();
    }

    /// Releases the point's timers before it is dropped.
    pub fn dispose(&mut self) {
        self.monitored_item_id = None;
        self.runtime.heartbeat().disarm();
    }

    /// Sets a display name read from the server.
    pub fn set_server_display_name(&self, name: String) {
        if self.settings.display_name.is_none() {
            self.runtime.set_display_name(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uapub_core::{MessageRecord, RecordSink};

    struct Discard;

    impl RecordSink for Discard {
        fn enqueue(&self, _record: MessageRecord) -> bool {
            true
        }
    }

    fn point(text: &str, skip_first: bool) -> MonitoredPoint {
        let heartbeat = Heartbeat::new(
            text,
            Duration::ZERO,
            Arc::new(Discard),
            tokio::runtime::Handle::current(),
            tokio_util::sync::CancellationToken::new(),
        );
        let runtime = Arc::new(PointRuntime::new(
            "opc.tcp://h:4840",
            text,
            None,
            skip_first,
            heartbeat,
        ));
        MonitoredPoint::new(PointRequest::parse(text).unwrap(), 1, runtime)
    }

    fn created() -> CreatedMonitoredItem {
        CreatedMonitoredItem {
            monitored_item_id: 77,
            revised_sampling_interval: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_transition_table() {
        use PointEvent as E;
        use PointState as S;

        assert_eq!(S::Unmonitored.on(E::Registered), S::Monitored);
        assert_eq!(S::UnmonitoredNamespaceUpdateRequested.on(E::Registered), S::Monitored);
        assert_eq!(
            S::Unmonitored.on(E::NamespaceUnresolved),
            S::UnmonitoredNamespaceUpdateRequested
        );
        assert_eq!(S::Monitored.on(E::SessionLost), S::Unmonitored);
        assert_eq!(S::Unmonitored.on(E::SessionLost), S::Unmonitored);
        assert_eq!(S::Monitored.on(E::RemovalRequested), S::RemovalRequested);
        assert_eq!(S::RemovalRequested.on(E::Registered), S::RemovalRequested);
        assert_eq!(S::RemovalRequested.on(E::SessionLost), S::RemovalRequested);
    }

    #[tokio::test]
    async fn test_initial_state_by_form() {
        assert_eq!(point("ns=2;s=A", false).state(), PointState::Unmonitored);
        assert_eq!(
            point("nsu=urn:a;s=A", false).state(),
            PointState::UnmonitoredNamespaceUpdateRequested
        );
    }

    #[tokio::test]
    async fn test_register_and_lose_session() {
        let table = NamespaceTable::new(vec!["http://opcfoundation.org/UA/".into(), "urn:a".into()]);
        let mut p = point("nsu=urn:a;s=A", true);
        p.mark_registered(NodeId::string(1, "A"), created(), &table, Some("urn:server".into()));

        assert!(p.state().is_monitored());
        assert_eq!(p.monitored_item_id(), Some(77));
        assert_eq!(p.runtime().expanded_id().as_deref(), Some("nsu=urn:a;s=A"));
        assert_eq!(p.runtime().application_uri().as_deref(), Some("urn:server"));
        assert!(p.runtime().take_skip());
        assert!(!p.runtime().take_skip());

        p.mark_session_lost();
        assert_eq!(p.state(), PointState::Unmonitored);
        assert_eq!(p.monitored_item_id(), None);
    }

    #[tokio::test]
    async fn test_matches_uses_resolved_id() {
        let table = NamespaceTable::new(vec!["http://opcfoundation.org/UA/".into(), "urn:a".into()]);
        let mut p = point("nsu=urn:a;s=A", false);
        let indexed: PointId = "ns=1;s=A".parse().unwrap();

        assert!(!p.matches(&indexed, None));
        assert!(p.matches(&indexed, Some(&table)));

        p.mark_registered(NodeId::string(1, "A"), created(), &table, None);
        assert!(p.matches(&indexed, None));
    }

    #[tokio::test]
    async fn test_request_removal_is_idempotent() {
        let mut p = point("ns=2;i=4", false);
        assert!(p.request_removal());
        assert!(!p.request_removal());
        assert!(p.state().is_removal_requested());
    }
}
