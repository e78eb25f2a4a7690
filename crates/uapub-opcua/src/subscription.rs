// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions: groups of points sharing one publishing interval.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::client::{CreatedSubscription, DataChange, DataChangeHandler};
use crate::point::{MonitoredPoint, PointRuntime};
use crate::translate::NotificationTranslator;

// =============================================================================
// SubscriptionLink
// =============================================================================

/// Binding between a subscription and its server-side counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionLink {
    /// No server subscription exists.
    Detached,
    /// Created on the server.
    Attached {
        /// Server subscription id.
        subscription_id: u32,
        /// Publishing interval accepted by the server.
        revised_publishing_interval: Duration,
    },
}

impl SubscriptionLink {
    /// Returns the link after the server created the subscription.
    pub fn on_created(self, created: CreatedSubscription) -> Self {
        match self {
            Self::Detached => Self::Attached {
                subscription_id: created.subscription_id,
                revised_publishing_interval: created.revised_publishing_interval,
            },
            attached @ Self::Attached { .. } => attached,
        }
    }

    /// Returns the link after the server state was lost or released.
    pub fn on_released(self) -> Self {
        Self::Detached
    }
}

// =============================================================================
// PointRouter
// =============================================================================

/// Routes value changes of one subscription to its points.
pub struct PointRouter {
    active: AtomicBool,
    points: RwLock<HashMap<u32, Arc<PointRuntime>>>,
    translator: Arc<NotificationTranslator>,
}

impl PointRouter {
    fn new(translator: Arc<NotificationTranslator>) -> Self {
        Self {
            active: AtomicBool::new(false),
            points: RwLock::new(HashMap::new()),
            translator,
        }
    }
}

impl fmt::Debug for PointRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointRouter")
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("routes", &self.points.read().len())
            .finish_non_exhaustive()
    }
}

impl DataChangeHandler for PointRouter {
    fn on_data_change(&self, change: DataChange) {
        if !self.active.load(Ordering::Acquire) {
            debug!(client_handle = change.client_handle, "Dropping value change for inactive subscription");
            return;
        }
        let point = self.points.read().get(&change.client_handle).cloned();
        match point {
            Some(point) => {
                self.translator.translate(&point, change);
            }
            None => {
                debug!(client_handle = change.client_handle, "Dropping value change for unknown point");
            }
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A group of points sharing one publishing interval on one session.
#[derive(Debug)]
pub struct Subscription {
    requested_publishing_interval: Duration,
    link: SubscriptionLink,
    points: Vec<MonitoredPoint>,
    router: Arc<PointRouter>,
}

impl Subscription {
    /// Creates a detached subscription.
    pub fn new(publishing_interval: Duration, translator: Arc<NotificationTranslator>) -> Self {
        Self {
            requested_publishing_interval: publishing_interval,
            link: SubscriptionLink::Detached,
            points: Vec::new(),
            router: Arc::new(PointRouter::new(translator)),
        }
    }

    /// Requested publishing interval.
    pub fn requested_publishing_interval(&self) -> Duration {
        self.requested_publishing_interval
    }

    /// Publishing interval accepted by the server.
    pub fn revised_publishing_interval(&self) -> Option<Duration> {
        match self.link {
            SubscriptionLink::Attached {
                revised_publishing_interval,
                ..
            } => Some(revised_publishing_interval),
            SubscriptionLink::Detached => None,
        }
    }

    /// Server subscription id.
    pub fn subscription_id(&self) -> Option<u32> {
        match self.link {
            SubscriptionLink::Attached {
                subscription_id, ..
            } => Some(subscription_id),
            SubscriptionLink::Detached => None,
        }
    }

    /// Server binding.
    pub fn link(&self) -> SubscriptionLink {
        self.link
    }

    /// Returns `true` if the subscription exists on the server.
    pub fn is_attached(&self) -> bool {
        matches!(self.link, SubscriptionLink::Attached { .. })
    }

    /// Returns `true` if a point with `interval` belongs here.
    pub fn accepts_interval(&self, interval: Duration) -> bool {
        self.requested_publishing_interval == interval
            || self.revised_publishing_interval() == Some(interval)
    }

    /// Handler to register with the server.
    pub fn handler(&self) -> Arc<dyn DataChangeHandler> {
        self.router.clone()
    }

    /// Points of this subscription.
    pub fn points(&self) -> &[MonitoredPoint] {
        &self.points
    }

    /// Mutable access to the points.
    pub fn points_mut(&mut self) -> &mut [MonitoredPoint] {
        &mut self.points
    }

    /// Returns `true` if no points remain.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns `true` if any point awaits registration.
    pub fn has_pending(&self) -> bool {
        self.points.iter().any(|p| p.state().is_pending())
    }

    /// Adds a point.
    pub fn add(&mut self, point: MonitoredPoint) {
        self.router
            .points
            .write()
            .insert(point.client_handle(), point.runtime().clone());
        self.points.push(point);
    }

    /// Removes and returns the points tagged for removal.
    pub fn take_removed(&mut self) -> Vec<MonitoredPoint> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.points)
            .into_iter()
            .partition(|p| p.state().is_removal_requested());
        self.points = kept;

        if !removed.is_empty() {
            let mut routes = self.router.points.write();
            for point in &removed {
                routes.remove(&point.client_handle());
            }
        }
        removed
    }

    /// Records the server-side subscription.
    pub fn attach(&mut self, created: CreatedSubscription) {
        self.link = self.link.on_created(created);
        self.router.active.store(true, Ordering::Release);
    }

    /// Stops routing and hands over the points for another subscription.
    pub fn into_points(self) -> Vec<MonitoredPoint> {
        self.router.active.store(false, Ordering::Release);
        self.router.points.write().clear();
        self.points
    }

    /// Drops the server binding and re-arms every point for registration.
    pub fn detach(&mut self) {
        self.router.active.store(false, Ordering::Release);
        self.link = self.link.on_released();
        for point in &mut self.points {
            point.mark_session_lost();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use parking_lot::Mutex;
    use tokio::runtime::Handle;
    use tokio_util::sync::CancellationToken;
    use uapub_core::{MessageRecord, RecordSink, TelemetryConfigSet};

    use crate::client::UaValue;
    use crate::heartbeat::Heartbeat;
    use crate::point::PointRequest;

    #[derive(Default)]
    struct Collect(Mutex<Vec<MessageRecord>>);

    impl RecordSink for Collect {
        fn enqueue(&self, record: MessageRecord) -> bool {
            self.0.lock().push(record);
            true
        }
    }

    fn subscription(sink: Arc<Collect>) -> Subscription {
        let translator = NotificationTranslator::new(
            "opc.tcp://h:4840",
            Arc::new(TelemetryConfigSet::default()),
            Arc::new(HashSet::new()),
            sink,
        );
        Subscription::new(Duration::ZERO, Arc::new(translator))
    }

    fn point(text: &str, handle: u32, sink: Arc<Collect>) -> MonitoredPoint {
        let heartbeat = Heartbeat::new(text, Duration::ZERO, sink, Handle::current(), CancellationToken::new());
        let runtime = Arc::new(PointRuntime::new("opc.tcp://h:4840", text, None, false, heartbeat));
        MonitoredPoint::new(PointRequest::parse(text).unwrap(), handle, runtime)
    }

    #[tokio::test]
    async fn test_routes_only_while_attached() {
        let sink = Arc::new(Collect::default());
        let mut sub = subscription(sink.clone());
        sub.add(point("ns=2;s=A", 7, sink.clone()));
        let handler = sub.handler();

        handler.on_data_change(DataChange::new(7, UaValue::Int32(1)));
        assert!(sink.0.lock().is_empty());

        sub.attach(CreatedSubscription {
            subscription_id: 3,
            revised_publishing_interval: Duration::from_millis(500),
        });
        handler.on_data_change(DataChange::new(7, UaValue::Int32(2)));
        handler.on_data_change(DataChange::new(99, UaValue::Int32(3)));
        assert_eq!(sink.0.lock().len(), 1);

        sub.detach();
        handler.on_data_change(DataChange::new(7, UaValue::Int32(4)));
        assert_eq!(sink.0.lock().len(), 1);
        assert_eq!(sub.subscription_id(), None);
    }

    #[tokio::test]
    async fn test_accepts_requested_or_revised_interval() {
        let sink = Arc::new(Collect::default());
        let mut sub = subscription(sink);
        assert!(sub.accepts_interval(Duration::ZERO));
        assert!(!sub.accepts_interval(Duration::from_secs(1)));

        sub.attach(CreatedSubscription {
            subscription_id: 1,
            revised_publishing_interval: Duration::from_secs(1),
        });
        assert!(sub.accepts_interval(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_take_removed() {
        let sink = Arc::new(Collect::default());
        let mut sub = subscription(sink.clone());
        sub.add(point("ns=2;s=A", 1, sink.clone()));
        sub.add(point("ns=2;s=B", 2, sink.clone()));
        sub.points_mut()[0].request_removal();

        let removed = sub.take_removed();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].original_id(), "ns=2;s=A");
        assert_eq!(sub.points().len(), 1);
        assert!(sub.take_removed().is_empty());
    }

    #[tokio::test]
    async fn test_into_points_stops_routing() {
        let sink = Arc::new(Collect::default());
        let mut sub = subscription(sink.clone());
        sub.add(point("ns=2;s=A", 1, sink.clone()));
        sub.attach(CreatedSubscription {
            subscription_id: 4,
            revised_publishing_interval: Duration::from_secs(1),
        });
        let handler = sub.handler();

        let points = sub.into_points();
        assert_eq!(points.len(), 1);
        handler.on_data_change(DataChange::new(1, UaValue::Int32(1)));
        assert!(sink.0.lock().is_empty());

        // The points keep routing once added elsewhere.
        let mut target = subscription(sink.clone());
        target.attach(CreatedSubscription {
            subscription_id: 5,
            revised_publishing_interval: Duration::from_secs(1),
        });
        for point in points {
            target.add(point);
        }
        target.handler().on_data_change(DataChange::new(1, UaValue::Int32(2)));
        assert_eq!(sink.0.lock().len(), 1);
    }
}
