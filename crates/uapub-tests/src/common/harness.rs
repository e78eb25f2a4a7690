// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Wires a [`SessionRegistry`] to a [`FakeConnector`] and a
//! [`CollectingSink`]. Reconciliation is driven explicitly through
//! [`RegistryHarness::reconcile`] unless the loops are started.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use uapub_opcua::{
    OpcUaResult, PersistenceHook, PointInfo, PointRequest, PointState, PublishOutcome,
    PublisherContext, SessionRegistry, SessionSettings, SessionState, StatusCode,
};

use super::fixtures::{endpoint, test_settings, ENDPOINT, NAMESPACES};
use super::mocks::{CollectingSink, FakeConnector};

// =============================================================================
// RegistryHarness
// =============================================================================

/// Builder for [`RegistryHarness`].
pub struct RegistryHarnessBuilder {
    namespaces: Vec<String>,
    settings: SessionSettings,
    suppressed: Option<Vec<StatusCode>>,
    persistence: Option<Arc<dyn PersistenceHook>>,
}

impl Default for RegistryHarnessBuilder {
    fn default() -> Self {
        Self {
            namespaces: NAMESPACES.iter().map(|s| s.to_string()).collect(),
            settings: test_settings(),
            suppressed: None,
            persistence: None,
        }
    }
}

impl RegistryHarnessBuilder {
    /// Overrides the session settings.
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the server's namespace array.
    pub fn namespaces(mut self, namespaces: &[&str]) -> Self {
        self.namespaces = namespaces.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Replaces the suppressed status codes.
    pub fn suppressed(mut self, codes: Vec<StatusCode>) -> Self {
        self.suppressed = Some(codes);
        self
    }

    /// Installs a persistence hook.
    pub fn persistence(mut self, hook: Arc<dyn PersistenceHook>) -> Self {
        self.persistence = Some(hook);
        self
    }

    /// Builds the harness. Must run inside a tokio runtime.
    pub fn build(self) -> RegistryHarness {
        let namespaces: Vec<&str> = self.namespaces.iter().map(String::as_str).collect();
        let connector = FakeConnector::new(&namespaces);
        let sink = CollectingSink::new();
        let shutdown = CancellationToken::new();

        let mut builder = PublisherContext::builder(connector.clone(), sink.clone())
            .settings(self.settings)
            .shutdown(shutdown.clone());
        if let Some(codes) = self.suppressed {
            builder = builder.suppressed_status_codes(codes);
        }
        if let Some(hook) = self.persistence {
            builder = builder.persistence(hook);
        }
        let context = builder.build().expect("valid test context");

        RegistryHarness {
            connector,
            sink,
            registry: SessionRegistry::new(context),
            shutdown,
        }
    }
}

/// A registry wired to in-memory fakes.
pub struct RegistryHarness {
    /// Fake OPC UA server.
    pub connector: Arc<FakeConnector>,
    /// Records produced by the registry.
    pub sink: Arc<CollectingSink>,
    /// Registry under test.
    pub registry: Arc<SessionRegistry>,
    /// Shutdown token of the context.
    pub shutdown: CancellationToken,
}

impl RegistryHarness {
    /// Creates a builder.
    pub fn builder() -> RegistryHarnessBuilder {
        RegistryHarnessBuilder::default()
    }

    /// Creates a harness with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Publishes points on [`ENDPOINT`].
    pub async fn publish(&self, points: Vec<PointRequest>) -> OpcUaResult<PublishOutcome> {
        self.registry.publish_nodes(endpoint(ENDPOINT), points).await
    }

    /// Runs one pass on every session.
    pub async fn reconcile(&self) {
        self.registry.reconcile_all().await;
    }

    /// Points of [`ENDPOINT`], empty if the session is gone.
    pub async fn points(&self) -> Vec<PointInfo> {
        match self.registry.session(ENDPOINT).await {
            Some(session) => session.points().await,
            None => Vec::new(),
        }
    }

    /// State of one point of [`ENDPOINT`].
    pub async fn point_state(&self, id: &str) -> Option<PointState> {
        self.points().await.into_iter().find(|p| p.id == id).map(|p| p.state)
    }

    /// Connection state of [`ENDPOINT`].
    pub async fn session_state(&self) -> Option<SessionState> {
        match self.registry.session(ENDPOINT).await {
            Some(session) => Some(session.state().await),
            None => None,
        }
    }

    /// Cancels the context and shuts the registry down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.shutdown().await;
    }
}

impl Default for RegistryHarness {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let wait = async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(timeout, wait).await.is_ok()
}
