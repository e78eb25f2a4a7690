// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The process-wide set of sessions.
//!
//! [`SessionRegistry`] is the entry point for administrative requests and
//! drives one reconciliation loop per session. Its lock guards only the list
//! of sessions; it is never held across a network call, and it is the outer
//! lock whenever both it and a session lock are taken.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admin::{EndpointInfo, Page, PointInfo, RegistryDiagnostics};
use crate::context::PublisherContext;
use crate::error::{AdminError, OpcUaError, OpcUaResult, SessionError};
use crate::point::PointRequest;
use crate::session::{AddOutcome, EndpointRequest, Session};
use crate::types::PointId;

/// Result of a publish request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Points newly added.
    pub added: usize,
    /// Points that were already published.
    pub already_published: usize,
}

/// An endpoint and its configured points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEndpoint {
    /// Endpoint parameters.
    pub endpoint: EndpointRequest,
    /// Configured points.
    pub points: Vec<PointInfo>,
}

/// Process-wide set of sessions.
pub struct SessionRegistry {
    context: Arc<PublisherContext>,
    sessions: Mutex<Vec<Arc<Session>>>,
    running: AtomicBool,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(context: Arc<PublisherContext>) -> Arc<Self> {
        Arc::new(Self {
            context,
            sessions: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            tasks: SyncMutex::new(Vec::new()),
        })
    }

    /// Publisher context.
    pub fn context(&self) -> &Arc<PublisherContext> {
        &self.context
    }

    /// Starts a reconciliation loop for every session, now and on creation.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions = self.sessions.lock().await.clone();
        info!(sessions = sessions.len(), "Starting session reconciliation");
        for session in sessions {
            self.spawn_loop(session);
        }
    }

    /// Stops every loop and disconnects every session.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let sessions = self.sessions.lock().await.clone();
        for session in &sessions {
            session.cancel_token().cancel();
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Reconciliation task ended abnormally");
            }
        }
        for session in &sessions {
            session.disconnect(true).await;
        }
        info!(sessions = sessions.len(), "Sessions shut down");
    }

    fn spawn_loop(self: &Arc<Self>, session: Arc<Session>) {
        let registry = Arc::clone(self);
        let task = self.context.runtime.spawn(async move {
            registry.run_session(session).await;
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    async fn run_session(self: Arc<Self>, session: Arc<Session>) {
        let cancel = session.cancel_token().clone();
        debug!(endpoint = %session.endpoint_url(), "Reconciliation loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = session.reconcile_once().await;
            self.request_persistence();
            if outcome.empty && self.remove_if_empty(&session).await {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = session.rechecked() => {}
                _ = tokio::time::sleep(outcome.next_wait) => {}
            }
        }
        debug!(endpoint = %session.endpoint_url(), "Reconciliation loop stopped");
    }

    fn request_persistence(&self) {
        if let Some(version) = self.context.version.take_unpersisted() {
            self.context.persistence.request_write_back(version);
        }
    }

    /// Removes `session` if it holds no subscriptions, then disconnects it.
    async fn remove_if_empty(&self, session: &Arc<Session>) -> bool {
        {
            let mut sessions = self.sessions.lock().await;
            if !session.mark_removed_if_empty().await {
                return false;
            }
            sessions.retain(|s| !Arc::ptr_eq(s, session));
        }

        info!(endpoint = %session.endpoint_url(), "Removing empty session");
        session.cancel_token().cancel();
        session.disconnect(true).await;
        true
    }

    /// Runs one pass on every session and collects empty ones.
    ///
    /// Used when no loops run, for example in tests or one-shot tools.
    pub async fn reconcile_all(&self) {
        let sessions = self.sessions.lock().await.clone();
        for session in &sessions {
            let outcome = session.reconcile_once().await;
            if outcome.empty {
                self.remove_if_empty(session).await;
            }
        }
        self.request_persistence();
    }

    async fn find(&self, endpoint_url: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .iter()
            .find(|s| s.endpoint_url() == endpoint_url)
            .cloned()
    }

    fn ensure_running(&self) -> OpcUaResult<()> {
        if self.context.shutdown.is_cancelled() {
            return Err(AdminError::ShuttingDown.into());
        }
        Ok(())
    }

    // =========================================================================
    // Administrative operations
    // =========================================================================

    /// Publishes points on an endpoint, creating its session if needed.
    ///
    /// Points already published are skipped.
    pub async fn publish_nodes(
        self: &Arc<Self>,
        endpoint: EndpointRequest,
        points: Vec<PointRequest>,
    ) -> OpcUaResult<PublishOutcome> {
        self.ensure_running()?;

        loop {
            let (session, created) = {
                let mut sessions = self.sessions.lock().await;
                match sessions.iter().find(|s| s.endpoint_url() == endpoint.endpoint_url) {
                    Some(session) => {
                        if session.endpoint() != &endpoint {
                            debug!(
                                endpoint = %endpoint.endpoint_url,
                                "Endpoint already configured with different parameters, keeping existing"
                            );
                        }
                        (Arc::clone(session), false)
                    }
                    None => {
                        let session = Session::new(endpoint.clone(), Arc::clone(&self.context));
                        sessions.push(Arc::clone(&session));
                        info!(endpoint = %endpoint.endpoint_url, "Session created");
                        (session, true)
                    }
                }
            };

            match session.add_points(points.clone()).await {
                Ok(outcomes) => {
                    if created && self.running.load(Ordering::Acquire) {
                        self.spawn_loop(Arc::clone(&session));
                    }
                    session.recheck();

                    let mut outcome = PublishOutcome::default();
                    for result in outcomes {
                        match result {
                            AddOutcome::Added => outcome.added += 1,
                            AddOutcome::AlreadyPublished => outcome.already_published += 1,
                        }
                    }
                    return Ok(outcome);
                }
                Err(OpcUaError::Session(SessionError::Removed { .. })) => {
                    debug!(endpoint = %endpoint.endpoint_url, "Session removed concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Tags points on an endpoint for removal. Returns the number tagged.
    pub async fn unpublish_nodes(&self, endpoint_url: &str, ids: &[PointId]) -> OpcUaResult<usize> {
        self.ensure_running()?;
        let session = self
            .find(endpoint_url)
            .await
            .ok_or_else(|| AdminError::EndpointNotFound {
                endpoint: endpoint_url.to_string(),
            })?;
        let tagged = session.request_removal(ids).await;
        session.recheck();
        Ok(tagged)
    }

    /// Tags every point of one endpoint, or of all endpoints, for removal.
    pub async fn unpublish_all(&self, endpoint_url: Option<&str>) -> OpcUaResult<usize> {
        self.ensure_running()?;
        let sessions = match endpoint_url {
            Some(url) => vec![self.find(url).await.ok_or_else(|| AdminError::EndpointNotFound {
                endpoint: url.to_string(),
            })?],
            None => self.sessions.lock().await.clone(),
        };

        let mut tagged = 0;
        for session in sessions {
            tagged += session.request_removal_all().await;
            session.recheck();
        }
        Ok(tagged)
    }

    /// Lists configured endpoints.
    pub async fn list_endpoints(&self, continuation: Option<&str>) -> OpcUaResult<Page<EndpointInfo>> {
        let version = self.context.version.current();
        let sessions = self.sessions.lock().await.clone();
        let mut endpoints = Vec::with_capacity(sessions.len());
        for session in sessions {
            endpoints.push(session.info().await);
        }
        Page::slice(endpoints, version, continuation, self.context.settings.page_size)
    }

    /// Lists the points configured on an endpoint.
    pub async fn list_points(
        &self,
        endpoint_url: &str,
        continuation: Option<&str>,
    ) -> OpcUaResult<Page<PointInfo>> {
        let version = self.context.version.current();
        let session = self
            .find(endpoint_url)
            .await
            .ok_or_else(|| AdminError::EndpointNotFound {
                endpoint: endpoint_url.to_string(),
            })?;
        let points = session.points().await;
        Page::slice(points, version, continuation, self.context.settings.page_size)
    }

    /// Renders the desired state of every endpoint.
    pub async fn published_configuration(&self) -> Vec<PublishedEndpoint> {
        let sessions = self.sessions.lock().await.clone();
        let mut endpoints = Vec::with_capacity(sessions.len());
        for session in sessions {
            let points = session.points().await;
            if points.is_empty() {
                continue;
            }
            endpoints.push(PublishedEndpoint {
                endpoint: session.endpoint().clone(),
                points,
            });
        }
        endpoints
    }

    /// Collects diagnostics of every session.
    pub async fn diagnostics(&self) -> RegistryDiagnostics {
        let sessions = self.sessions.lock().await.clone();
        let mut diagnostics = RegistryDiagnostics {
            sessions: sessions.len(),
            config_version: self.context.version.current(),
            ..RegistryDiagnostics::default()
        };
        for session in sessions {
            let detail = session.diagnostics().await;
            if detail.state.is_connected() {
                diagnostics.connected_sessions += 1;
            }
            diagnostics.subscriptions += detail.subscriptions;
            diagnostics.points.merge(detail.points);
            diagnostics.per_session.push(detail);
        }
        diagnostics
    }

    /// Number of sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Returns the session of an endpoint.
    pub async fn session(&self, endpoint_url: &str) -> Option<Arc<Session>> {
        self.find(endpoint_url).await
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
