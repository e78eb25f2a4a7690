// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publisher runtime orchestration.
//!
//! Startup order:
//!
//! 1. OPC UA connector and suppressed status codes (fail fast)
//! 2. Delivery queue, transport and batcher
//! 3. Publisher context and session registry
//! 4. Node configuration file, published into the registry
//! 5. Persistence worker, reconciliation loops, diagnostics reporter
//!
//! Shutdown runs the other way round: sessions are disconnected first, then
//! the batcher drains what is left in the queue within the drain timeout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use uapub_buffer::{Batcher, DeliveryQueue, DeliveryStats, MqttTransport, TelemetryTransport};
use uapub_config::{load_config, NodeConfigFile, PublisherConfig};
use uapub_core::TelemetryEncoder;
use uapub_opcua::{PublisherContext, SessionRegistry, UaConnector};

use crate::diagnostics::{spawn_reporter, DiagnosticsSnapshot};
use crate::error::{BinError, BinResult};
use crate::persistence::{PersistenceWorker, WriteBackSignal};
use crate::shutdown::{ShutdownCoordinator, ShutdownGuard};

// =============================================================================
// PublisherRuntime
// =============================================================================

/// The publisher runtime.
pub struct PublisherRuntime {
    config: Arc<PublisherConfig>,
    node_config_path: PathBuf,
    connector: Option<Arc<dyn UaConnector>>,
    transport: Option<Arc<dyn TelemetryTransport>>,
    shutdown: ShutdownCoordinator,
}

impl PublisherRuntime {
    /// Creates a runtime reading nodes from the configured path.
    pub fn new(config: PublisherConfig) -> Self {
        let node_config_path = config.publisher.node_config_path.clone();
        Self {
            config: Arc::new(config),
            node_config_path,
            connector: None,
            transport: None,
            shutdown: ShutdownCoordinator::new(),
        }
    }

    /// Returns the shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Node configuration file in use.
    pub fn node_config_path(&self) -> &Path {
        &self.node_config_path
    }

    /// Runs the publisher until shutdown is signaled.
    pub async fn run(self) -> BinResult<()> {
        let shutdown = self.shutdown.clone();
        let running = self.start().await?;

        shutdown.wait_for_shutdown().await;
        info!("Shutdown initiated, cleaning up...");

        let stats = running.stop().await;
        info!(
            frames_sent = stats.frames_sent,
            records_sent = stats.records_sent,
            overflow_drops = stats.overflow_drops,
            "uapub publisher shutdown complete"
        );
        Ok(())
    }

    /// Starts every component and returns a handle to the running publisher.
    pub async fn start(self) -> BinResult<RunningPublisher> {
        info!(version = crate::VERSION, "Starting uapub publisher");
        let guard = ShutdownGuard::new(self.shutdown.clone());
        let config = Arc::clone(&self.config);
        let token = self.shutdown.token();

        // 1. Fail-fast inputs
        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector(&config)?,
        };
        let suppressed = config.suppressed_status_codes()?;
        let telemetry = Arc::new(config.telemetry_set());

        // 2. Delivery path
        let queue = Arc::new(DeliveryQueue::new(config.delivery.queue_capacity)?);
        let transport_cancel = CancellationToken::new();
        let transport: Arc<dyn TelemetryTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(MqttTransport::connect(
                &config.delivery.mqtt,
                config.delivery.max_frame_size,
                transport_cancel.clone(),
            )?),
        };
        let batcher = match Batcher::new(
            Arc::clone(&queue),
            Arc::clone(&transport),
            TelemetryEncoder::new(Arc::clone(&telemetry)),
            config.batcher_config(),
            token.clone(),
        ) {
            Ok(batcher) => batcher,
            Err(e) => {
                transport.close().await;
                transport_cancel.cancel();
                return Err(e.into());
            }
        };
        let batcher = batcher.start();
        let transport_guard = transport_cancel.clone().drop_guard();

        // 3. OPC UA side
        let write_back = Arc::new(WriteBackSignal::new());
        let context = PublisherContext::builder(connector, queue.clone())
            .settings(config.session_settings())
            .telemetry(telemetry)
            .suppressed_status_codes(suppressed)
            .persistence(write_back.clone())
            .shutdown(token.clone())
            .build()?;
        let registry = SessionRegistry::new(context);

        // 4. Node configuration
        let loaded = load_nodes(&registry, &self.node_config_path).await?;
        registry.context().version.mark_persisted();
        let written = registry.context().version.current();

        // 5. Background work
        let persistence = PersistenceWorker::new(
            Arc::clone(&registry),
            write_back,
            &self.node_config_path,
            written,
        )
        .start(token.clone());
        registry.start().await;
        let diagnostics = config.diagnostics.interval().map(|interval| {
            spawn_reporter(Arc::clone(&registry), Arc::clone(&queue), interval, token.clone())
        });

        guard.disarm();
        let transport_cancel = transport_guard.disarm();
        info!(
            endpoints = registry.session_count().await,
            points = loaded,
            nodes = %self.node_config_path.display(),
            "uapub publisher is ready"
        );

        Ok(RunningPublisher {
            registry,
            queue,
            shutdown: self.shutdown,
            transport_cancel,
            batcher,
            persistence,
            diagnostics,
            drain_timeout: config.delivery.drain_timeout(),
        })
    }
}

/// Publishes every entry of the node configuration file.
///
/// Returns the number of points newly added. Entries the registry rejects
/// are logged and skipped.
async fn load_nodes(registry: &Arc<SessionRegistry>, path: &Path) -> BinResult<usize> {
    let nodes = NodeConfigFile::load(path)?;
    let requests = nodes.to_requests()?;
    info!(
        path = %path.display(),
        endpoints = requests.len(),
        points = nodes.point_count(),
        "Node configuration loaded"
    );

    let mut added = 0;
    for (endpoint, points) in requests {
        let url = endpoint.endpoint_url.clone();
        match registry.publish_nodes(endpoint, points).await {
            Ok(outcome) => added += outcome.added,
            Err(e) => warn!(endpoint = %url, error = %e, "Failed to publish configured nodes"),
        }
    }
    Ok(added)
}

#[cfg(feature = "real-transport")]
fn default_connector(config: &PublisherConfig) -> BinResult<Arc<dyn UaConnector>> {
    use uapub_opcua::client::{OpcUaConnector, OpcUaConnectorConfig};

    let publisher = &config.publisher;
    Ok(Arc::new(OpcUaConnector::new(OpcUaConnectorConfig {
        application_name: publisher.application_name.clone(),
        application_uri: publisher.application_uri.clone(),
        pki_dir: publisher.pki_dir.clone(),
        trust_server_certs: publisher.trust_server_certs,
        create_sample_keypair: publisher.create_sample_keypair,
        ..OpcUaConnectorConfig::default()
    })))
}

#[cfg(not(feature = "real-transport"))]
fn default_connector(_config: &PublisherConfig) -> BinResult<Arc<dyn UaConnector>> {
    Err(BinError::init(
        "built without the `real-transport` feature; no OPC UA connector available",
    ))
}

// =============================================================================
// RunningPublisher
// =============================================================================

/// Handle to a started publisher.
pub struct RunningPublisher {
    registry: Arc<SessionRegistry>,
    queue: Arc<DeliveryQueue>,
    shutdown: ShutdownCoordinator,
    transport_cancel: CancellationToken,
    batcher: JoinHandle<()>,
    persistence: JoinHandle<()>,
    diagnostics: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl RunningPublisher {
    /// Session registry, for administrative operations.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Delivery queue.
    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Current diagnostics.
    pub async fn diagnostics(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot::collect(&self.registry, &self.queue).await
    }

    /// Stops the publisher and returns the final delivery statistics.
    pub async fn stop(self) -> DeliveryStats {
        let Self {
            registry,
            queue,
            shutdown,
            transport_cancel,
            mut batcher,
            persistence,
            diagnostics,
            drain_timeout,
        } = self;

        shutdown.initiate_shutdown();
        registry.shutdown().await;

        if let Err(e) = persistence.await {
            warn!(error = %e, "Persistence worker ended abnormally");
        }

        match tokio::time::timeout(drain_timeout, &mut batcher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Batcher ended abnormally"),
            Err(_) => {
                warn!(
                    timeout_secs = drain_timeout.as_secs(),
                    queued = queue.len(),
                    "Delivery drain timed out, dropping remaining records"
                );
                batcher.abort();
            }
        }
        transport_cancel.cancel();

        if let Some(diagnostics) = diagnostics {
            if let Err(e) = diagnostics.await {
                warn!(error = %e, "Diagnostics reporter ended abnormally");
            }
        }
        queue.stats()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the publisher runtime.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<PublisherConfig>,
    node_config_path: Option<PathBuf>,
    connector: Option<Arc<dyn UaConnector>>,
    transport: Option<Arc<dyn TelemetryTransport>>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: PublisherConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the node configuration file.
    pub fn node_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.node_config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Uses `connector` instead of the built-in OPC UA client.
    pub fn connector(mut self, connector: Arc<dyn UaConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses `transport` instead of MQTT.
    pub fn transport(mut self, transport: Arc<dyn TelemetryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<PublisherRuntime> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::config("No configuration provided"))?;
                load_config(&path).map_err(|e| {
                    BinError::from(e).with_context(format!("Failed to load config from {}", path.display()))
                })?
            }
        };

        let mut runtime = PublisherRuntime::new(config);
        if let Some(path) = self.node_config_path {
            runtime.node_config_path = path;
        }
        runtime.connector = self.connector;
        runtime.transport = self.transport;
        Ok(runtime)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_builder() {
        let runtime = RuntimeBuilder::new()
            .config(PublisherConfig::default())
            .node_config_path("/var/lib/uapub/pn.json")
            .build()
            .unwrap();

        assert_eq!(runtime.node_config_path(), Path::new("/var/lib/uapub/pn.json"));
    }

    #[test]
    fn test_runtime_builder_requires_config() {
        let result = RuntimeBuilder::new().build();
        assert!(matches!(result, Err(BinError::Configuration(_))));
    }

    #[test]
    fn test_runtime_builder_validates_config() {
        let mut config = PublisherConfig::default();
        config.delivery.queue_capacity = 0;
        let result = RuntimeBuilder::new().config(config).build();
        assert!(matches!(result, Err(BinError::Config(_))));
    }

    #[test]
    fn test_runtime_builder_missing_file() {
        let result = RuntimeBuilder::new()
            .config_path("/nonexistent/uapub.yaml")
            .build();
        let error = result.err().unwrap();
        assert_eq!(error.exit_code(), 1);
        assert!(error.to_string().contains("/nonexistent/uapub.yaml"));
    }

    #[test]
    fn test_default_node_config_path() {
        let runtime = PublisherRuntime::new(PublisherConfig::default());
        assert_eq!(runtime.node_config_path(), Path::new("publishednodes.json"));
    }

    #[cfg(not(feature = "real-transport"))]
    #[tokio::test]
    async fn test_start_without_connector_fails() {
        let runtime = PublisherRuntime::new(PublisherConfig::default());
        let coordinator = runtime.shutdown_coordinator();
        let result = runtime.start().await;
        assert!(matches!(result, Err(BinError::Initialization(_))));
        assert!(coordinator.is_shutdown_initiated());
    }
}
