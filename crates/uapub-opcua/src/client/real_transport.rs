// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA connector backed by the `opcua` crate.
//!
//! The `opcua` client API is blocking, so every service call runs on the
//! blocking thread pool. Keep-alive results come from a poller that reads the
//! server state variable at the keep-alive interval.
//!
//! # Examples
//!
//! ```rust,ignore
//! use uapub_opcua::client::{OpcUaConnector, OpcUaConnectorConfig};
//!
//! let connector = OpcUaConnector::new(OpcUaConnectorConfig::default());
//! let context = PublisherContext::builder(Arc::new(connector), sink).build()?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::client::prelude::*;
use opcua::sync::RwLock as OpcUaRwLock;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::client::transport::{
    ConnectRequest, CreatedMonitoredItem, CreatedSubscription, DataChange, DataChangeHandler,
    KeepAliveHandler, MonitoredItemRequest, UaConnector, UaSession, UaValue, UserIdentity,
};
use crate::error::{ConnectionError, OpcUaError, OpcUaResult, SessionError, SubscriptionError};
use crate::types::{NodeId, NodeIdentifier, StatusCode};

type SharedSession = Arc<OpcUaRwLock<opcua::client::prelude::Session>>;

// =============================================================================
// Configuration
// =============================================================================

/// Client-side settings of the connector.
#[derive(Debug, Clone)]
pub struct OpcUaConnectorConfig {
    /// Application name presented to servers.
    pub application_name: String,
    /// Application URI presented to servers.
    pub application_uri: String,
    /// PKI directory holding the application certificate and trust lists.
    pub pki_dir: Option<PathBuf>,
    /// Accept untrusted server certificates.
    pub trust_server_certs: bool,
    /// Create a self-signed application certificate if none exists.
    pub create_sample_keypair: bool,
    /// Lifetime count of created subscriptions.
    pub lifetime_count: u32,
    /// Keep-alive count of created subscriptions.
    pub max_keep_alive_count: u32,
}

impl Default for OpcUaConnectorConfig {
    fn default() -> Self {
        Self {
            application_name: "uapub".to_string(),
            application_uri: "urn:uapub".to_string(),
            pki_dir: None,
            trust_server_certs: false,
            create_sample_keypair: true,
            lifetime_count: 60,
            max_keep_alive_count: 10,
        }
    }
}

// =============================================================================
// OpcUaConnector
// =============================================================================

/// Opens sessions with the `opcua` client.
#[derive(Debug, Clone, Default)]
pub struct OpcUaConnector {
    config: OpcUaConnectorConfig,
}

impl OpcUaConnector {
    /// Creates a connector.
    pub fn new(config: OpcUaConnectorConfig) -> Self {
        Self { config }
    }

    fn build_client(config: &OpcUaConnectorConfig, request: &ConnectRequest) -> OpcUaResult<Client> {
        let mut builder = ClientBuilder::new()
            .application_name(config.application_name.as_str())
            .application_uri(config.application_uri.as_str())
            .create_sample_keypair(config.create_sample_keypair)
            .trust_server_certs(config.trust_server_certs)
            .session_retry_limit(0)
            .session_timeout(u32::try_from(request.session_timeout.as_millis()).unwrap_or(u32::MAX));
        if let Some(pki_dir) = &config.pki_dir {
            builder = builder.pki_dir(pki_dir.clone());
        }
        builder.client().ok_or_else(|| {
            OpcUaError::connection_refused(&request.endpoint_url, "invalid client configuration")
        })
    }

    fn select_endpoint(
        endpoints: &[EndpointDescription],
        use_security: bool,
    ) -> Option<EndpointDescription> {
        if use_security {
            endpoints
                .iter()
                .filter(|e| e.security_mode != MessageSecurityMode::None)
                .max_by_key(|e| e.security_level)
                .cloned()
        } else {
            endpoints
                .iter()
                .find(|e| e.security_mode == MessageSecurityMode::None)
                .cloned()
        }
    }

    fn connect_blocking(
        config: &OpcUaConnectorConfig,
        request: &ConnectRequest,
    ) -> OpcUaResult<(SharedSession, Option<String>)> {
        let url = request.endpoint_url.as_str();
        let mut client = Self::build_client(config, request)?;

        let endpoints = client
            .get_server_endpoints_from_url(url)
            .map_err(|status| OpcUaError::connection_refused(url, format!("endpoint discovery failed: {status}")))?;
        let endpoint = Self::select_endpoint(&endpoints, request.use_security).ok_or_else(|| {
            ConnectionError::NoSuitableEndpoint {
                endpoint: url.to_string(),
                security: if request.use_security { "secured" } else { "none" }.to_string(),
            }
        })?;
        debug!(
            endpoint = %url,
            security_policy = %endpoint.security_policy_uri,
            security_mode = ?endpoint.security_mode,
            "Selected endpoint"
        );

        let identity = match &request.identity {
            UserIdentity::Anonymous => IdentityToken::Anonymous,
            UserIdentity::UserName { username, password } => {
                IdentityToken::UserName(username.clone(), password.clone())
            }
        };
        let session = client
            .connect_to_endpoint(endpoint, identity)
            .map_err(|status| SessionError::creation_failed(url, status.to_string()))?;

        let application_uri = read_values(&session, &[VariableId::Server_ServerArray])
            .ok()
            .and_then(|values| values.into_iter().next())
            .and_then(|value| match value.value {
                Some(Variant::Array(array)) => array.values.into_iter().find_map(|v| match v {
                    Variant::String(s) => s.value().clone(),
                    _ => None,
                }),
                _ => None,
            });

        Ok((session, application_uri))
    }
}

#[async_trait]
impl UaConnector for OpcUaConnector {
    async fn connect(
        &self,
        request: &ConnectRequest,
        keep_alive: Arc<dyn KeepAliveHandler>,
    ) -> OpcUaResult<Arc<dyn UaSession>> {
        let config = self.config.clone();
        let owned = request.clone();
        let (session, application_uri) =
            blocking(&request.endpoint_url, move || Self::connect_blocking(&config, &owned)).await?;

        let runner = opcua::client::prelude::Session::run_async(session.clone());
        let closed = CancellationToken::new();
        spawn_keep_alive(session.clone(), keep_alive, request.keep_alive_interval, closed.clone());
        info!(endpoint = %request.endpoint_url, "OPC UA session activated");

        Ok(Arc::new(OpcUaSession {
            endpoint_url: request.endpoint_url.clone(),
            session,
            application_uri,
            runner: Mutex::new(Some(runner)),
            closed,
            lifetime_count: self.config.lifetime_count,
            max_keep_alive_count: self.config.max_keep_alive_count,
        }))
    }
}

// =============================================================================
// OpcUaSession
// =============================================================================

struct OpcUaSession {
    endpoint_url: String,
    session: SharedSession,
    application_uri: Option<String>,
    runner: Mutex<Option<tokio::sync::oneshot::Sender<SessionCommand>>>,
    closed: CancellationToken,
    lifetime_count: u32,
    max_keep_alive_count: u32,
}

#[async_trait]
impl UaSession for OpcUaSession {
    async fn read_namespace_array(&self) -> OpcUaResult<Vec<String>> {
        let session = self.session.clone();
        let values = blocking(&self.endpoint_url, move || {
            read_values(&session, &[VariableId::Server_NamespaceArray])
                .map_err(|status| OpcUaError::fault("read namespace array", status))
        })
        .await?;

        let uris = match values.into_iter().next().and_then(|v| v.value) {
            Some(Variant::Array(array)) => array
                .values
                .into_iter()
                .map(|v| match v {
                    Variant::String(s) => s.value().clone().unwrap_or_default(),
                    _ => String::new(),
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(uris)
    }

    fn server_application_uri(&self) -> Option<String> {
        self.application_uri.clone()
    }

    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> OpcUaResult<CreatedSubscription> {
        let session = self.session.clone();
        let lifetime_count = self.lifetime_count;
        let max_keep_alive_count = self.max_keep_alive_count;
        let interval_ms = publishing_interval.as_secs_f64() * 1000.0;

        let subscription_id = blocking(&self.endpoint_url, move || {
            let callback = DataChangeCallback::new(move |items| {
                for item in items {
                    handler.on_data_change(to_data_change(item.client_handle(), item.last_value()));
                }
            });
            session
                .read()
                .create_subscription(interval_ms, lifetime_count, max_keep_alive_count, 0, 0, true, callback)
                .map_err(|status| SubscriptionError::creation_failed(publishing_interval, to_status(status)).into())
        })
        .await?;

        // The client does not surface the revised interval.
        Ok(CreatedSubscription {
            subscription_id,
            revised_publishing_interval: publishing_interval,
        })
    }

    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()> {
        let session = self.session.clone();
        blocking(&self.endpoint_url, move || {
            session
                .read()
                .delete_subscription(subscription_id)
                .map(|_| ())
                .map_err(|status| OpcUaError::fault("delete subscription", to_status(status)))
        })
        .await
    }

    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: MonitoredItemRequest,
    ) -> OpcUaResult<CreatedMonitoredItem> {
        let session = self.session.clone();
        let node_text = request.node_id.to_string();
        let item = MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId {
                node_id: to_opcua_node_id(&request.node_id),
                attribute_id: AttributeId::Value as u32,
                index_range: UAString::null(),
                data_encoding: QualifiedName::null(),
            },
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle: request.client_handle,
                sampling_interval: request.sampling_interval.as_secs_f64() * 1000.0,
                filter: ExtensionObject::null(),
                queue_size: request.queue_size,
                discard_oldest: true,
            },
        };

        trace!(node_id = %node_text, subscription_id, "Creating monitored item");
        let result = blocking(&self.endpoint_url, move || {
            session
                .read()
                .create_monitored_items(subscription_id, TimestampsToReturn::Both, &[item])
                .map_err(|status| OpcUaError::fault("create monitored items", to_status(status)))
        })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| OpcUaError::monitored_item_failed(&node_text, StatusCode::BAD_UNEXPECTED_ERROR))?;

        let status = to_status(result.status_code);
        if !status.is_good() {
            return Err(OpcUaError::monitored_item_failed(&node_text, status));
        }
        Ok(CreatedMonitoredItem {
            monitored_item_id: result.monitored_item_id,
            revised_sampling_interval: Duration::from_secs_f64(result.revised_sampling_interval.max(0.0) / 1000.0),
        })
    }

    async fn delete_monitored_item(&self, subscription_id: u32, monitored_item_id: u32) -> OpcUaResult<()> {
        let session = self.session.clone();
        blocking(&self.endpoint_url, move || {
            session
                .read()
                .delete_monitored_items(subscription_id, &[monitored_item_id])
                .map(|_| ())
                .map_err(|status| OpcUaError::fault("delete monitored items", to_status(status)))
        })
        .await
    }

    async fn read_display_name(&self, node_id: &NodeId) -> OpcUaResult<Option<String>> {
        let session = self.session.clone();
        let read = ReadValueId {
            node_id: to_opcua_node_id(node_id),
            attribute_id: AttributeId::DisplayName as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        };
        let values = blocking(&self.endpoint_url, move || {
            session
                .read()
                .read(&[read], TimestampsToReturn::Neither, 0.0)
                .map_err(|status| OpcUaError::fault("read display name", to_status(status)))
        })
        .await?;

        Ok(values.into_iter().next().and_then(|v| match v.value {
            Some(Variant::LocalizedText(text)) => text.text.value().clone(),
            _ => None,
        }))
    }

    async fn close(&self) -> OpcUaResult<()> {
        self.closed.cancel();
        if let Some(runner) = self.runner.lock().take() {
            let _ = runner.send(SessionCommand::Stop);
        }
        let session = self.session.clone();
        blocking(&self.endpoint_url, move || {
            session.read().disconnect();
            Ok(())
        })
        .await
    }
}

impl Drop for OpcUaSession {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn blocking<T, F>(endpoint_url: &str, f: F) -> OpcUaResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> OpcUaResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OpcUaError::connection_refused(endpoint_url, format!("client task failed: {e}")))?
}

fn read_values(
    session: &SharedSession,
    variables: &[VariableId],
) -> Result<Vec<DataValue>, opcua::types::StatusCode> {
    let reads: Vec<ReadValueId> = variables
        .iter()
        .map(|v| ReadValueId {
            node_id: (*v).into(),
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        })
        .collect();
    session.read().read(&reads, TimestampsToReturn::Neither, 0.0)
}

fn spawn_keep_alive(
    session: SharedSession,
    handler: Arc<dyn KeepAliveHandler>,
    interval: Duration,
    closed: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let status_session = session.clone();
            let status = tokio::task::spawn_blocking(move || {
                read_values(&status_session, &[VariableId::Server_ServerStatus_State])
            })
            .await;
            let status = match status {
                Ok(Ok(values)) => values
                    .into_iter()
                    .next()
                    .and_then(|v| v.status)
                    .map(to_status)
                    .unwrap_or(StatusCode::GOOD),
                Ok(Err(status)) => to_status(status),
                Err(_) => StatusCode::BAD_INTERNAL_ERROR,
            };
            if closed.is_cancelled() {
                break;
            }
            handler.on_keep_alive(status);
        }
    });
}

fn to_status(status: opcua::types::StatusCode) -> StatusCode {
    StatusCode(status.bits())
}

fn to_opcua_node_id(node_id: &NodeId) -> opcua::types::NodeId {
    let ns = node_id.namespace_index;
    match &node_id.identifier {
        NodeIdentifier::Numeric(v) => opcua::types::NodeId::new(ns, *v),
        NodeIdentifier::String(v) => opcua::types::NodeId::new(ns, UAString::from(v.as_str())),
        NodeIdentifier::Guid(v) => opcua::types::NodeId::new(ns, opcua::types::Guid::from(*v)),
        NodeIdentifier::Opaque(v) => opcua::types::NodeId::new(ns, ByteString::from(v.as_slice())),
    }
}

fn to_data_change(client_handle: u32, value: &DataValue) -> DataChange {
    DataChange {
        client_handle,
        value: value.value.as_ref().and_then(to_ua_value),
        status: value.status.map(to_status).unwrap_or(StatusCode::GOOD),
        source_timestamp: value.source_timestamp.map(|ts| ts.as_chrono()),
        server_timestamp: value.server_timestamp.map(|ts| ts.as_chrono()),
    }
}

fn to_ua_value(variant: &Variant) -> Option<UaValue> {
    Some(match variant {
        Variant::Empty => return None,
        Variant::Boolean(v) => UaValue::Boolean(*v),
        Variant::SByte(v) => UaValue::SByte(*v),
        Variant::Byte(v) => UaValue::Byte(*v),
        Variant::Int16(v) => UaValue::Int16(*v),
        Variant::UInt16(v) => UaValue::UInt16(*v),
        Variant::Int32(v) => UaValue::Int32(*v),
        Variant::UInt32(v) => UaValue::UInt32(*v),
        Variant::Int64(v) => UaValue::Int64(*v),
        Variant::UInt64(v) => UaValue::UInt64(*v),
        Variant::Float(v) => UaValue::Float(*v),
        Variant::Double(v) => UaValue::Double(*v),
        Variant::String(v) => UaValue::String(v.as_ref().to_string()),
        Variant::DateTime(v) => UaValue::DateTime(v.as_chrono()),
        Variant::Guid(v) => UaValue::Guid(uuid::Uuid::from_bytes(*v.as_bytes())),
        Variant::ByteString(v) => UaValue::ByteString(v.value.clone().unwrap_or_default()),
        Variant::Array(array) => UaValue::Array(array.values.iter().filter_map(to_ua_value).collect()),
        other => UaValue::String(format!("{other:?}")),
    })
}
