// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol boundary between the reconciliation engine and an OPC UA client.
//!
//! The engine never talks to a client library directly. It drives a
//! [`UaConnector`] to open sessions and a [`UaSession`] to manage
//! subscriptions and monitored items, which lets it run against a fake
//! implementation in tests.
//!
//! Callbacks from the protocol layer ([`DataChangeHandler`],
//! [`KeepAliveHandler`]) are synchronous and may be invoked from threads owned
//! by the client library. Implementations must not block.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use uapub_core::format_timestamp;

use crate::error::OpcUaResult;
use crate::types::{NodeId, StatusCode};

// =============================================================================
// UaValue
// =============================================================================

/// A value reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum UaValue {
    /// Boolean.
    Boolean(bool),
    /// Signed byte.
    SByte(i8),
    /// Unsigned byte.
    Byte(u8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String.
    String(String),
    /// Date and time.
    DateTime(DateTime<Utc>),
    /// GUID.
    Guid(Uuid),
    /// Byte string.
    ByteString(Vec<u8>),
    /// Array of values.
    Array(Vec<UaValue>),
}

/// Canonical text encoding of a [`UaValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    /// Encoded text.
    pub text: String,
    /// `true` if the text must be emitted as a JSON string.
    pub preserve_quotes: bool,
}

impl UaValue {
    /// Returns the JSON representation of the value.
    ///
    /// Non-finite floats have no JSON number form and are emitted as strings.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Boolean(v) => Value::Bool(*v),
            Self::SByte(v) => Value::from(*v),
            Self::Byte(v) => Value::from(*v),
            Self::Int16(v) => Value::from(*v),
            Self::UInt16(v) => Value::from(*v),
            Self::Int32(v) => Value::from(*v),
            Self::UInt32(v) => Value::from(*v),
            Self::Int64(v) => Value::from(*v),
            Self::UInt64(v) => Value::from(*v),
            Self::Float(v) => float_json(f64::from(*v), &v.to_string()),
            Self::Double(v) => float_json(*v, &v.to_string()),
            Self::String(v) => Value::String(v.clone()),
            Self::DateTime(v) => Value::String(format_timestamp(*v)),
            Self::Guid(v) => Value::String(v.to_string()),
            Self::ByteString(v) => Value::String(BASE64.encode(v)),
            Self::Array(values) => Value::Array(values.iter().map(Self::to_json).collect()),
        }
    }

    /// Encodes the value to the text carried in a message record.
    pub fn encode(&self) -> EncodedValue {
        match self.to_json() {
            Value::String(text) => EncodedValue {
                text,
                preserve_quotes: true,
            },
            other => EncodedValue {
                text: other.to_string(),
                preserve_quotes: false,
            },
        }
    }

    /// Returns the type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "Boolean",
            Self::SByte(_) => "SByte",
            Self::Byte(_) => "Byte",
            Self::Int16(_) => "Int16",
            Self::UInt16(_) => "UInt16",
            Self::Int32(_) => "Int32",
            Self::UInt32(_) => "UInt32",
            Self::Int64(_) => "Int64",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Guid(_) => "Guid",
            Self::ByteString(_) => "ByteString",
            Self::Array(_) => "Array",
        }
    }
}

fn float_json(value: f64, text: &str) -> Value {
    if value.is_finite() {
        // Parse the type's own text form so f32 values keep their short form.
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string()))
    } else {
        Value::String(text.to_string())
    }
}

impl fmt::Display for UaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode().text)
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// One value change delivered by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    /// Client handle assigned when the monitored item was created.
    pub client_handle: u32,
    /// Reported value, `None` for a null variant.
    pub value: Option<UaValue>,
    /// Status of the value.
    pub status: StatusCode,
    /// Source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Server timestamp.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataChange {
    /// Creates a good value change stamped now.
    pub fn new(client_handle: u32, value: UaValue) -> Self {
        let now = Utc::now();
        Self {
            client_handle,
            value: Some(value),
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }
}

/// Receives value changes for one subscription.
pub trait DataChangeHandler: Send + Sync {
    /// Handles one value change. Must not block.
    fn on_data_change(&self, change: DataChange);
}

/// Receives keep-alive results for one session.
pub trait KeepAliveHandler: Send + Sync {
    /// Handles one keep-alive result. Must not block.
    fn on_keep_alive(&self, status: StatusCode);
}

// =============================================================================
// Requests and Results
// =============================================================================

/// Authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthMode {
    /// Anonymous access.
    #[default]
    Anonymous,
    /// User name and password.
    UsernamePassword,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UsernamePassword => f.write_str("UsernamePassword"),
        }
    }
}

/// User identity presented to the server.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum UserIdentity {
    /// Anonymous access.
    #[default]
    Anonymous,
    /// User name and password.
    UserName {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl UserIdentity {
    /// Returns the authentication mode.
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::Anonymous => AuthMode::Anonymous,
            Self::UserName { .. } => AuthMode::UsernamePassword,
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Parameters of one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Endpoint URL.
    pub endpoint_url: String,
    /// Prefer a secured endpoint.
    pub use_security: bool,
    /// User identity.
    pub identity: UserIdentity,
    /// Requested session timeout.
    pub session_timeout: Duration,
    /// Keep-alive interval.
    pub keep_alive_interval: Duration,
}

/// Request to monitor one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItemRequest {
    /// Resolved node id.
    pub node_id: NodeId,
    /// Handle echoed back in [`DataChange::client_handle`].
    pub client_handle: u32,
    /// Requested sampling interval.
    pub sampling_interval: Duration,
    /// Server-side queue size.
    pub queue_size: u32,
}

/// Result of creating a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedSubscription {
    /// Server subscription id.
    pub subscription_id: u32,
    /// Publishing interval accepted by the server.
    pub revised_publishing_interval: Duration,
}

/// Result of creating a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedMonitoredItem {
    /// Server monitored item id.
    pub monitored_item_id: u32,
    /// Sampling interval accepted by the server.
    pub revised_sampling_interval: Duration,
}

// =============================================================================
// Traits
// =============================================================================

/// Opens sessions to OPC UA servers.
#[async_trait]
pub trait UaConnector: Send + Sync {
    /// Connects and activates a session.
    ///
    /// `keep_alive` must be invoked with the result of every keep-alive
    /// exchange for the lifetime of the returned session.
    async fn connect(
        &self,
        request: &ConnectRequest,
        keep_alive: Arc<dyn KeepAliveHandler>,
    ) -> OpcUaResult<Arc<dyn UaSession>>;
}

/// An established OPC UA session.
#[async_trait]
pub trait UaSession: Send + Sync {
    /// Reads the server's namespace array.
    async fn read_namespace_array(&self) -> OpcUaResult<Vec<String>>;

    /// Returns the server's application URI.
    fn server_application_uri(&self) -> Option<String>;

    /// Creates a subscription delivering value changes to `handler`.
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> OpcUaResult<CreatedSubscription>;

    /// Deletes a subscription.
    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()>;

    /// Creates one monitored item.
    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: MonitoredItemRequest,
    ) -> OpcUaResult<CreatedMonitoredItem>;

    /// Deletes one monitored item.
    async fn delete_monitored_item(
        &self,
        subscription_id: u32,
        monitored_item_id: u32,
    ) -> OpcUaResult<()>;

    /// Reads the display name attribute of a node.
    ///
    /// Sessions that cannot browse return `Ok(None)`.
    async fn read_display_name(&self, _node_id: &NodeId) -> OpcUaResult<Option<String>> {
        Ok(None)
    }

    /// Closes the session.
    async fn close(&self) -> OpcUaResult<()>;
}
