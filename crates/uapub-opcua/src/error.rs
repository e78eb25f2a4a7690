// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA publisher error types.
//!
//! The hierarchy mirrors the failure domains of the reconciliation engine:
//!
//! ```text
//! OpcUaError
//! ├── Connection    - endpoint unreachable, handshake failures
//! ├── Session       - protocol faults on an established session
//! ├── Subscription  - subscription and monitored item faults
//! ├── Namespace     - identifier resolution against the namespace table
//! ├── Configuration - malformed identifiers and settings
//! ├── Admin         - administrative request failures
//! └── Timeout       - operations exceeding their deadline
//! ```
//!
//! Protocol faults carry the server's [`StatusCode`] so the reconciliation
//! loop can decide between tearing the session down
//! ([`OpcUaError::is_session_invalid`]) and retrying the point on the next
//! pass ([`OpcUaError::is_bad_node_id`]).

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::types::StatusCode;

/// Result alias for OPC UA operations.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// OpcUaError - Main Error Type
// =============================================================================

/// The main error type for OPC UA operations.
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Subscription and monitoring errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Namespace resolution errors.
    #[error("{0}")]
    Namespace(#[from] NamespaceError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Administrative request errors.
    #[error("{0}")]
    Admin(#[from] AdminError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl OpcUaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a connection refused error.
    pub fn connection_refused(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection(ConnectionError::refused(endpoint, reason))
    }

    /// Creates a not connected error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Creates a service fault error.
    pub fn fault(operation: impl Into<String>, status: StatusCode) -> Self {
        Self::Session(SessionError::fault(operation, status))
    }

    /// Creates a monitored item failure.
    pub fn monitored_item_failed(node_id: impl Into<String>, status: StatusCode) -> Self {
        Self::Subscription(SubscriptionError::monitored_item_failed(node_id, status))
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::invalid_node_id(node_id, reason))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns the protocol status code carried by this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Session(SessionError::Fault { status, .. }) => Some(*status),
            Self::Subscription(e) => e.status_code(),
            _ => None,
        }
    }

    /// Returns `true` if the session this error occurred on can no longer be
    /// used and must be torn down and recreated.
    pub fn is_session_invalid(&self) -> bool {
        match self {
            Self::Connection(ConnectionError::NotConnected | ConnectionError::Closed { .. }) => {
                true
            }
            _ => self
                .status_code()
                .is_some_and(|status| status.is_session_invalid()),
        }
    }

    /// Returns `true` if the server rejected the point identifier.
    pub fn is_bad_node_id(&self) -> bool {
        self.status_code()
            .is_some_and(|status| status.is_bad_node_id())
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Session(e) => e.is_retryable(),
            Self::Subscription(_) => true,
            Self::Namespace(_) => true,
            Self::Configuration(_) | Self::Admin(_) => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::Namespace(_) => ErrorSeverity::Warning,
            Self::Session(_) | Self::Subscription(_) => ErrorSeverity::Error,
            Self::Admin(_) => ErrorSeverity::Info,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Session(_) => "session",
            Self::Subscription(_) => "subscription",
            Self::Namespace(_) => "namespace",
            Self::Configuration(_) => "configuration",
            Self::Admin(_) => "admin",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Namespace(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
            Self::Admin(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection refused or handshake failed.
    #[error("Connection to '{endpoint}' failed: {reason}")]
    Refused {
        /// Target endpoint.
        endpoint: String,
        /// Failure description.
        reason: String,
    },

    /// Connection timed out.
    #[error("Connection to '{endpoint}' timed out after {duration:?}")]
    TimedOut {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// No endpoint matching the requested security settings.
    #[error("No suitable endpoint at '{endpoint}' for security '{security}'")]
    NoSuitableEndpoint {
        /// Target endpoint.
        endpoint: String,
        /// Requested security description.
        security: String,
    },

    /// Not connected.
    #[error("Not connected to OPC UA server")]
    NotConnected,

    /// Connection closed unexpectedly.
    #[error("Connection closed{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },
}

impl ConnectionError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a connection timeout error.
    pub fn timed_out(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::TimedOut {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Refused { .. } => 1,
            Self::TimedOut { .. } => 2,
            Self::NoSuitableEndpoint { .. } => 3,
            Self::NotConnected => 4,
            Self::Closed { .. } => 5,
        };
        ErrorCode::new(1, code)
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Errors on an established session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session could not be created or activated.
    #[error("Session creation failed for '{endpoint}': {message}")]
    CreationFailed {
        /// Target endpoint.
        endpoint: String,
        /// Failure description.
        message: String,
    },

    /// A service call returned a bad status.
    #[error("{operation} failed with {status}")]
    Fault {
        /// Service name.
        operation: String,
        /// Status returned by the server.
        status: StatusCode,
    },

    /// The session was removed from the registry.
    #[error("Session for '{endpoint}' has been removed")]
    Removed {
        /// Endpoint of the removed session.
        endpoint: String,
    },
}

impl SessionError {
    /// Creates a creation failure.
    pub fn creation_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CreationFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a service fault.
    pub fn fault(operation: impl Into<String>, status: StatusCode) -> Self {
        Self::Fault {
            operation: operation.into(),
            status,
        }
    }

    /// Returns `true` if retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Removed { .. })
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CreationFailed { .. } => 1,
            Self::Fault { .. } => 2,
            Self::Removed { .. } => 3,
        };
        ErrorCode::new(2, code)
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Subscription creation failed.
    #[error("Subscription creation failed ({publishing_interval:?}): {status}")]
    CreationFailed {
        /// Requested publishing interval.
        publishing_interval: Duration,
        /// Status returned by the server.
        status: StatusCode,
    },

    /// Monitored item creation failed.
    #[error("Monitored item '{node_id}' rejected: {status}")]
    MonitoredItemFailed {
        /// Point identifier.
        node_id: String,
        /// Status returned by the server.
        status: StatusCode,
    },

    /// Subscription unknown to the server.
    #[error("Subscription {subscription_id} not found")]
    NotFound {
        /// Server subscription id.
        subscription_id: u32,
    },
}

impl SubscriptionError {
    /// Creates a subscription creation failure.
    pub fn creation_failed(publishing_interval: Duration, status: StatusCode) -> Self {
        Self::CreationFailed {
            publishing_interval,
            status,
        }
    }

    /// Creates a monitored item failure.
    pub fn monitored_item_failed(node_id: impl Into<String>, status: StatusCode) -> Self {
        Self::MonitoredItemFailed {
            node_id: node_id.into(),
            status,
        }
    }

    /// Returns the carried status code.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::CreationFailed { status, .. } | Self::MonitoredItemFailed { status, .. } => {
                Some(*status)
            }
            Self::NotFound { .. } => Some(StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CreationFailed { .. } => 1,
            Self::MonitoredItemFailed { .. } => 2,
            Self::NotFound { .. } => 3,
        };
        ErrorCode::new(3, code)
    }
}

// =============================================================================
// NamespaceError
// =============================================================================

/// Namespace resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    /// The namespace URI is not in the server's namespace table.
    #[error("Namespace URI '{uri}' is not known to the server")]
    UnknownUri {
        /// The namespace URI.
        uri: String,
    },

    /// The namespace index is outside the server's namespace table.
    #[error("Namespace index {index} is not known to the server")]
    UnknownIndex {
        /// The namespace index.
        index: u16,
    },
}

impl NamespaceError {
    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownUri { .. } => ErrorCode::new(4, 1),
            Self::UnknownIndex { .. } => ErrorCode::new(4, 2),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Malformed point identifier.
    #[error("Invalid node id '{node_id}': {reason}")]
    InvalidNodeId {
        /// The identifier text.
        node_id: String,
        /// Reason.
        reason: String,
    },

    /// Invalid setting.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Setting name.
        field: String,
        /// Reason.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidNodeId { .. } => ErrorCode::new(5, 1),
            Self::InvalidValue { .. } => ErrorCode::new(5, 2),
        }
    }
}

// =============================================================================
// AdminError
// =============================================================================

/// Administrative request errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    /// No session exists for the endpoint.
    #[error("Endpoint '{endpoint}' is not configured")]
    EndpointNotFound {
        /// The endpoint URL.
        endpoint: String,
    },

    /// The continuation token could not be decoded.
    #[error("Invalid continuation token '{token}'")]
    InvalidContinuationToken {
        /// The token text.
        token: String,
    },

    /// The configuration changed since the continuation token was issued.
    #[error("Configuration changed during listing (token version {token_version}, current {current_version})")]
    ConcurrentModification {
        /// Version encoded in the token.
        token_version: u64,
        /// Current version.
        current_version: u64,
    },

    /// The registry is shutting down.
    #[error("Publisher is shutting down")]
    ShuttingDown,
}

impl AdminError {
    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::EndpointNotFound { .. } => 1,
            Self::InvalidContinuationToken { .. } => 2,
            Self::ConcurrentModification { .. } => 3,
            Self::ShuttingDown => 4,
        };
        ErrorCode::new(6, code)
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Timeout errors.
#[derive(Debug, Error)]
#[error("{operation} timed out after {duration:?}")]
pub struct TimeoutError {
    /// Operation name.
    pub operation: String,
    /// Elapsed deadline.
    pub duration: Duration,
}

impl TimeoutError {
    /// Creates a timeout error.
    pub fn new(operation: impl Into<String>, duration: Duration) -> Self {
        Self {
            operation: operation.into(),
            duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::new(7, 1)
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code, formatted as `UA-XXYY`.
///
/// Categories: 1 connection, 2 session, 3 subscription, 4 namespace,
/// 5 configuration, 6 admin, 7 timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_invalid_classification() {
        let error = OpcUaError::fault("CreateMonitoredItems", StatusCode::BAD_SESSION_ID_INVALID);
        assert!(error.is_session_invalid());
        assert!(!error.is_bad_node_id());

        assert!(OpcUaError::not_connected().is_session_invalid());
    }

    #[test]
    fn test_bad_node_id_classification() {
        let error =
            OpcUaError::monitored_item_failed("ns=2;s=Gone", StatusCode::BAD_NODE_ID_UNKNOWN);
        assert!(error.is_bad_node_id());
        assert!(!error.is_session_invalid());
        assert_eq!(error.status_code(), Some(StatusCode::BAD_NODE_ID_UNKNOWN));
    }

    #[test]
    fn test_other_fault_is_neither() {
        let error = OpcUaError::monitored_item_failed("ns=2;i=5", StatusCode::BAD_INTERNAL_ERROR);
        assert!(!error.is_bad_node_id());
        assert!(!error.is_session_invalid());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::new(1, 5).to_string(), "UA-0105");
        assert_eq!(
            OpcUaError::connection_refused("opc.tcp://h:4840", "refused")
                .error_code()
                .to_string(),
            "UA-0101"
        );
    }

    #[test]
    fn test_severity_and_category() {
        let error = OpcUaError::from(AdminError::ShuttingDown);
        assert_eq!(error.severity(), ErrorSeverity::Info);
        assert_eq!(error.category(), "admin");
        assert!(!error.is_retryable());

        let error = OpcUaError::from(NamespaceError::UnknownUri {
            uri: "urn:x".into(),
        });
        assert_eq!(error.severity(), ErrorSeverity::Warning);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_closed_message() {
        let error = ConnectionError::Closed {
            reason: Some("keep-alive lost".into()),
        };
        assert_eq!(error.to_string(), "Connection closed: keep-alive lost");
        assert_eq!(
            ConnectionError::Closed { reason: None }.to_string(),
            "Connection closed"
        );
    }
}
