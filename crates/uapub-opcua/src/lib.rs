// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA side of the uapub publisher.
//!
//! This crate keeps a configured set of data points under subscription on
//! one or more OPC UA servers and turns their value changes into
//! [`MessageRecord`](uapub_core::MessageRecord)s.
//!
//! # Features
//!
//! - Per-endpoint sessions that connect, heal and garbage-collect themselves
//! - Subscriptions grouped by publishing interval, created on demand
//! - Identifiers in numeric-namespace (`ns=2;s=A`) or URI-qualified
//!   (`nsu=urn:x;s=A`) form, resolved against the live namespace table
//! - Keep-alive monitoring with a missed-count threshold
//! - Per-point heartbeats and skip-first
//! - Paginated administrative listings with concurrent-modification detection
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── Connection    - Endpoint unreachable, handshake failures
//! ├── Session       - Service faults, removed sessions
//! ├── Subscription  - Subscription and monitored item failures
//! ├── Namespace     - Unresolvable namespace URIs or indices
//! ├── Configuration - Invalid identifiers or settings
//! ├── Admin         - Unknown endpoints, stale continuation tokens
//! └── Timeout       - Service call deadlines
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use uapub_opcua::{EndpointRequest, PointRequest, PublisherContext, SessionRegistry};
//!
//! let context = PublisherContext::builder(connector, sink).build()?;
//! let registry = SessionRegistry::new(context);
//! registry
//!     .publish_nodes(
//!         EndpointRequest::new("opc.tcp://plc:4840"),
//!         vec![PointRequest::parse("nsu=urn:plc;s=Temperature")?],
//!     )
//!     .await?;
//! registry.start().await;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod admin;
pub mod client;
pub mod context;
pub mod error;
pub mod heartbeat;
pub mod point;
pub mod registry;
pub mod session;
pub mod subscription;
pub mod translate;
pub mod types;

pub use admin::{
    ContinuationToken, EndpointInfo, Page, PointCounts, PointInfo, RegistryDiagnostics,
    SessionDiagnostics,
};
pub use client::{AuthMode, UaConnector, UaSession, UaValue, UserIdentity};
pub use context::{
    default_suppressed_status_codes, ConfigVersion, NoPersistence, PersistenceHook,
    PublisherContext, PublisherContextBuilder, SessionSettings, MIN_RECONCILE_INTERVAL,
};
pub use error::{
    AdminError, ConfigurationError, ConnectionError, ErrorCode, ErrorSeverity, NamespaceError,
    OpcUaError, OpcUaResult, SessionError, SubscriptionError, TimeoutError,
};
pub use point::{PointRequest, PointSettings, PointState};
pub use registry::{PublishOutcome, PublishedEndpoint, SessionRegistry};
pub use session::{EndpointRequest, Session, SessionState};
pub use types::{NamespaceTable, NodeId, NodeIdentifier, PointId, StatusCode};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
