// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client boundary.
//!
//! - **Transport**: the [`UaConnector`] / [`UaSession`] traits the
//!   reconciliation engine drives, plus the value and request types crossing
//!   them
//! - **Real transport** (feature `real-transport`): an implementation on top
//!   of the `opcua` crate
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     SessionRegistry                             │
//! │            (admin requests, reconciliation loops)               │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Session                                  │
//! │        (subscriptions, points, keep-alive, namespaces)          │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 UaConnector / UaSession                         │
//! │            (opcua crate, or a fake in tests)                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod transport;

#[cfg(feature = "real-transport")]
mod real_transport;

pub use transport::{
    AuthMode, ConnectRequest, CreatedMonitoredItem, CreatedSubscription, DataChange,
    DataChangeHandler, EncodedValue, KeepAliveHandler, MonitoredItemRequest, UaConnector,
    UaSession, UaValue, UserIdentity,
};

#[cfg(feature = "real-transport")]
pub use real_transport::{OpcUaConnector, OpcUaConnectorConfig};
