// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-core
//!
//! Shared types for the uapub OPC UA edge telemetry publisher.
//!
//! This crate is the meeting point between the OPC UA side of the publisher
//! (which produces records from value changes) and the delivery side (which
//! frames and ships them):
//!
//! - **Message**: the outbound [`MessageRecord`] and the non-blocking [`RecordSink`]
//! - **Telemetry**: per-field publish switches, JSON names and rewrite patterns
//! - **Error**: errors raised while compiling patterns or encoding records
//!
//! ## Example
//!
//! ```rust
//! use uapub_core::{MessageRecord, TelemetryConfig};
//!
//! let mut record = MessageRecord::new("opc.tcp://plc:4840");
//! record.node_id = Some("ns=2;s=Temperature".into());
//! record.value = Some("21.5".into());
//!
//! let json = TelemetryConfig::default().to_json(&record);
//! assert_eq!(json["NodeId"], "ns=2;s=Temperature");
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod message;
pub mod telemetry;

pub use error::{CoreError, CoreResult};
pub use message::{format_timestamp, MessageRecord, RecordSink};
pub use telemetry::{
    FieldKind, FieldPattern, TelemetryConfig, TelemetryConfigSet, TelemetryEncoder, TelemetryField,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
