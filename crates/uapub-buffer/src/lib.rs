// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-buffer
//!
//! Delivery path of the uapub publisher.
//!
//! ```text
//!  notification callbacks        batcher task               broker
//!  ──────────────────────        ────────────               ──────
//!  RecordSink::enqueue ──▶ DeliveryQueue ──▶ Batcher ──▶ TelemetryTransport
//!   (never blocks,          (bounded FIFO)   (JSON-array     (MQTT, QoS 1)
//!    drops on overflow)                       frames)
//! ```
//!
//! Delivery is at-most-once: overflowing, oversized and rejected records are
//! counted in [`DeliveryStats`] and dropped.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod batcher;
pub mod error;
pub mod mqtt;
pub mod queue;
pub mod stats;
pub mod traits;

pub use batcher::{Batcher, BatcherConfig, BatcherConfigBuilder};
pub use error::{BufferError, BufferResult, TransportError};
pub use mqtt::{MqttConfig, MqttTransport};
pub use queue::{DeliveryQueue, Dequeue, OVERFLOW_LOG_EVERY};
pub use stats::{DeliveryStats, DeliveryStatsInner};
pub use traits::{Frame, TelemetryTransport, FRAME_ENVELOPE};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
