// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub Integration Tests
//!
//! End-to-end tests for the uapub OPC UA telemetry publisher, run against an
//! in-memory OPC UA server and a recording transport.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities, fixtures, and helpers
//!   - `fixtures`: Pre-built test data for consistent testing
//!   - `assertions`: Custom assertion helpers
//!   - `mocks`: Fake OPC UA server and transport
//!   - `harness`: Registry harness for reconciliation tests
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p uapub-tests
//!
//! # Run specific test suite
//! cargo test -p uapub-tests --test integration_reconcile
//! cargo test -p uapub-tests --test integration_delivery
//! cargo test -p uapub-tests --test integration_config
//!
//! # Run with log output
//! RUST_LOG=uapub=debug cargo test -p uapub-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! ### Reconciliation Tests (`integration_reconcile.rs`)
//! - Publish, unpublish and duplicate detection
//! - Subscription grouping by publishing interval
//! - Namespace resolution and server rejections
//! - Keep-alive loss and reconnects
//! - Skip-first and heartbeat re-sends
//! - Paged listings
//!
//! ### Delivery Tests (`integration_delivery.rs`)
//! - Immediate and interval-driven sends
//! - Frame size limits and oversize drops
//! - Queue overflow and send failures
//!
//! ### Config Tests (`integration_config.rs`)
//! - Node configuration load and write-back
//! - Full runtime start and stop against the fakes
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use uapub_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = RegistryHarness::new();
//!     harness.publish(vec![point("ns=2;s=A")]).await.unwrap();
//!     harness.reconcile().await;
//!     assert_eq!(harness.connector.monitored_nodes(), vec!["ns=2;s=A"]);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{init_test_logging, temp_test_dir};
}
