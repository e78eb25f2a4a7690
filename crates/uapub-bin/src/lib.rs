// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-bin
//!
//! CLI binary for the uapub OPC UA edge telemetry publisher.
//!
//! This crate provides the main binary entry point, including:
//!
//! - CLI argument parsing with clap
//! - Runtime wiring of sessions, delivery queue, batcher and MQTT transport
//! - Write-back of the published configuration to the node file
//! - Periodic diagnostics
//! - Graceful shutdown handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         main.rs                             │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                    ┌──────▼──────┐
//!                    │    cli.rs   │
//!                    └──────┬──────┘
//!                           │
//!               ┌───────────┼───────────┐
//!               ▼           ▼           ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │ commands │ │ runtime  │ │ logging  │
//!        └──────────┘ └────┬─────┘ └──────────┘
//!                          │
//!        ┌─────────────────┼──────────────────┐
//!        ▼                 ▼                  ▼
//!  ┌────────────┐   ┌─────────────┐   ┌─────────────┐
//!  │  shutdown  │   │ persistence │   │ diagnostics │
//!  └────────────┘   └─────────────┘   └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the publisher (default command)
//! uapub -c /etc/uapub/uapub.yaml
//!
//! # Validate configuration and node file
//! uapub validate --strict
//!
//! # Show version
//! uapub version
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use diagnostics::DiagnosticsSnapshot;
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use persistence::{PersistenceWorker, WriteBackSignal};
pub use runtime::{PublisherRuntime, RunningPublisher, RuntimeBuilder};
pub use shutdown::{ShutdownCoordinator, ShutdownGuard};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
