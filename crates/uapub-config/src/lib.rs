// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-config
//!
//! Configuration management for the uapub publisher.
//!
//! ## Features
//!
//! - **Schema**: publisher settings with validation and conversion into the
//!   typed settings of the OPC UA and delivery crates
//! - **Multi-Format Support**: YAML, TOML, and JSON configuration files
//! - **Environment**: `${VAR}` / `${VAR:default}` placeholders and `UAPUB_*`
//!   overrides
//! - **Node configuration file**: the list of endpoints and points to
//!   publish, in its current and legacy forms, with atomic save
//!
//! ## Quick Start
//!
//! ```no_run
//! use uapub_config::{load_config, NodeConfigFile};
//!
//! let config = load_config("uapub.yaml").unwrap();
//! let nodes = NodeConfigFile::load(&config.publisher.node_config_path).unwrap();
//! println!("{} points configured", nodes.point_count());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod nodes;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, resolve_placeholders, ConfigFormat, ConfigLoader};
pub use nodes::{EndpointEntry, EndpointPoints, LegacyNodeId, NodeConfigFile, NodeEntry};
pub use schema::{
    AdminSection, DeliverySection, DiagnosticsSection, EndpointTelemetry, LogFormat, LogLevel,
    LoggingSection, PublisherConfig, PublisherSection, SessionsSection, TelemetrySection,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
