// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions for uapub.
//!
//! # Schema Structure
//!
//! ```text
//! PublisherConfig
//! ├── publisher: PublisherSection     (identity, node file, OPC UA client)
//! ├── sessions: SessionsSection       (reconciliation, keep-alive, defaults)
//! ├── telemetry: TelemetrySection     (field layout, per-endpoint overrides)
//! ├── delivery: DeliverySection       (queue, batching, MQTT)
//! ├── admin: AdminSection             (listing page size)
//! ├── logging: LoggingSection
//! └── diagnostics: DiagnosticsSection
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use uapub_buffer::{BatcherConfig, MqttConfig, FRAME_ENVELOPE};
use uapub_core::{TelemetryConfig, TelemetryConfigSet};
use uapub_opcua::{SessionSettings, StatusCode, MIN_RECONCILE_INTERVAL};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default node configuration file name.
pub const DEFAULT_NODE_CONFIG_PATH: &str = "publishednodes.json";

/// Default delivery queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// Default maximum frame size (256 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

// =============================================================================
// PublisherConfig
// =============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    /// Publisher identity and OPC UA client settings.
    #[serde(default)]
    pub publisher: PublisherSection,

    /// Session reconciliation settings.
    #[serde(default)]
    pub sessions: SessionsSection,

    /// Telemetry layout.
    #[serde(default)]
    pub telemetry: TelemetrySection,

    /// Delivery path settings.
    #[serde(default)]
    pub delivery: DeliverySection,

    /// Administrative listing settings.
    #[serde(default)]
    pub admin: AdminSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Periodic diagnostics settings.
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
}

impl PublisherConfig {
    /// Validates the whole configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.publisher.validate()?;
        self.sessions.validate()?;
        self.delivery.validate()?;
        self.admin.validate()?;
        Ok(())
    }

    /// Session defaults for the OPC UA side.
    pub fn session_settings(&self) -> SessionSettings {
        let s = &self.sessions;
        SessionSettings {
            reconcile_interval: Duration::from_secs(s.reconcile_interval_secs),
            backoff_cap: s.backoff_cap,
            connect_timeout: Duration::from_secs(s.connect_timeout_secs),
            operation_timeout: Duration::from_secs(s.operation_timeout_secs),
            session_timeout: Duration::from_secs(s.session_timeout_secs),
            keep_alive_interval: Duration::from_secs(s.keep_alive_interval_secs),
            keep_alive_threshold: s.keep_alive_threshold,
            default_publishing_interval: Duration::from_millis(s.default_publishing_interval_ms),
            default_sampling_interval: Duration::from_millis(s.default_sampling_interval_ms),
            default_heartbeat_interval: Duration::from_secs(s.default_heartbeat_interval_secs),
            default_skip_first: s.default_skip_first,
            queue_size: s.queue_size,
            fetch_display_names: s.fetch_display_names,
            page_size: self.admin.page_size,
        }
    }

    /// Suppressed status codes, parsed.
    pub fn suppressed_status_codes(&self) -> ConfigResult<Vec<StatusCode>> {
        self.sessions.suppressed_status_codes()
    }

    /// Telemetry layouts keyed by endpoint.
    pub fn telemetry_set(&self) -> TelemetryConfigSet {
        self.telemetry.to_set()
    }

    /// Batching settings.
    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig::builder()
            .send_interval(Duration::from_millis(self.delivery.send_interval_ms))
            .max_frame_size(self.delivery.max_frame_size)
            .build()
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Publisher identity and OPC UA client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherSection {
    /// Application name presented to servers.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI presented to servers.
    #[serde(default = "default_application_uri")]
    pub application_uri: String,

    /// Node configuration file.
    #[serde(default = "default_node_config_path")]
    pub node_config_path: PathBuf,

    /// Certificate store directory.
    #[serde(default)]
    pub pki_dir: Option<PathBuf>,

    /// Accept server certificates without a trust list.
    #[serde(default)]
    pub trust_server_certs: bool,

    /// Create a self-signed application certificate if none exists.
    #[serde(default = "default_true")]
    pub create_sample_keypair: bool,
}

fn default_application_name() -> String {
    "uapub".to_string()
}

fn default_application_uri() -> String {
    "urn:uapub:publisher".to_string()
}

fn default_node_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_NODE_CONFIG_PATH)
}

fn default_true() -> bool {
    true
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            application_uri: default_application_uri(),
            node_config_path: default_node_config_path(),
            pki_dir: None,
            trust_server_certs: false,
            create_sample_keypair: true,
        }
    }
}

impl PublisherSection {
    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.application_name.is_empty() {
            return Err(ConfigError::validation("publisher.application_name", "cannot be empty"));
        }
        if !self.application_uri.contains(':') {
            return Err(ConfigError::validation(
                "publisher.application_uri",
                "must be a URI",
            ));
        }
        if self.node_config_path.as_os_str().is_empty() {
            return Err(ConfigError::validation("publisher.node_config_path", "cannot be empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Session reconciliation and point defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsSection {
    /// Base wait between reconciliation passes, in seconds.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Upper bound of the connect backoff multiplier.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap: u32,

    /// Connect deadline, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Service call deadline, in seconds.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Requested session timeout, in seconds.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Keep-alive interval, in seconds.
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,

    /// Consecutive bad keep-alives before a session is dropped.
    #[serde(default = "default_keep_alive_threshold")]
    pub keep_alive_threshold: u32,

    /// Publishing interval for points without one, in milliseconds.
    #[serde(default)]
    pub default_publishing_interval_ms: u64,

    /// Sampling interval for points without one, in milliseconds.
    #[serde(default = "default_sampling_interval_ms")]
    pub default_sampling_interval_ms: u64,

    /// Heartbeat interval for points without one, in seconds. 0 disables.
    #[serde(default)]
    pub default_heartbeat_interval_secs: u64,

    /// Skip-first flag for points without one.
    #[serde(default)]
    pub default_skip_first: bool,

    /// Server-side queue size per monitored item.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Read display names from the server when none is configured.
    #[serde(default)]
    pub fetch_display_names: bool,

    /// Status codes whose notifications are dropped.
    #[serde(default = "default_suppressed")]
    pub suppressed_status_codes: Vec<String>,
}

fn default_reconcile_interval_secs() -> u64 {
    10
}

fn default_backoff_cap() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_operation_timeout_secs() -> u64 {
    10
}

fn default_session_timeout_secs() -> u64 {
    60
}

fn default_keep_alive_interval_secs() -> u64 {
    2
}

fn default_keep_alive_threshold() -> u32 {
    5
}

fn default_sampling_interval_ms() -> u64 {
    1000
}

fn default_queue_size() -> u32 {
    1
}

fn default_suppressed() -> Vec<String> {
    vec![
        "BadNoCommunication".to_string(),
        "BadWaitingForInitialData".to_string(),
    ]
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            backoff_cap: default_backoff_cap(),
            connect_timeout_secs: default_connect_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            keep_alive_threshold: default_keep_alive_threshold(),
            default_publishing_interval_ms: 0,
            default_sampling_interval_ms: default_sampling_interval_ms(),
            default_heartbeat_interval_secs: 0,
            default_skip_first: false,
            queue_size: default_queue_size(),
            fetch_display_names: false,
            suppressed_status_codes: default_suppressed(),
        }
    }
}

impl SessionsSection {
    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if Duration::from_secs(self.reconcile_interval_secs) < MIN_RECONCILE_INTERVAL {
            return Err(ConfigError::validation(
                "sessions.reconcile_interval_secs",
                format!("must be at least {}", MIN_RECONCILE_INTERVAL.as_secs()),
            ));
        }
        if self.keep_alive_threshold == 0 {
            return Err(ConfigError::validation(
                "sessions.keep_alive_threshold",
                "must be at least 1",
            ));
        }
        if self.backoff_cap == 0 {
            return Err(ConfigError::validation("sessions.backoff_cap", "must be at least 1"));
        }
        if self.keep_alive_interval_secs == 0 {
            return Err(ConfigError::validation(
                "sessions.keep_alive_interval_secs",
                "must be at least 1",
            ));
        }
        if self.connect_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(ConfigError::validation(
                "sessions.connect_timeout_secs",
                "timeouts must be at least 1 second",
            ));
        }
        self.suppressed_status_codes()?;
        Ok(())
    }

    /// Parses the suppressed status codes.
    pub fn suppressed_status_codes(&self) -> ConfigResult<Vec<StatusCode>> {
        self.suppressed_status_codes
            .iter()
            .map(|name| {
                StatusCode::from_str(name).map_err(|_| {
                    ConfigError::validation(
                        "sessions.suppressed_status_codes",
                        format!("unknown status code '{name}'"),
                    )
                })
            })
            .collect()
    }
}

// =============================================================================
// Telemetry
// =============================================================================

/// Telemetry layout with per-endpoint overrides.
///
/// Overrides are a list rather than a map because endpoint URLs contain
/// characters that configuration keys cannot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Layout for endpoints without an override.
    #[serde(default)]
    pub defaults: TelemetryConfig,

    /// Per-endpoint overrides.
    #[serde(default)]
    pub endpoints: Vec<EndpointTelemetry>,
}

/// Telemetry override for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointTelemetry {
    /// Endpoint URL the override applies to.
    pub endpoint_url: String,
    /// Layout.
    pub layout: TelemetryConfig,
}

impl TelemetrySection {
    /// Builds the layout set used by the encoder.
    pub fn to_set(&self) -> TelemetryConfigSet {
        self.endpoints.iter().fold(
            TelemetryConfigSet::new(self.defaults.clone()),
            |set, entry| set.with_endpoint(entry.endpoint_url.clone(), entry.layout.clone()),
        )
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Delivery queue, batching and broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySection {
    /// Delivery queue capacity, in records.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Fixed flush interval, in milliseconds. 0 disables.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    /// Maximum transport message size, in bytes. 0 means unbounded.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Time allowed for draining on shutdown, in seconds.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// MQTT broker.
    #[serde(default = "default_mqtt")]
    pub mqtt: MqttConfig,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_send_interval_ms() -> u64 {
    10_000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_drain_timeout_secs() -> u64 {
    10
}

fn default_mqtt() -> MqttConfig {
    MqttConfig::new("localhost", "uapub/telemetry")
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            send_interval_ms: default_send_interval_ms(),
            max_frame_size: default_max_frame_size(),
            drain_timeout_secs: default_drain_timeout_secs(),
            mqtt: default_mqtt(),
        }
    }
}

impl DeliverySection {
    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::validation("delivery.queue_capacity", "must be at least 1"));
        }
        if self.max_frame_size != 0 && self.max_frame_size <= FRAME_ENVELOPE {
            return Err(ConfigError::validation(
                "delivery.max_frame_size",
                format!("must be 0 or larger than the framing overhead ({FRAME_ENVELOPE} bytes)"),
            ));
        }
        self.mqtt
            .validate()
            .map_err(|e| ConfigError::validation("delivery.mqtt", e.to_string()))?;
        Ok(())
    }

    /// Drain grace period.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

// =============================================================================
// Admin / Diagnostics
// =============================================================================

/// Administrative listing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminSection {
    /// Items per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    1000
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl AdminSection {
    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.page_size == 0 {
            return Err(ConfigError::validation("admin.page_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Periodic diagnostics settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsSection {
    /// Interval between diagnostics log lines, in seconds. 0 disables.
    #[serde(default)]
    pub interval_secs: u64,
}

impl DiagnosticsSection {
    /// Reporting interval, if enabled.
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
    /// Compact single-line text.
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PublisherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.publisher.node_config_path, PathBuf::from("publishednodes.json"));
        assert_eq!(config.delivery.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_reconcile_interval_minimum() {
        let mut config = PublisherConfig::default();
        config.sessions.reconcile_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { ref field, .. }) if field == "sessions.reconcile_interval_secs"
        ));
    }

    #[test]
    fn test_keep_alive_threshold_minimum() {
        let mut config = PublisherConfig::default();
        config.sessions.keep_alive_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_size_must_exceed_envelope() {
        let mut config = PublisherConfig::default();
        config.delivery.max_frame_size = 2;
        assert!(config.validate().is_err());

        config.delivery.max_frame_size = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_status_code_rejected() {
        let mut config = PublisherConfig::default();
        config.sessions.suppressed_status_codes = vec!["BadNotARealCode".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_suppressed_codes_parse() {
        let config = PublisherConfig::default();
        let codes = config.suppressed_status_codes().unwrap();
        assert!(codes.contains(&StatusCode::BAD_NO_COMMUNICATION));
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn test_session_settings_conversion() {
        let mut config = PublisherConfig::default();
        config.sessions.default_heartbeat_interval_secs = 30;
        config.admin.page_size = 50;

        let settings = config.session_settings();
        assert_eq!(settings.reconcile_interval, Duration::from_secs(10));
        assert_eq!(settings.default_heartbeat_interval, Duration::from_secs(30));
        assert_eq!(settings.page_size, 50);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_telemetry_overrides() {
        let mut config = PublisherConfig::default();
        config.telemetry.endpoints.push(EndpointTelemetry {
            endpoint_url: "opc.tcp://plc:4840".into(),
            layout: TelemetryConfig {
                flatten: true,
                ..TelemetryConfig::default()
            },
        });

        let set = config.telemetry_set();
        assert!(set.for_endpoint("opc.tcp://plc:4840").flatten);
        assert!(!set.for_endpoint("opc.tcp://other:4840").flatten);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::Debug.as_str(), "debug");
    }

    #[test]
    fn test_diagnostics_interval() {
        assert_eq!(DiagnosticsSection::default().interval(), None);
        assert_eq!(
            DiagnosticsSection { interval_secs: 60 }.interval(),
            Some(Duration::from_secs(60))
        );
    }
}
