// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built test data for consistent testing across integration suites.

use std::time::Duration;

use chrono::{TimeZone, Utc};

use uapub_config::PublisherConfig;
use uapub_core::MessageRecord;
use uapub_opcua::{EndpointRequest, PointId, PointRequest, PointSettings, SessionSettings};

// =============================================================================
// Constants
// =============================================================================

/// Endpoint used by most scenarios.
pub const ENDPOINT: &str = "opc.tcp://plc-01:4840";

/// A second endpoint.
pub const OTHER_ENDPOINT: &str = "opc.tcp://plc-02:4840";

/// Namespace URI at index 2 of [`NAMESPACES`].
pub const PLANT_NAMESPACE: &str = "urn:plant:line1";

/// Namespace array served by the fake server.
pub const NAMESPACES: &[&str] = &["http://opcfoundation.org/UA/", "urn:fake:server", PLANT_NAMESPACE];

// =============================================================================
// Settings
// =============================================================================

/// Session settings with short timeouts and the minimum reconcile interval.
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        reconcile_interval: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(2),
        operation_timeout: Duration::from_secs(2),
        keep_alive_threshold: 5,
        ..SessionSettings::default()
    }
}

/// Publisher configuration for runtime tests: immediate sends, no diagnostics.
pub fn test_publisher_config() -> PublisherConfig {
    let mut config = PublisherConfig::default();
    config.sessions.reconcile_interval_secs = 1;
    config.sessions.connect_timeout_secs = 2;
    config.sessions.operation_timeout_secs = 2;
    config.delivery.send_interval_ms = 0;
    config.delivery.max_frame_size = 0;
    config.delivery.drain_timeout_secs = 2;
    config.diagnostics.interval_secs = 0;
    config
}

// =============================================================================
// Points and Endpoints
// =============================================================================

/// Anonymous, unsecured endpoint request.
pub fn endpoint(url: &str) -> EndpointRequest {
    EndpointRequest::new(url).with_security(false)
}

/// Parses a point with default settings.
///
/// # Panics
///
/// Panics on a malformed identifier.
pub fn point(id: &str) -> PointRequest {
    PointRequest::parse(id).expect("valid point identifier")
}

/// Parses a point with explicit settings.
pub fn point_with(id: &str, settings: PointSettings) -> PointRequest {
    point(id).with_settings(settings)
}

/// Parses an identifier.
pub fn point_id(id: &str) -> PointId {
    id.parse().expect("valid point identifier")
}

/// Settings with a publishing interval.
pub fn publishing(ms: u64) -> PointSettings {
    PointSettings {
        publishing_interval: Some(Duration::from_millis(ms)),
        ..PointSettings::default()
    }
}

/// Settings with a sampling interval.
pub fn sampling(ms: u64) -> PointSettings {
    PointSettings {
        sampling_interval: Some(Duration::from_millis(ms)),
        ..PointSettings::default()
    }
}

/// Settings with a heartbeat interval.
pub fn heartbeat(secs: u64) -> PointSettings {
    PointSettings {
        heartbeat_interval: Some(Duration::from_secs(secs)),
        ..PointSettings::default()
    }
}

/// Settings with skip-first enabled.
pub fn skip_first() -> PointSettings {
    PointSettings {
        skip_first: Some(true),
        ..PointSettings::default()
    }
}

// =============================================================================
// Node Configuration
// =============================================================================

/// Node configuration file with two endpoints, one in the legacy form.
pub fn node_file_json() -> String {
    format!(
        r#"[
  {{
    "EndpointUrl": "{ENDPOINT}",
    "UseSecurity": false,
    "OpcNodes": [
      {{ "Id": "ns=2;s=Line1.Temperature", "OpcSamplingInterval": 500 }},
      {{ "Id": "nsu={PLANT_NAMESPACE};s=Line1.Pressure", "HeartbeatInterval": 30, "SkipFirst": true }}
    ]
  }},
  {{ "EndpointUrl": "{OTHER_ENDPOINT}", "UseSecurity": false, "NodeId": {{ "Identifier": "ns=2;i=1001" }} }}
]"#
    )
}

// =============================================================================
// Records
// =============================================================================

/// A record with node id, value and a fixed source timestamp.
pub fn record(node_id: &str, value: &str) -> MessageRecord {
    let mut record = MessageRecord::new(ENDPOINT);
    record.node_id = Some(node_id.to_string());
    record.value = Some(value.to_string());
    record.source_timestamp = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single();
    record
}

/// `count` records with distinct node ids.
pub fn records(count: usize) -> Vec<MessageRecord> {
    (0..count)
        .map(|i| record(&format!("ns=2;s=Tag{i}"), &i.to_string()))
        .collect()
}

/// A record whose value is `len` bytes long.
pub fn large_record(len: usize) -> MessageRecord {
    let mut record = record("ns=2;s=Blob", "");
    record.value = Some("x".repeat(len));
    record.preserve_value_quotes = true;
    record
}
