// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Telemetry field configuration and JSON encoding.
//!
//! Each field of a [`MessageRecord`] can be switched on or off, renamed and
//! rewritten with a regular expression. Records are encoded either nested
//! (value, timestamp and status grouped under a sub-object) or flattened.
//!
//! # Patterns
//!
//! A [`FieldPattern`] is applied after a field has been populated. When the
//! expression matches, the result is the concatenation of all capture groups,
//! or the whole match if the expression has no groups. A non-matching input is
//! left unchanged.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::message::{format_timestamp, MessageRecord};

// =============================================================================
// FieldPattern
// =============================================================================

/// Compiled rewrite pattern for one telemetry field.
#[derive(Clone)]
pub struct FieldPattern {
    source: String,
    regex: Regex,
}

impl FieldPattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPattern`] if the expression does not compile.
    pub fn new(pattern: &str) -> CoreResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| CoreError::invalid_pattern(pattern, e))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Returns the pattern source text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Applies the pattern to `input`.
    pub fn apply(&self, input: &str) -> String {
        let Some(captures) = self.regex.captures(input) else {
            return input.to_string();
        };

        if captures.len() > 1 {
            captures
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .collect()
        } else {
            captures[0].to_string()
        }
    }
}

impl fmt::Debug for FieldPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldPattern").field(&self.source).finish()
    }
}

impl PartialEq for FieldPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for FieldPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for FieldPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        FieldPattern::new(&source).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// TelemetryField
// =============================================================================

/// Identifies one telemetry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Endpoint URL.
    EndpointUrl,
    /// Configured point identifier.
    NodeId,
    /// URI-qualified point identifier.
    ExpandedNodeId,
    /// Server application URI.
    ApplicationUri,
    /// Display name.
    DisplayName,
    /// Value.
    Value,
    /// Source timestamp.
    SourceTimestamp,
    /// Numeric status code.
    StatusCode,
    /// Symbolic status.
    Status,
}

impl FieldKind {
    /// Default JSON key.
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::EndpointUrl => "EndpointUrl",
            Self::NodeId => "NodeId",
            Self::ExpandedNodeId => "ExpandedNodeId",
            Self::ApplicationUri => "ApplicationUri",
            Self::DisplayName => "DisplayName",
            Self::Value => "Value",
            Self::SourceTimestamp => "SourceTimestamp",
            Self::StatusCode => "StatusCode",
            Self::Status => "Status",
        }
    }

    /// Whether the field is published when not configured.
    pub const fn default_publish(self) -> bool {
        !matches!(
            self,
            Self::EndpointUrl | Self::ExpandedNodeId | Self::StatusCode | Self::Status
        )
    }

    /// Whether the field belongs to the value sub-object in nested layout.
    const fn is_value_group(self) -> bool {
        matches!(
            self,
            Self::Value | Self::SourceTimestamp | Self::StatusCode | Self::Status
        )
    }
}

/// Settings for one telemetry field.
///
/// Unset members fall back to the field's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryField {
    /// Whether the field is emitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<bool>,

    /// JSON key override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Rewrite pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<FieldPattern>,
}

impl TelemetryField {
    /// Creates a field with an explicit publish switch.
    pub fn published(publish: bool) -> Self {
        Self {
            publish: Some(publish),
            ..Self::default()
        }
    }

    /// Sets the rewrite pattern.
    pub fn with_pattern(mut self, pattern: FieldPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Sets the JSON key.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// =============================================================================
// TelemetryConfig
// =============================================================================

fn default_value_object_name() -> String {
    "Value".to_string()
}

/// Telemetry layout for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Emit every field at the top level instead of nesting value fields.
    pub flatten: bool,

    /// Key of the value sub-object in nested layout.
    #[serde(default = "default_value_object_name")]
    pub value_object_name: String,

    /// Endpoint URL field.
    pub endpoint_url: TelemetryField,
    /// Configured identifier field.
    pub node_id: TelemetryField,
    /// URI-qualified identifier field.
    pub expanded_node_id: TelemetryField,
    /// Application URI field.
    pub application_uri: TelemetryField,
    /// Display name field.
    pub display_name: TelemetryField,
    /// Value field.
    pub value: TelemetryField,
    /// Source timestamp field.
    pub source_timestamp: TelemetryField,
    /// Status code field.
    pub status_code: TelemetryField,
    /// Status text field.
    pub status: TelemetryField,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            flatten: false,
            value_object_name: default_value_object_name(),
            endpoint_url: TelemetryField::default(),
            node_id: TelemetryField::default(),
            expanded_node_id: TelemetryField::default(),
            application_uri: TelemetryField::default(),
            display_name: TelemetryField::default(),
            value: TelemetryField::default(),
            source_timestamp: TelemetryField::default(),
            status_code: TelemetryField::default(),
            status: TelemetryField::default(),
        }
    }
}

impl TelemetryConfig {
    /// Returns the settings of one field.
    pub fn field(&self, kind: FieldKind) -> &TelemetryField {
        match kind {
            FieldKind::EndpointUrl => &self.endpoint_url,
            FieldKind::NodeId => &self.node_id,
            FieldKind::ExpandedNodeId => &self.expanded_node_id,
            FieldKind::ApplicationUri => &self.application_uri,
            FieldKind::DisplayName => &self.display_name,
            FieldKind::Value => &self.value,
            FieldKind::SourceTimestamp => &self.source_timestamp,
            FieldKind::StatusCode => &self.status_code,
            FieldKind::Status => &self.status,
        }
    }

    /// Returns `true` if the field is emitted.
    pub fn publishes(&self, kind: FieldKind) -> bool {
        self.field(kind).publish.unwrap_or(kind.default_publish())
    }

    /// Returns the JSON key of the field.
    pub fn name(&self, kind: FieldKind) -> &str {
        self.field(kind)
            .name
            .as_deref()
            .unwrap_or(kind.default_name())
    }

    fn rewrite(&self, kind: FieldKind, slot: &mut Option<String>) {
        if let (Some(pattern), Some(text)) = (&self.field(kind).pattern, slot.as_mut()) {
            *text = pattern.apply(text);
        }
    }

    /// Applies field patterns to a populated record.
    ///
    /// The endpoint URL selects the configuration at encoding time, so its
    /// pattern is applied by [`TelemetryConfig::to_json`] instead.
    pub fn apply_patterns(&self, record: &mut MessageRecord) {
        self.rewrite(FieldKind::NodeId, &mut record.node_id);
        self.rewrite(FieldKind::ExpandedNodeId, &mut record.expanded_node_id);
        self.rewrite(FieldKind::ApplicationUri, &mut record.application_uri);
        self.rewrite(FieldKind::DisplayName, &mut record.display_name);
        self.rewrite(FieldKind::Value, &mut record.value);
        self.rewrite(FieldKind::Status, &mut record.status);
    }

    /// Renders a record as a JSON object.
    pub fn to_json(&self, record: &MessageRecord) -> Value {
        let mut root = Map::new();
        let mut value_group = Map::new();

        let endpoint = match &self.endpoint_url.pattern {
            Some(pattern) => pattern.apply(&record.endpoint_url),
            None => record.endpoint_url.clone(),
        };

        let fields = [
            (FieldKind::EndpointUrl, Some(Value::String(endpoint))),
            (FieldKind::NodeId, record.node_id.clone().map(Value::String)),
            (
                FieldKind::ExpandedNodeId,
                record.expanded_node_id.clone().map(Value::String),
            ),
            (
                FieldKind::ApplicationUri,
                record.application_uri.clone().map(Value::String),
            ),
            (
                FieldKind::DisplayName,
                record.display_name.clone().map(Value::String),
            ),
            (FieldKind::Value, record.value_json()),
            (
                FieldKind::SourceTimestamp,
                record.source_timestamp.map(|ts| Value::String(format_timestamp(ts))),
            ),
            (FieldKind::StatusCode, record.status_code.map(Value::from)),
            (FieldKind::Status, record.status.clone().map(Value::String)),
        ];

        for (kind, value) in fields {
            let Some(value) = value else { continue };
            if !self.publishes(kind) {
                continue;
            }
            let target = if !self.flatten && kind.is_value_group() {
                &mut value_group
            } else {
                &mut root
            };
            target.insert(self.name(kind).to_string(), value);
        }

        if !value_group.is_empty() {
            root.insert(self.value_object_name.clone(), Value::Object(value_group));
        }

        Value::Object(root)
    }
}

// =============================================================================
// TelemetryConfigSet
// =============================================================================

/// Default telemetry layout plus per-endpoint overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfigSet {
    /// Layout used for endpoints without an override.
    #[serde(flatten)]
    pub default: TelemetryConfig,

    /// Overrides keyed by endpoint URL.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub endpoints: HashMap<String, TelemetryConfig>,
}

impl TelemetryConfigSet {
    /// Creates a set with only a default layout.
    pub fn new(default: TelemetryConfig) -> Self {
        Self {
            default,
            endpoints: HashMap::new(),
        }
    }

    /// Adds an endpoint override.
    pub fn with_endpoint(mut self, endpoint_url: impl Into<String>, config: TelemetryConfig) -> Self {
        self.endpoints.insert(endpoint_url.into(), config);
        self
    }

    /// Returns the layout for an endpoint.
    pub fn for_endpoint(&self, endpoint_url: &str) -> &TelemetryConfig {
        self.endpoints.get(endpoint_url).unwrap_or(&self.default)
    }
}

// =============================================================================
// TelemetryEncoder
// =============================================================================

/// Serializes records to their wire form.
#[derive(Debug, Clone, Default)]
pub struct TelemetryEncoder {
    configs: Arc<TelemetryConfigSet>,
}

impl TelemetryEncoder {
    /// Creates an encoder.
    pub fn new(configs: Arc<TelemetryConfigSet>) -> Self {
        Self { configs }
    }

    /// Encodes one record as compact JSON bytes.
    pub fn encode(&self, record: &MessageRecord) -> CoreResult<Vec<u8>> {
        let json = self.configs.for_endpoint(&record.endpoint_url).to_json(record);
        Ok(serde_json::to_vec(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_record() -> MessageRecord {
        let mut record = MessageRecord::new("opc.tcp://plc-01:4840");
        record.node_id = Some("ns=2;s=Line1.Temperature".into());
        record.application_uri = Some("urn:plc-01".into());
        record.display_name = Some("Temperature".into());
        record.value = Some("21.5".into());
        record.source_timestamp = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        record.status_code = Some(0);
        record.status = Some("Good".into());
        record
    }

    #[test]
    fn test_pattern_concatenates_groups() {
        let pattern = FieldPattern::new(r"ns=(\d+);s=(\w+)\.").unwrap();
        assert_eq!(pattern.apply("ns=2;s=Line1.Temperature"), "2Line1");
    }

    #[test]
    fn test_pattern_without_groups_uses_match() {
        let pattern = FieldPattern::new(r"Line\d").unwrap();
        assert_eq!(pattern.apply("ns=2;s=Line1.Temperature"), "Line1");
    }

    #[test]
    fn test_pattern_no_match_keeps_input() {
        let pattern = FieldPattern::new(r"^urn:(.*)$").unwrap();
        assert_eq!(pattern.apply("opc.tcp://x"), "opc.tcp://x");
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            FieldPattern::new("(unclosed"),
            Err(CoreError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_nested_layout() {
        let json = TelemetryConfig::default().to_json(&sample_record());

        assert_eq!(json["NodeId"], "ns=2;s=Line1.Temperature");
        assert_eq!(json["ApplicationUri"], "urn:plc-01");
        assert_eq!(json["Value"]["Value"], 21.5);
        assert_eq!(json["Value"]["SourceTimestamp"], "2024-01-02T03:04:05Z");
        // Disabled by default
        assert!(json.get("EndpointUrl").is_none());
        assert!(json["Value"].get("StatusCode").is_none());
    }

    #[test]
    fn test_flattened_layout_with_renames() {
        let config = TelemetryConfig {
            flatten: true,
            value: TelemetryField::default().with_name("v"),
            status_code: TelemetryField::published(true),
            endpoint_url: TelemetryField::published(true),
            ..TelemetryConfig::default()
        };
        let json = config.to_json(&sample_record());

        assert_eq!(json["v"], 21.5);
        assert_eq!(json["StatusCode"], 0);
        assert_eq!(json["EndpointUrl"], "opc.tcp://plc-01:4840");
        assert!(json.get("Value").is_none());
    }

    #[test]
    fn test_apply_patterns() {
        let config = TelemetryConfig {
            display_name: TelemetryField::default()
                .with_pattern(FieldPattern::new(r"^(\w{4})").unwrap()),
            ..TelemetryConfig::default()
        };
        let mut record = sample_record();
        config.apply_patterns(&mut record);
        assert_eq!(record.display_name.as_deref(), Some("Temp"));
        assert_eq!(record.node_id.as_deref(), Some("ns=2;s=Line1.Temperature"));
    }

    #[test]
    fn test_endpoint_override() {
        let flat = TelemetryConfig {
            flatten: true,
            ..TelemetryConfig::default()
        };
        let set = TelemetryConfigSet::default().with_endpoint("opc.tcp://plc-01:4840", flat);

        assert!(set.for_endpoint("opc.tcp://plc-01:4840").flatten);
        assert!(!set.for_endpoint("opc.tcp://other:4840").flatten);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "flatten": true,
            "display_name": { "pattern": "^(\\w+)" },
            "endpoints": { "opc.tcp://a:4840": { "status": { "publish": true } } }
        }"#;
        let set: TelemetryConfigSet = serde_json::from_str(json).unwrap();

        assert!(set.default.flatten);
        assert!(set.default.publishes(FieldKind::DisplayName));
        assert_eq!(set.default.name(FieldKind::DisplayName), "DisplayName");
        assert!(set.default.display_name.pattern.is_some());
        assert!(set.for_endpoint("opc.tcp://a:4840").publishes(FieldKind::Status));
    }

    #[test]
    fn test_encoder_bytes() {
        let encoder = TelemetryEncoder::default();
        let bytes = encoder.encode(&sample_record()).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["DisplayName"], "Temperature");
    }
}
