// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Outbound message records.
//!
//! A [`MessageRecord`] is produced for every forwarded value change and for
//! every heartbeat re-send. Records are handed to a [`RecordSink`] which must
//! never block the producer: the OPC UA notification path calls it
//! synchronously from protocol callbacks.

use chrono::{DateTime, SecondsFormat, Utc};

// =============================================================================
// MessageRecord
// =============================================================================

/// One outbound telemetry record.
///
/// Only the fields enabled by the endpoint's telemetry configuration are
/// populated. `endpoint_url` is always set because it selects the telemetry
/// configuration used at encoding time; whether it is emitted depends on the
/// configuration as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Endpoint URL of the server that produced the value.
    pub endpoint_url: String,

    /// Point identifier in the form it was configured with.
    pub node_id: Option<String>,

    /// Point identifier in URI-qualified (`nsu=`) form, when known.
    pub expanded_node_id: Option<String>,

    /// Application URI of the server.
    pub application_uri: Option<String>,

    /// Display name of the point.
    pub display_name: Option<String>,

    /// Canonical text encoding of the value.
    pub value: Option<String>,

    /// `true` if `value` must be emitted as a JSON string.
    ///
    /// String-like scalars keep their quotes, numbers, booleans and arrays
    /// are emitted as raw JSON.
    pub preserve_value_quotes: bool,

    /// Source timestamp of the value.
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Numeric OPC UA status code.
    pub status_code: Option<u32>,

    /// Symbolic status text.
    pub status: Option<String>,
}

impl MessageRecord {
    /// Creates an empty record for an endpoint.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            node_id: None,
            expanded_node_id: None,
            application_uri: None,
            display_name: None,
            value: None,
            preserve_value_quotes: false,
            source_timestamp: None,
            status_code: None,
            status: None,
        }
    }

    /// Returns the source timestamp formatted as ISO-8601, if present.
    pub fn source_timestamp_text(&self) -> Option<String> {
        self.source_timestamp.map(format_timestamp)
    }

    /// Returns the value as a JSON value honouring the quote flag.
    ///
    /// Text that is not valid JSON is emitted as a string rather than dropped.
    pub fn value_json(&self) -> Option<serde_json::Value> {
        let text = self.value.as_ref()?;
        if self.preserve_value_quotes {
            return Some(serde_json::Value::String(text.clone()));
        }
        Some(
            serde_json::from_str(text)
                .unwrap_or_else(|_| serde_json::Value::String(text.clone())),
        )
    }
}

/// Formats a timestamp the way records carry it on the wire.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// =============================================================================
// RecordSink
// =============================================================================

/// Destination for outbound records.
///
/// Implementations must return immediately. A `false` return means the record
/// was dropped (for example because a bounded queue is full); the sink is
/// responsible for counting the drop.
pub trait RecordSink: Send + Sync {
    /// Offers a record to the sink.
    fn enqueue(&self, record: MessageRecord) -> bool;
}

impl<T: RecordSink + ?Sized> RecordSink for std::sync::Arc<T> {
    fn enqueue(&self, record: MessageRecord) -> bool {
        (**self).enqueue(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_value_json_raw_number() {
        let mut record = MessageRecord::new("opc.tcp://localhost:4840");
        record.value = Some("42.5".into());
        assert_eq!(record.value_json(), Some(serde_json::json!(42.5)));
    }

    #[test]
    fn test_value_json_preserves_quotes() {
        let mut record = MessageRecord::new("opc.tcp://localhost:4840");
        record.value = Some("42".into());
        record.preserve_value_quotes = true;
        assert_eq!(record.value_json(), Some(serde_json::json!("42")));
    }

    #[test]
    fn test_value_json_array() {
        let mut record = MessageRecord::new("opc.tcp://localhost:4840");
        record.value = Some("[1,2,3]".into());
        assert_eq!(record.value_json(), Some(serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn test_value_json_falls_back_to_string() {
        let mut record = MessageRecord::new("opc.tcp://localhost:4840");
        record.value = Some("not json".into());
        assert_eq!(record.value_json(), Some(serde_json::json!("not json")));
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(ts), "2024-05-01T12:30:00Z");

        let ts = ts + chrono::Duration::milliseconds(250);
        assert_eq!(format_timestamp(ts), "2024-05-01T12:30:00.250Z");
    }
}
