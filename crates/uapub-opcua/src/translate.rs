// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Translation of value changes into outbound records.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use uapub_core::{FieldKind, MessageRecord, RecordSink, TelemetryConfigSet};

use crate::client::DataChange;
use crate::point::PointRuntime;
use crate::types::StatusCode;

/// Outcome of translating one value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// The record was offered to the sink.
    Forwarded,
    /// The sink rejected the record.
    Rejected,
    /// The value was null.
    NullValue,
    /// The status code is suppressed.
    Suppressed,
    /// The first notification after registration was skipped.
    Skipped,
}

/// Converts value changes of one session into records.
pub struct NotificationTranslator {
    endpoint_url: String,
    telemetry: Arc<TelemetryConfigSet>,
    suppressed: Arc<HashSet<StatusCode>>,
    sink: Arc<dyn RecordSink>,
}

impl NotificationTranslator {
    /// Creates a translator.
    pub fn new(
        endpoint_url: impl Into<String>,
        telemetry: Arc<TelemetryConfigSet>,
        suppressed: Arc<HashSet<StatusCode>>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            telemetry,
            suppressed,
            sink,
        }
    }

    /// Translates one value change of `point` and forwards the result.
    pub fn translate(&self, point: &PointRuntime, change: DataChange) -> Translation {
        let Some(value) = change.value.as_ref() else {
            debug!(endpoint = %self.endpoint_url, node_id = %point.original_id(), "Dropping null value");
            return Translation::NullValue;
        };
        if self.suppressed.contains(&change.status) {
            debug!(
                endpoint = %self.endpoint_url,
                node_id = %point.original_id(),
                status = %change.status,
                "Dropping notification with suppressed status"
            );
            return Translation::Suppressed;
        }

        let config = self.telemetry.for_endpoint(&self.endpoint_url);
        let mut record = MessageRecord::new(self.endpoint_url.clone());

        if config.publishes(FieldKind::NodeId) {
            record.node_id = Some(point.original_id().to_string());
        }
        if config.publishes(FieldKind::ExpandedNodeId) {
            record.expanded_node_id = point.expanded_id();
        }
        if config.publishes(FieldKind::ApplicationUri) {
            record.application_uri = point.application_uri();
        }
        if config.publishes(FieldKind::DisplayName) {
            record.display_name = point.display_name();
        }
        if config.publishes(FieldKind::Value) {
            let encoded = value.encode();
            record.value = Some(encoded.text);
            record.preserve_value_quotes = encoded.preserve_quotes;
        }
        if config.publishes(FieldKind::SourceTimestamp) {
            record.source_timestamp = change.source_timestamp;
        }
        if config.publishes(FieldKind::StatusCode) {
            record.status_code = Some(change.status.0);
        }
        if config.publishes(FieldKind::Status) {
            record.status = Some(change.status.symbolic());
        }
        config.apply_patterns(&mut record);

        point.heartbeat().update(&record);

        if point.take_skip() {
            debug!(endpoint = %self.endpoint_url, node_id = %point.original_id(), "Skipping first notification");
            return Translation::Skipped;
        }

        if self.sink.enqueue(record) {
            Translation::Forwarded
        } else {
            Translation::Rejected
        }
    }
}

impl std::fmt::Debug for NotificationTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationTranslator")
            .field("endpoint_url", &self.endpoint_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::runtime::Handle;
    use tokio_util::sync::CancellationToken;
    use uapub_core::{FieldPattern, TelemetryConfig, TelemetryField};

    use crate::client::{CreatedMonitoredItem, UaValue};
    use crate::heartbeat::Heartbeat;
    use crate::point::{MonitoredPoint, PointRequest};
    use crate::types::{NamespaceTable, NodeId};

    #[derive(Default)]
    struct Collect(Mutex<Vec<MessageRecord>>);

    impl RecordSink for Collect {
        fn enqueue(&self, record: MessageRecord) -> bool {
            self.0.lock().push(record);
            true
        }
    }

    fn runtime(sink: Arc<Collect>, skip_first: bool) -> Arc<PointRuntime> {
        let heartbeat = Heartbeat::new(
            "ns=2;s=Temp",
            Duration::ZERO,
            sink,
            Handle::current(),
            CancellationToken::new(),
        );
        Arc::new(PointRuntime::new(
            "opc.tcp://plc:4840",
            "ns=2;s=Temp",
            Some("Temp".into()),
            skip_first,
            heartbeat,
        ))
    }

    fn translator(sink: Arc<Collect>, telemetry: TelemetryConfigSet) -> NotificationTranslator {
        NotificationTranslator::new(
            "opc.tcp://plc:4840",
            Arc::new(telemetry),
            Arc::new(crate::context::default_suppressed_status_codes()),
            sink,
        )
    }

    #[tokio::test]
    async fn test_forwards_enabled_fields() {
        let sink = Arc::new(Collect::default());
        let t = translator(sink.clone(), TelemetryConfigSet::default());
        let point = runtime(sink.clone(), false);

        let outcome = t.translate(&point, DataChange::new(1, UaValue::Double(21.5)));
        assert_eq!(outcome, Translation::Forwarded);

        let records = sink.0.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].node_id.as_deref(), Some("ns=2;s=Temp"));
        assert_eq!(records[0].display_name.as_deref(), Some("Temp"));
        assert_eq!(records[0].value.as_deref(), Some("21.5"));
        assert!(records[0].status.is_none());
    }

    #[tokio::test]
    async fn test_drops_null_and_suppressed() {
        let sink = Arc::new(Collect::default());
        let t = translator(sink.clone(), TelemetryConfigSet::default());
        let point = runtime(sink.clone(), false);

        let mut change = DataChange::new(1, UaValue::Int32(1));
        change.value = None;
        assert_eq!(t.translate(&point, change), Translation::NullValue);

        let mut change = DataChange::new(1, UaValue::Int32(1));
        change.status = StatusCode::BAD_NO_COMMUNICATION;
        assert_eq!(t.translate(&point, change), Translation::Suppressed);

        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_skip_first_after_registration() {
        let sink = Arc::new(Collect::default());
        let t = translator(sink.clone(), TelemetryConfigSet::default());
        let rt = runtime(sink.clone(), true);
        let mut point = MonitoredPoint::new(PointRequest::parse("ns=2;s=Temp").unwrap(), 1, rt.clone());
        point.mark_registered(
            NodeId::string(2, "Temp"),
            CreatedMonitoredItem {
                monitored_item_id: 1,
                revised_sampling_interval: Duration::from_secs(1),
            },
            &NamespaceTable::default(),
            None,
        );

        assert_eq!(t.translate(&rt, DataChange::new(1, UaValue::Int32(1))), Translation::Skipped);
        assert_eq!(t.translate(&rt, DataChange::new(1, UaValue::Int32(2))), Translation::Forwarded);
        assert_eq!(t.translate(&rt, DataChange::new(1, UaValue::Int32(3))), Translation::Forwarded);
        assert_eq!(sink.0.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_patterns_and_status_fields() {
        let sink = Arc::new(Collect::default());
        let mut config = TelemetryConfig::default();
        config.node_id = TelemetryField::published(true)
            .with_pattern(FieldPattern::new(";s=(.*)$").unwrap());
        config.status = TelemetryField::published(true);
        let t = translator(sink.clone(), TelemetryConfigSet::new(config));
        let point = runtime(sink.clone(), false);

        let mut change = DataChange::new(1, UaValue::String("on".into()));
        change.status = StatusCode::UNCERTAIN;
        t.translate(&point, change);

        let records = sink.0.lock();
        assert_eq!(records[0].node_id.as_deref(), Some("Temp"));
        assert_eq!(records[0].status.as_deref(), Some("Uncertain"));
        assert!(records[0].preserve_value_quotes);
    }
}
