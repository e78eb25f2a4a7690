// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The batching sender.
//!
//! A single task drains the [`DeliveryQueue`], serializes each record and
//! packs the results into JSON-array frames bounded by the transport's
//! maximum message size.
//!
//! # Flush Policy
//!
//! ```text
//!  send_interval  max_frame_size   behaviour
//!  ─────────────  ──────────────   ──────────────────────────────────────
//!  0              0                every record is its own frame, at once
//!  0              N                frame sent when the next record would
//!                                  not fit
//!  T              0                everything buffered sent every T
//!  T              N                sent every T, or earlier when full
//! ```
//!
//! On cancellation the queue is closed, the remaining records are packed
//! and sent, and the task exits.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use uapub_core::{MessageRecord, TelemetryEncoder};

use crate::error::{BufferError, BufferResult};
use crate::queue::{DeliveryQueue, Dequeue};
use crate::stats::{DeliveryStats, DeliveryStatsInner};
use crate::traits::{Frame, FrameBuilder, TelemetryTransport, FRAME_ENVELOPE};

// =============================================================================
// Configuration
// =============================================================================

/// Batching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Fixed flush interval. Zero disables interval flushing.
    #[serde(default, with = "duration_millis")]
    pub send_interval: Duration,

    /// Maximum transport message size in bytes. Zero means unbounded.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_max_frame_size() -> usize {
    256 * 1024
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_secs(10),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl BatcherConfig {
    /// Creates a builder.
    pub fn builder() -> BatcherConfigBuilder {
        BatcherConfigBuilder::default()
    }

    /// Returns `true` if every record must be sent on its own, immediately.
    pub fn sends_individually(&self) -> bool {
        self.send_interval.is_zero() && self.max_frame_size == 0
    }

    /// Bytes available for records inside one frame, given the transport
    /// overhead. `None` if frames are unbounded.
    pub fn frame_budget(&self, protocol_overhead: usize) -> BufferResult<Option<usize>> {
        if self.max_frame_size == 0 {
            return Ok(None);
        }
        let reserved = protocol_overhead + FRAME_ENVELOPE;
        if self.max_frame_size <= reserved {
            return Err(BufferError::invalid_config(format!(
                "max_frame_size {} leaves no room after {} bytes of framing overhead",
                self.max_frame_size, reserved
            )));
        }
        Ok(Some(self.max_frame_size - reserved))
    }
}

/// Builder for [`BatcherConfig`].
#[derive(Debug, Default)]
pub struct BatcherConfigBuilder {
    config: BatcherConfig,
}

impl BatcherConfigBuilder {
    /// Sets the flush interval.
    pub fn send_interval(mut self, interval: Duration) -> Self {
        self.config.send_interval = interval;
        self
    }

    /// Sets the maximum frame size.
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> BatcherConfig {
        self.config
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

// =============================================================================
// Batcher
// =============================================================================

/// Consumer loop between the delivery queue and the transport.
pub struct Batcher {
    queue: Arc<DeliveryQueue>,
    transport: Arc<dyn TelemetryTransport>,
    encoder: TelemetryEncoder,
    config: BatcherConfig,
    budget: Option<usize>,
    stats: Arc<DeliveryStatsInner>,
    cancel: CancellationToken,
}

impl Batcher {
    /// Creates a batcher.
    ///
    /// Fails if the frame size leaves no room for records.
    pub fn new(
        queue: Arc<DeliveryQueue>,
        transport: Arc<dyn TelemetryTransport>,
        encoder: TelemetryEncoder,
        config: BatcherConfig,
        cancel: CancellationToken,
    ) -> BufferResult<Self> {
        let budget = config.frame_budget(transport.protocol_overhead())?;
        let stats = Arc::clone(queue.stats_handle());
        Ok(Self {
            queue,
            transport,
            encoder,
            config,
            budget,
            stats,
            cancel,
        })
    }

    /// Usable payload per frame, if bounded.
    pub fn budget(&self) -> Option<usize> {
        self.budget
    }

    /// Snapshot of the delivery statistics.
    pub fn stats(&self) -> DeliveryStats {
        self.queue.stats()
    }

    /// Spawns the loop on the current runtime.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until cancelled and drained, or until the queue is closed.
    pub async fn run(self) {
        let interval = (!self.config.send_interval.is_zero()).then_some(self.config.send_interval);
        info!(
            transport = self.transport.name(),
            send_interval_ms = self.config.send_interval.as_millis() as u64,
            max_frame_size = self.config.max_frame_size,
            "Batcher started"
        );

        let mut frame = FrameBuilder::new(self.budget);
        let mut next_flush = interval.map(|i| Instant::now() + i);
        let mut draining = false;

        loop {
            let bound = if draining {
                Some(Duration::ZERO)
            } else {
                match (next_flush, interval) {
                    (Some(deadline), Some(interval)) => {
                        let now = Instant::now();
                        if deadline <= now {
                            self.stats.record_missed_interval();
                            self.flush(&mut frame).await;
                            next_flush = Some(now + interval);
                            continue;
                        }
                        Some(deadline - now)
                    }
                    _ => None,
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if !draining => {
                    draining = true;
                    self.queue.close();
                    debug!(remaining = self.queue.len(), "Batcher draining");
                    continue;
                }
                outcome = self.queue.dequeue(bound) => outcome,
            };

            match outcome {
                Dequeue::Record(record) => self.accept(record, &mut frame).await,
                Dequeue::Empty if draining => break,
                Dequeue::Empty => {
                    if let Some(interval) = interval {
                        self.flush(&mut frame).await;
                        next_flush = Some(Instant::now() + interval);
                    }
                }
                Dequeue::Closed => break,
            }
        }

        self.flush(&mut frame).await;
        self.transport.close().await;

        let stats = self.queue.stats();
        info!(
            frames_sent = stats.frames_sent,
            records_sent = stats.records_sent,
            send_failures = stats.send_failures,
            "Batcher stopped"
        );
    }

    async fn accept(&self, record: MessageRecord, frame: &mut FrameBuilder) {
        let encoded = match self.encoder.encode(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.stats.record_encode_failure();
                warn!(endpoint = %record.endpoint_url, error = %e, "Record dropped, encoding failed");
                return;
            }
        };

        if self.config.sends_individually() {
            self.send(Frame::single(&encoded)).await;
            return;
        }

        if let Some(budget) = self.budget {
            if encoded.len() > budget {
                self.stats.record_oversize();
                warn!(
                    endpoint = %record.endpoint_url,
                    node_id = record.node_id.as_deref().unwrap_or_default(),
                    error = %BufferError::Oversize { size: encoded.len(), budget },
                    "Record dropped"
                );
                return;
            }
        }

        if !frame.fits(encoded.len()) {
            self.flush(frame).await;
        }
        frame.push(&encoded);
    }

    async fn flush(&self, frame: &mut FrameBuilder) {
        if frame.is_empty() {
            return;
        }
        self.send(frame.finish()).await;
    }

    async fn send(&self, frame: Frame) {
        let records = frame.records() as u64;
        let bytes = frame.len() as u64;
        let started = Instant::now();

        match self.transport.send(frame).await {
            Ok(()) => {
                self.stats.record_sent(records, bytes, started.elapsed());
                trace!(transport = self.transport.name(), records, bytes, "Frame sent");
            }
            Err(e) => {
                self.stats.record_send_failure(records);
                warn!(
                    transport = self.transport.name(),
                    records,
                    error = %e,
                    "Frame dropped after send failure"
                );
            }
        }
    }
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .field("budget", &self.budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uapub_core::{RecordSink, TelemetryConfig, TelemetryConfigSet};

    #[derive(Default)]
    struct RecordingTransport {
        frames: Mutex<Vec<Frame>>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl TelemetryTransport for RecordingTransport {
        async fn send(&self, frame: Frame) -> Result<(), TransportError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::publish(frame.len(), "broker unavailable"));
            }
            self.frames.lock().push(frame);
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    impl RecordingTransport {
        fn record_counts(&self) -> Vec<usize> {
            self.frames.lock().iter().map(Frame::records).collect()
        }
    }

    fn encoder() -> TelemetryEncoder {
        TelemetryEncoder::new(Arc::new(TelemetryConfigSet::new(TelemetryConfig::default())))
    }

    fn record(i: usize) -> MessageRecord {
        let mut record = MessageRecord::new("opc.tcp://plc:4840");
        record.node_id = Some(format!("ns=2;s=Point{i:03}"));
        record.value = Some("1".into());
        record
    }

    fn encoded_len() -> usize {
        encoder().encode(&record(0)).unwrap().len()
    }

    struct Harness {
        queue: Arc<DeliveryQueue>,
        transport: Arc<RecordingTransport>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn start(config: BatcherConfig) -> Self {
            let queue = Arc::new(DeliveryQueue::new(1024).unwrap());
            let transport = Arc::new(RecordingTransport::default());
            let cancel = CancellationToken::new();
            let batcher = Batcher::new(
                Arc::clone(&queue),
                transport.clone(),
                encoder(),
                config,
                cancel.clone(),
            )
            .unwrap();
            Self {
                queue,
                transport,
                cancel,
                handle: batcher.start(),
            }
        }

        async fn stop(self) -> (Arc<RecordingTransport>, DeliveryStats) {
            self.cancel.cancel();
            self.handle.await.unwrap();
            let stats = self.queue.stats();
            (self.transport, stats)
        }
    }

    #[test]
    fn test_frame_budget() {
        let config = BatcherConfig::builder().max_frame_size(100).build();
        assert_eq!(config.frame_budget(10).unwrap(), Some(88));
        assert!(config.frame_budget(98).is_err());
        assert_eq!(BatcherConfig::builder().max_frame_size(0).build().frame_budget(10).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_individual_sends() {
        let harness = Harness::start(
            BatcherConfig::builder()
                .send_interval(Duration::ZERO)
                .max_frame_size(0)
                .build(),
        );
        for i in 0..3 {
            harness.queue.enqueue(record(i));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.transport.record_counts(), vec![1, 1, 1]);

        let (_, stats) = harness.stop().await;
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.records_sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_batches_records() {
        let harness = Harness::start(
            BatcherConfig::builder()
                .send_interval(Duration::from_secs(1))
                .max_frame_size(0)
                .build(),
        );
        for i in 0..3 {
            harness.queue.enqueue(record(i));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(harness.transport.record_counts().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(harness.transport.record_counts(), vec![3]);

        let (transport, stats) = harness.stop().await;
        let payload: serde_json::Value = serde_json::from_slice(transport.frames.lock()[0].payload()).unwrap();
        assert_eq!(payload.as_array().unwrap().len(), 3);
        assert_eq!(stats.missed_intervals, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_size_bound() {
        let size = encoded_len();
        let max_frame_size = 2 * size + 1 + FRAME_ENVELOPE;
        let harness = Harness::start(
            BatcherConfig::builder()
                .send_interval(Duration::ZERO)
                .max_frame_size(max_frame_size)
                .build(),
        );
        for i in 0..5 {
            harness.queue.enqueue(record(i));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.transport.record_counts(), vec![2, 2]);

        let (transport, _) = harness.stop().await;
        assert_eq!(transport.record_counts(), vec![2, 2, 1]);
        assert!(transport.frames.lock().iter().all(|f| f.len() <= max_frame_size));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversize_record_dropped() {
        let harness = Harness::start(
            BatcherConfig::builder()
                .send_interval(Duration::from_secs(1))
                .max_frame_size(encoded_len() + FRAME_ENVELOPE)
                .build(),
        );
        let mut large = record(1);
        large.value = Some("12345678901234567890".into());
        harness.queue.enqueue(large);
        harness.queue.enqueue(record(2));

        let (transport, stats) = harness.stop().await;
        assert_eq!(stats.oversize_drops, 1);
        assert_eq!(transport.record_counts(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_counted_not_retried() {
        let harness = Harness::start(BatcherConfig::builder().send_interval(Duration::from_secs(1)).build());
        harness.transport.failing.store(true, Ordering::SeqCst);
        harness.queue.enqueue(record(1));
        harness.queue.enqueue(record(2));
        tokio::time::sleep(Duration::from_millis(1100)).await;

        harness.transport.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let (transport, stats) = harness.stop().await;
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.records_failed, 2);
        assert!(transport.record_counts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drains_buffered_records() {
        let harness = Harness::start(BatcherConfig::builder().send_interval(Duration::from_secs(60)).build());
        for i in 0..4 {
            harness.queue.enqueue(record(i));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(harness.transport.record_counts().is_empty());

        let queue = Arc::clone(&harness.queue);
        let (transport, stats) = harness.stop().await;
        assert_eq!(transport.record_counts(), vec![4]);
        assert_eq!(stats.queued, 0);
        assert!(!queue.enqueue(record(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_intervals_send_nothing() {
        let harness = Harness::start(BatcherConfig::builder().send_interval(Duration::from_secs(1)).build());
        tokio::time::sleep(Duration::from_secs(5)).await;

        let (transport, stats) = harness.stop().await;
        assert!(transport.record_counts().is_empty());
        assert_eq!(stats.missed_intervals, 0);
    }
}
