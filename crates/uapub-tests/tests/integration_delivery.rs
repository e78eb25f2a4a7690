// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Delivery Integration Tests
//!
//! Runs the delivery queue and the batcher against a recording transport.
//!
//! ## Test Categories
//!
//! - Immediate sends and interval batching
//! - Frame size limits and oversize records
//! - Queue overflow
//! - Send failures and drain on shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use uapub_buffer::{Batcher, BatcherConfig, DeliveryQueue, FRAME_ENVELOPE};
use uapub_core::{RecordSink, TelemetryEncoder};
use uapub_tests::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

struct Pipeline {
    queue: Arc<DeliveryQueue>,
    transport: Arc<RecordingTransport>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Pipeline {
    fn start(capacity: usize, config: BatcherConfig) -> Self {
        Self::with_transport(capacity, config, RecordingTransport::new())
    }

    fn with_transport(capacity: usize, config: BatcherConfig, transport: Arc<RecordingTransport>) -> Self {
        let queue = Arc::new(DeliveryQueue::new(capacity).unwrap());
        let cancel = CancellationToken::new();
        let batcher = Batcher::new(
            queue.clone(),
            transport.clone(),
            TelemetryEncoder::default(),
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

    async fn stop(self) -> (Arc<DeliveryQueue>, Arc<RecordingTransport>) {
        self.cancel.cancel();
        self.handle.await.unwrap();
        (self.queue, self.transport)
    }
}

fn immediate() -> BatcherConfig {
    BatcherConfig::builder()
        .send_interval(Duration::ZERO)
        .max_frame_size(0)
        .build()
}

// =============================================================================
// Send Modes
// =============================================================================

#[tokio::test]
async fn test_delivery_immediate_single_record_frames() {
    init_test_logging();
    let pipeline = Pipeline::start(1024, immediate());

    for record in records(3) {
        assert!(pipeline.queue.enqueue(record));
    }
    assert!(pipeline.transport.wait_for_frames(3, WAIT).await);

    let frames = pipeline.transport.decoded_frames();
    assert!(frames.iter().all(|f| f.len() == 1));
    assert_eq!(frames[0][0]["NodeId"], "ns=2;s=Tag0");
    assert_eq!(frames[2][0]["Value"]["Value"], 2);
    assert_eq!(frames[0][0]["Value"]["SourceTimestamp"], "2025-01-01T00:00:00Z");

    let (queue, _) = pipeline.stop().await;
    let stats = queue.stats();
    assert_eq!(stats.frames_sent, 3);
    assert_records_balanced(&stats);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_interval_batches_records() {
    let config = BatcherConfig::builder()
        .send_interval(Duration::from_secs(10))
        .max_frame_size(0)
        .build();
    let pipeline = Pipeline::start(1024, config);

    for record in records(5) {
        pipeline.queue.enqueue(record);
    }
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pipeline.transport.frame_count(), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(pipeline.transport.frame_count(), 1);
    assert_eq!(pipeline.transport.decoded_frames()[0].len(), 5);

    // An empty interval sends nothing.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(pipeline.transport.frame_count(), 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_delivery_drains_on_shutdown() {
    let config = BatcherConfig::builder()
        .send_interval(Duration::from_secs(60))
        .build();
    let pipeline = Pipeline::start(1024, config);

    for record in records(3) {
        pipeline.queue.enqueue(record);
    }
    let (queue, transport) = pipeline.stop().await;

    assert_eq!(transport.frame_count(), 1);
    assert_eq!(transport.record_count(), 3);
    assert!(transport.is_closed());
    assert!(queue.is_closed());
    assert!(!queue.enqueue(record("ns=2;s=Late", "1")));

    let stats = queue.stats();
    assert_eq!(stats.queued, 0);
    assert_records_balanced(&stats);
}

// =============================================================================
// Frame Size
// =============================================================================

#[tokio::test]
async fn test_delivery_frames_respect_max_size() {
    let max_frame_size = 300;
    let config = BatcherConfig::builder()
        .send_interval(Duration::from_secs(60))
        .max_frame_size(max_frame_size)
        .build();
    let pipeline = Pipeline::start(1024, config);

    for record in records(20) {
        pipeline.queue.enqueue(record);
    }
    pipeline.queue.enqueue(large_record(1000));
    let (queue, transport) = pipeline.stop().await;

    let frames = transport.frames();
    assert!(frames.len() > 1);
    assert!(frames.iter().all(|f| f.len() <= max_frame_size));
    assert_eq!(transport.record_count(), 20);

    let stats = queue.stats();
    assert_eq!(stats.oversize_drops, 1);
    assert_records_balanced(&stats);
}

#[tokio::test]
async fn test_delivery_budget_accounts_for_protocol_overhead() {
    let transport = RecordingTransport::with_overhead(64);
    let config = BatcherConfig::builder().max_frame_size(64 + FRAME_ENVELOPE).build();
    let queue = Arc::new(DeliveryQueue::new(16).unwrap());

    let result = Batcher::new(
        queue.clone(),
        transport.clone(),
        TelemetryEncoder::default(),
        config,
        CancellationToken::new(),
    );
    assert!(result.is_err());

    let config = BatcherConfig::builder().max_frame_size(1024).build();
    let batcher = Batcher::new(queue, transport, TelemetryEncoder::default(), config, CancellationToken::new())
        .unwrap();
    assert_eq!(batcher.budget(), Some(1024 - 64 - FRAME_ENVELOPE));
}

// =============================================================================
// Overflow and Failures
// =============================================================================

#[tokio::test]
async fn test_delivery_overflow_drops_new_records() {
    let queue = DeliveryQueue::new(4).unwrap();

    let accepted = records(6).into_iter().filter(|r| queue.enqueue(r.clone())).count();

    assert_eq!(accepted, 4);
    assert_eq!(queue.len(), 4);
    let stats = queue.stats();
    assert_eq!(stats.overflow_drops, 2);
    assert_eq!(stats.enqueued, 4);
    assert!(stats.drop_ratio() > 0.3);
}

#[tokio::test]
async fn test_delivery_send_failure_drops_frame() {
    let pipeline = Pipeline::start(1024, immediate());
    pipeline.transport.set_failing(true);

    pipeline.queue.enqueue(record("ns=2;s=A", "1"));
    pipeline.queue.enqueue(record("ns=2;s=B", "2"));
    let queue = pipeline.queue.clone();
    assert!(eventually(WAIT, || {
        let queue = queue.clone();
        async move { queue.stats().send_failures == 2 }
    })
    .await);
    assert_eq!(pipeline.transport.frame_count(), 0);

    // Failed frames are not retried once the transport recovers.
    pipeline.transport.set_failing(false);
    pipeline.queue.enqueue(record("ns=2;s=C", "3"));
    assert!(pipeline.transport.wait_for_frames(1, WAIT).await);

    let (queue, transport) = pipeline.stop().await;
    assert_eq!(transport.attempts(), 3);
    assert_eq!(transport.decoded_frames()[0][0]["NodeId"], "ns=2;s=C");
    let stats = queue.stats();
    assert_eq!(stats.records_failed, 2);
    assert_eq!(stats.records_sent, 1);
    assert_records_balanced(&stats);
}
