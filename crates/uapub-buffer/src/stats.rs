// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Delivery statistics.
//!
//! Counters are plain atomics so that the notification path, which enqueues
//! from protocol callbacks, never contends with the batcher or with the
//! structural locks of the OPC UA side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// DeliveryStatsInner
// =============================================================================

/// Live delivery counters.
#[derive(Debug)]
pub struct DeliveryStatsInner {
    /// Records accepted by the queue.
    pub enqueued: AtomicU64,
    /// Records taken by the batcher.
    pub dequeued: AtomicU64,
    /// Records dropped because the queue was full.
    pub overflow_drops: AtomicU64,
    /// Records dropped because they did not fit into a frame.
    pub oversize_drops: AtomicU64,
    /// Records dropped because they could not be serialized.
    pub encode_failures: AtomicU64,
    /// Frames accepted by the transport.
    pub frames_sent: AtomicU64,
    /// Records inside accepted frames.
    pub records_sent: AtomicU64,
    /// Payload bytes inside accepted frames.
    pub bytes_sent: AtomicU64,
    /// Frames rejected by the transport.
    pub send_failures: AtomicU64,
    /// Records inside rejected frames.
    pub records_failed: AtomicU64,
    /// Flush boundaries that were already due when the batcher looked.
    pub missed_intervals: AtomicU64,
    latency_min_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_total_us: AtomicU64,
}

impl Default for DeliveryStatsInner {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryStatsInner {
    /// Creates statistics with all counters at zero.
    pub fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            overflow_drops: AtomicU64::new(0),
            oversize_drops: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            records_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            missed_intervals: AtomicU64::new(0),
            latency_min_us: AtomicU64::new(u64::MAX),
            latency_max_us: AtomicU64::new(0),
            latency_total_us: AtomicU64::new(0),
        }
    }

    /// Records an accepted enqueue.
    #[inline]
    pub fn record_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dequeue.
    #[inline]
    pub fn record_dequeue(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an overflow drop and returns the running drop count.
    #[inline]
    pub fn record_overflow(&self) -> u64 {
        self.overflow_drops.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records an oversize drop.
    #[inline]
    pub fn record_oversize(&self) {
        self.oversize_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a serialization failure.
    #[inline]
    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a flush boundary that was already due.
    #[inline]
    pub fn record_missed_interval(&self) {
        self.missed_intervals.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a frame accepted by the transport.
    pub fn record_sent(&self, records: u64, bytes: u64, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.records_sent.fetch_add(records, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.latency_total_us.fetch_add(micros, Ordering::Relaxed);
        self.latency_min_us.fetch_min(micros, Ordering::Relaxed);
        self.latency_max_us.fetch_max(micros, Ordering::Relaxed);
    }

    /// Records a frame rejected by the transport.
    pub fn record_send_failure(&self, records: u64) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
        self.records_failed.fetch_add(records, Ordering::Relaxed);
    }

    /// Takes a consistent-enough copy of the counters.
    pub fn snapshot(&self, queued: usize) -> DeliveryStats {
        let frames_sent = self.frames_sent.load(Ordering::Relaxed);
        let total = self.latency_total_us.load(Ordering::Relaxed);
        let min = self.latency_min_us.load(Ordering::Relaxed);

        DeliveryStats {
            queued,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            oversize_drops: self.oversize_drops.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            frames_sent,
            records_sent: self.records_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            missed_intervals: self.missed_intervals.load(Ordering::Relaxed),
            latency_min_us: if frames_sent == 0 { 0 } else { min },
            latency_avg_us: total.checked_div(frames_sent).unwrap_or(0),
            latency_max_us: self.latency_max_us.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// DeliveryStats
// =============================================================================

/// Snapshot of the delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Records currently waiting in the queue.
    pub queued: usize,
    /// Records accepted by the queue.
    pub enqueued: u64,
    /// Records taken by the batcher.
    pub dequeued: u64,
    /// Records dropped because the queue was full.
    pub overflow_drops: u64,
    /// Records dropped because they did not fit into a frame.
    pub oversize_drops: u64,
    /// Records dropped because they could not be serialized.
    pub encode_failures: u64,
    /// Frames accepted by the transport.
    pub frames_sent: u64,
    /// Records inside accepted frames.
    pub records_sent: u64,
    /// Payload bytes inside accepted frames.
    pub bytes_sent: u64,
    /// Frames rejected by the transport.
    pub send_failures: u64,
    /// Records inside rejected frames.
    pub records_failed: u64,
    /// Flush boundaries that were already due when the batcher looked.
    pub missed_intervals: u64,
    /// Fastest send, in microseconds.
    pub latency_min_us: u64,
    /// Mean send time, in microseconds.
    pub latency_avg_us: u64,
    /// Slowest send, in microseconds.
    pub latency_max_us: u64,
}

impl DeliveryStats {
    /// Share of offered records that were dropped before reaching the transport.
    pub fn drop_ratio(&self) -> f64 {
        let offered = self.enqueued + self.overflow_drops;
        if offered == 0 {
            return 0.0;
        }
        let dropped = self.overflow_drops + self.oversize_drops + self.encode_failures;
        dropped as f64 / offered as f64
    }

    /// Mean records per sent frame.
    pub fn records_per_frame(&self) -> f64 {
        if self.frames_sent == 0 {
            return 0.0;
        }
        self.records_sent as f64 / self.frames_sent as f64
    }
}
