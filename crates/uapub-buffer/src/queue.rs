// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded FIFO between the notification path and the batcher.
//!
//! # Design
//!
//! - **Non-blocking enqueue**: producers are protocol callbacks; a full queue
//!   drops the record and counts it instead of waiting
//! - **At-most-once**: nothing is ever re-queued
//! - **Single consumer**: the batcher waits on a [`Notify`] with an optional
//!   deadline
//! - **Close then drain**: after [`DeliveryQueue::close`] the remaining
//!   records are still handed out, then [`Dequeue::Closed`] is reported

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use uapub_core::{MessageRecord, RecordSink};

use crate::error::{BufferError, BufferResult};
use crate::stats::{DeliveryStats, DeliveryStatsInner};

/// Overflow drops between two warning lines.
pub const OVERFLOW_LOG_EVERY: u64 = 1000;

/// Outcome of a [`DeliveryQueue::dequeue`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeue {
    /// The oldest record.
    Record(MessageRecord),
    /// The wait bound elapsed with the queue empty.
    Empty,
    /// The queue is closed and drained.
    Closed,
}

// =============================================================================
// DeliveryQueue
// =============================================================================

/// Bounded FIFO of outbound records.
pub struct DeliveryQueue {
    records: Mutex<VecDeque<MessageRecord>>,
    capacity: usize,
    available: Notify,
    closed: AtomicBool,
    stats: Arc<DeliveryStatsInner>,
}

impl DeliveryQueue {
    /// Creates a queue holding at most `capacity` records.
    pub fn new(capacity: usize) -> BufferResult<Self> {
        Self::with_stats(capacity, Arc::new(DeliveryStatsInner::new()))
    }

    /// Creates a queue recording into shared statistics.
    pub fn with_stats(capacity: usize, stats: Arc<DeliveryStatsInner>) -> BufferResult<Self> {
        if capacity == 0 {
            return Err(BufferError::invalid_config("queue capacity must be at least 1"));
        }
        Ok(Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            available: Notify::new(),
            closed: AtomicBool::new(false),
            stats,
        })
    }

    /// Maximum number of records held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records currently held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if no record is held.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shared statistics.
    pub fn stats_handle(&self) -> &Arc<DeliveryStatsInner> {
        &self.stats
    }

    /// Snapshot of the delivery statistics.
    pub fn stats(&self) -> DeliveryStats {
        self.stats.snapshot(self.len())
    }

    /// Offers a record without waiting.
    ///
    /// Returns `false` if the queue is full or closed; the record is dropped.
    pub fn try_enqueue(&self, record: MessageRecord) -> bool {
        if self.is_closed() {
            debug!(endpoint = %record.endpoint_url, "Queue closed, record dropped");
            return false;
        }

        {
            let mut records = self.records.lock();
            if records.len() >= self.capacity {
                drop(records);
                let dropped = self.stats.record_overflow();
                if dropped == 1 || dropped % OVERFLOW_LOG_EVERY == 0 {
                    warn!(
                        capacity = self.capacity,
                        dropped,
                        "Delivery queue full, dropping records"
                    );
                }
                return false;
            }
            records.push_back(record);
        }

        self.stats.record_enqueue();
        self.available.notify_one();
        true
    }

    /// Takes the oldest record, waiting at most `wait` (forever if `None`).
    pub async fn dequeue(&self, wait: Option<Duration>) -> Dequeue {
        match wait {
            Some(bound) => match tokio::time::timeout(bound, self.next()).await {
                Ok(outcome) => outcome,
                Err(_) => self.pop().unwrap_or(Dequeue::Empty),
            },
            None => self.next().await,
        }
    }

    async fn next(&self) -> Dequeue {
        loop {
            if let Some(outcome) = self.pop() {
                return outcome;
            }
            self.available.notified().await;
        }
    }

    fn pop(&self) -> Option<Dequeue> {
        if let Some(record) = self.records.lock().pop_front() {
            self.stats.record_dequeue();
            return Some(Dequeue::Record(record));
        }
        self.is_closed().then_some(Dequeue::Closed)
    }

    /// Stops accepting records and wakes the consumer.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(remaining = self.len(), "Delivery queue closed");
        }
        self.available.notify_one();
    }
}

impl RecordSink for DeliveryQueue {
    fn enqueue(&self, record: MessageRecord) -> bool {
        self.try_enqueue(record)
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
