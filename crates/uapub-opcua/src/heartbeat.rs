// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-point heartbeat re-send.
//!
//! A heartbeat re-delivers the last record of a point that has not changed for
//! its heartbeat interval. The timer starts disarmed, is armed when the point
//! is registered with the server, restarts on every fresh notification, and is
//! cancelled when the point is unmonitored or removed.
//!
//! Every re-send advances the cached record's source timestamp by the
//! interval, so consecutive emissions are exactly one interval apart.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use uapub_core::{MessageRecord, RecordSink};

/// Smallest step used to keep cached source timestamps strictly increasing.
///
/// One OPC UA `DateTime` tick.
pub fn timestamp_tick() -> chrono::Duration {
    chrono::Duration::nanoseconds(100)
}

#[derive(Default)]
struct HeartbeatState {
    cached: Option<MessageRecord>,
    timer: Option<CancellationToken>,
    armed: bool,
}

/// Heartbeat timer of one point.
pub struct Heartbeat {
    node_id: String,
    interval: Duration,
    sink: Arc<dyn RecordSink>,
    runtime: Handle,
    parent: CancellationToken,
    state: Mutex<HeartbeatState>,
}

impl Heartbeat {
    /// Creates a disarmed heartbeat.
    ///
    /// A zero `interval` disables the heartbeat. Timers are children of
    /// `parent` and stop when it is cancelled.
    pub fn new(
        node_id: impl Into<String>,
        interval: Duration,
        sink: Arc<dyn RecordSink>,
        runtime: Handle,
        parent: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id: node_id.into(),
            interval,
            sink,
            runtime,
            parent,
            state: Mutex::new(HeartbeatState::default()),
        })
    }

    /// Returns the heartbeat interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` if heartbeats are configured.
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Returns `true` if the timer is armed.
    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    /// Returns a copy of the cached record.
    pub fn cached(&self) -> Option<MessageRecord> {
        self.state.lock().cached.clone()
    }

    /// Arms the timer after a successful registration.
    pub fn arm(self: &Arc<Self>) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock();
        state.armed = true;
        self.restart(&mut state);
    }

    /// Stores a fresh record and restarts the timer.
    ///
    /// The cached source timestamp is kept strictly increasing.
    pub fn update(self: &Arc<Self>, record: &MessageRecord) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }

        let mut record = record.clone();
        if let (Some(previous), Some(current)) = (
            state.cached.as_ref().and_then(|r| r.source_timestamp),
            record.source_timestamp,
        ) {
            if current <= previous {
                record.source_timestamp = Some(previous + timestamp_tick());
            }
        }
        state.cached = Some(record);

        if state.armed {
            self.restart(&mut state);
        }
    }

    /// Cancels the timer and drops the cached record.
    pub fn disarm(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.armed = false;
        state.cached = None;
    }

    fn restart(self: &Arc<Self>, state: &mut HeartbeatState) {
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        let token = self.parent.child_token();
        state.timer = Some(token.clone());

        let heartbeat = Arc::downgrade(self);
        let interval = self.interval;
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => match heartbeat.upgrade() {
                        Some(heartbeat) => heartbeat.fire(),
                        None => break,
                    },
                }
            }
        });
    }

    fn fire(&self) {
        let record = {
            let mut state = self.state.lock();
            let Some(cached) = state.cached.as_mut() else {
                debug!(node_id = %self.node_id, "Heartbeat fired without a cached value");
                return;
            };
            if let Some(ts) = cached.source_timestamp.as_mut() {
                *ts += chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::zero());
            }
            cached.clone()
        };

        trace!(node_id = %self.node_id, "Heartbeat re-send");
        self.sink.enqueue(record);
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[derive(Default)]
    struct Collect(Mutex<Vec<MessageRecord>>);

    impl RecordSink for Collect {
        fn enqueue(&self, record: MessageRecord) -> bool {
            self.0.lock().push(record);
            true
        }
    }

    fn record(second: u32) -> MessageRecord {
        let mut record = MessageRecord::new("opc.tcp://h:4840");
        record.value = Some("1".into());
        record.source_timestamp = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap());
        record
    }

    fn heartbeat(sink: Arc<Collect>, secs: u64) -> Arc<Heartbeat> {
        Heartbeat::new(
            "ns=2;s=A",
            Duration::from_secs(secs),
            sink,
            Handle::current(),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_advances_timestamp() {
        let sink = Arc::new(Collect::default());
        let hb = heartbeat(sink.clone(), 5);
        hb.arm();
        hb.update(&record(0));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let sent = sink.0.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].source_timestamp, record(5).source_timestamp);
        assert_eq!(sent[1].source_timestamp, record(10).source_timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_value_restarts_timer() {
        let sink = Arc::new(Collect::default());
        let hb = heartbeat(sink.clone(), 5);
        hb.arm();
        hb.update(&record(0));

        tokio::time::sleep(Duration::from_secs(3)).await;
        hb.update(&record(3));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(sink.0.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let sent = sink.0.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].source_timestamp, record(8).source_timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cache_skips() {
        let sink = Arc::new(Collect::default());
        let hb = heartbeat(sink.clone(), 1);
        hb.arm();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let sink = Arc::new(Collect::default());
        let hb = heartbeat(sink.clone(), 1);
        hb.update(&record(0));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(sink.0.lock().is_empty());

        hb.arm();
        hb.disarm();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(sink.0.lock().is_empty());
        assert!(hb.cached().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_timestamp_strictly_increases() {
        let sink = Arc::new(Collect::default());
        let hb = heartbeat(sink, 10);
        hb.update(&record(5));
        hb.update(&record(5));
        let cached = hb.cached().unwrap();
        assert_eq!(
            cached.source_timestamp,
            record(5).source_timestamp.map(|ts| ts + timestamp_tick())
        );

        hb.update(&record(1));
        assert_eq!(
            hb.cached().unwrap().source_timestamp,
            record(5).source_timestamp.map(|ts| ts + timestamp_tick() * 2)
        );
    }
}
