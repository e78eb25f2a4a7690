// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Periodic diagnostics log line.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use uapub_buffer::{DeliveryQueue, DeliveryStats};
use uapub_opcua::{RegistryDiagnostics, SessionRegistry};

/// Combined view of the OPC UA side and the delivery path.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Sessions, subscriptions and points.
    pub registry: RegistryDiagnostics,
    /// Queue and sender counters.
    pub delivery: DeliveryStats,
}

impl DiagnosticsSnapshot {
    /// Collects a snapshot.
    pub async fn collect(registry: &SessionRegistry, queue: &DeliveryQueue) -> Self {
        Self {
            registry: registry.diagnostics().await,
            delivery: queue.stats(),
        }
    }

    /// Emits the snapshot as one structured log line.
    pub fn log(&self) {
        let r = &self.registry;
        let d = &self.delivery;
        info!(
            sessions = r.sessions,
            connected = r.connected_sessions,
            subscriptions = r.subscriptions,
            monitored = r.points.monitored,
            unmonitored = r.points.unmonitored,
            namespace_pending = r.points.namespace_pending,
            removal_requested = r.points.removal_requested,
            config_version = r.config_version,
            queued = d.queued,
            enqueued = d.enqueued,
            overflow_drops = d.overflow_drops,
            oversize_drops = d.oversize_drops,
            frames_sent = d.frames_sent,
            bytes_sent = d.bytes_sent,
            send_failures = d.send_failures,
            missed_intervals = d.missed_intervals,
            latency_min_us = d.latency_min_us,
            latency_avg_us = d.latency_avg_us,
            latency_max_us = d.latency_max_us,
            "Diagnostics"
        );
    }
}

/// Spawns the reporter. It logs every `interval` until `cancel` fires.
pub fn spawn_reporter(
    registry: Arc<SessionRegistry>,
    queue: Arc<DeliveryQueue>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    DiagnosticsSnapshot::collect(&registry, &queue).await.log();
                }
            }
        }
    })
}
