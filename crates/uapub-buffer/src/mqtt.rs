// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT transport.
//!
//! Frames are published with QoS 1 to a single topic. The `rumqttc` event
//! loop runs in its own task and owns the connection: it reconnects after
//! failures and retransmits unacknowledged publishes, so the batcher never
//! has to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BufferError, BufferResult, TransportError};
use crate::traits::{Frame, TelemetryTransport};

/// Fixed header, topic length prefix and packet identifier of a QoS 1 publish.
const PUBLISH_HEADER_BYTES: usize = 5 + 2 + 2;

// =============================================================================
// Configuration
// =============================================================================

/// MQTT broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic frames are published to.
    pub topic: String,

    /// Optional user name.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,

    /// MQTT keep-alive, in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Wait between reconnect attempts, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Deadline for handing one frame to the event loop, in milliseconds.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Request channel capacity between client and event loop.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "uapub".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_channel_capacity() -> usize {
    64
}

impl MqttConfig {
    /// Creates settings for a broker and topic with defaults elsewhere.
    pub fn new(host: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            client_id: default_client_id(),
            topic: topic.into(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Broker address for logging.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the settings.
    pub fn validate(&self) -> BufferResult<()> {
        if self.host.is_empty() {
            return Err(BufferError::invalid_config("mqtt host is empty"));
        }
        if self.topic.is_empty() || self.topic.contains(['+', '#']) {
            return Err(BufferError::invalid_config(format!(
                "mqtt topic '{}' is not a valid publish topic",
                self.topic
            )));
        }
        if self.keep_alive_secs < 5 {
            return Err(BufferError::invalid_config("mqtt keep_alive_secs must be at least 5"));
        }
        if self.channel_capacity == 0 {
            return Err(BufferError::invalid_config("mqtt channel_capacity must be at least 1"));
        }
        Ok(())
    }

    fn options(&self, max_packet_size: usize) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        options.set_clean_session(true);
        if max_packet_size > 0 {
            options.set_max_packet_size(max_packet_size, max_packet_size);
        }
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

// =============================================================================
// MqttTransport
// =============================================================================

/// Publishes frames to an MQTT broker.
pub struct MqttTransport {
    client: AsyncClient,
    topic: String,
    target: String,
    connected: Arc<AtomicBool>,
    publish_timeout: Duration,
    event_loop: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Creates the client and spawns its event loop.
    ///
    /// `max_frame_size` raises the client's packet limit when non-zero. The
    /// event loop stops when `cancel` fires or [`close`](TelemetryTransport::close)
    /// is called.
    pub fn connect(
        config: &MqttConfig,
        max_frame_size: usize,
        cancel: CancellationToken,
    ) -> BufferResult<Self> {
        config.validate()?;
        let (client, event_loop) =
            AsyncClient::new(config.options(max_frame_size), config.channel_capacity);
        let connected = Arc::new(AtomicBool::new(false));
        let target = config.target();

        info!(broker = %target, topic = %config.topic, "Starting MQTT transport");
        let handle = tokio::spawn(drive_event_loop(
            event_loop,
            Arc::clone(&connected),
            target.clone(),
            Duration::from_millis(config.reconnect_delay_ms),
            cancel,
        ));

        Ok(Self {
            client,
            topic: config.topic.clone(),
            target,
            connected,
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
            event_loop: parking_lot::Mutex::new(Some(handle)),
        })
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    target: String,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Release);
                info!(broker = %target, "MQTT connected");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::Release);
                warn!(broker = %target, "MQTT broker closed the connection");
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::AcqRel) {
                    warn!(broker = %target, error = %e, "MQTT connection lost");
                } else {
                    debug!(broker = %target, error = %e, "MQTT connect attempt failed");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
    connected.store(false, Ordering::Release);
    debug!(broker = %target, "MQTT event loop stopped");
}

#[async_trait]
impl TelemetryTransport for MqttTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let bytes = frame.len();
        let publish = self
            .client
            .publish(&self.topic, QoS::AtLeastOnce, false, frame.into_payload());

        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::publish(bytes, e.to_string())),
            Err(_) => Err(TransportError::publish(
                bytes,
                format!("not accepted within {:?} by {}", self.publish_timeout, self.target),
            )),
        }
    }

    fn name(&self) -> &str {
        "mqtt"
    }

    fn protocol_overhead(&self) -> usize {
        PUBLISH_HEADER_BYTES + self.topic.len()
    }

    fn is_healthy(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(broker = %self.target, error = %e, "MQTT disconnect request failed");
        }
        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            // The event loop flushes the disconnect, then exits on its error.
            if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
                debug!(broker = %self.target, "MQTT event loop did not stop in time");
            }
        }
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("target", &self.target)
            .field("topic", &self.topic)
            .field("connected", &self.is_healthy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: MqttConfig =
            serde_json::from_str(r#"{"host":"broker","topic":"plant/telemetry"}"#).unwrap();
        assert_eq!(config.port, 1883);
        assert_eq!(config.client_id, "uapub");
        assert_eq!(config.target(), "broker:1883");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let config = MqttConfig::new("broker", "plant/#");
        assert!(matches!(config.validate(), Err(BufferError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_protocol_overhead_includes_topic() {
        let cancel = CancellationToken::new();
        let transport =
            MqttTransport::connect(&MqttConfig::new("127.0.0.1", "plant/line1"), 0, cancel.clone())
                .unwrap();
        assert_eq!(transport.protocol_overhead(), PUBLISH_HEADER_BYTES + 11);
        assert!(!transport.is_healthy());
        cancel.cancel();
    }
}
