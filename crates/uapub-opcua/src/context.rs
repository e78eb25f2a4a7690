// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publisher context shared by every session.
//!
//! [`PublisherContext`] is built once at startup and handed to the
//! [`SessionRegistry`](crate::registry::SessionRegistry). It carries the
//! defaults, the telemetry layout, the record sink, the configuration-version
//! counter and the shutdown token. Nothing in this crate keeps global state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use uapub_core::{RecordSink, TelemetryConfigSet};

use crate::client::UaConnector;
use crate::error::{ConfigurationError, OpcUaResult};
use crate::types::StatusCode;

/// Lower bound of the reconciliation wait.
pub const MIN_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// SessionSettings
// =============================================================================

/// Session and point defaults.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base wait between reconciliation passes.
    pub reconcile_interval: Duration,
    /// Upper bound of the connect backoff multiplier.
    pub backoff_cap: u32,
    /// Deadline for one connect attempt.
    pub connect_timeout: Duration,
    /// Deadline for one service call.
    pub operation_timeout: Duration,
    /// Requested session timeout.
    pub session_timeout: Duration,
    /// Keep-alive interval.
    pub keep_alive_interval: Duration,
    /// Consecutive bad keep-alives before the session is dropped.
    pub keep_alive_threshold: u32,
    /// Publishing interval for points without one. Zero lets the server choose.
    pub default_publishing_interval: Duration,
    /// Sampling interval for points without one.
    pub default_sampling_interval: Duration,
    /// Heartbeat interval for points without one. Zero disables heartbeats.
    pub default_heartbeat_interval: Duration,
    /// Skip-first flag for points without one.
    pub default_skip_first: bool,
    /// Server-side queue size per monitored item.
    pub queue_size: u32,
    /// Read display names from the server for points without a configured one.
    pub fetch_display_names: bool,
    /// Items per page in admin listings.
    pub page_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(10),
            backoff_cap: 5,
            connect_timeout: Duration::from_secs(15),
            operation_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(2),
            keep_alive_threshold: 5,
            default_publishing_interval: Duration::ZERO,
            default_sampling_interval: Duration::from_secs(1),
            default_heartbeat_interval: Duration::ZERO,
            default_skip_first: false,
            queue_size: 1,
            fetch_display_names: false,
            page_size: 1000,
        }
    }
}

impl SessionSettings {
    /// Validates the settings.
    pub fn validate(&self) -> OpcUaResult<()> {
        if self.reconcile_interval < MIN_RECONCILE_INTERVAL {
            return Err(ConfigurationError::invalid_value(
                "reconcile_interval",
                format!("must be at least {MIN_RECONCILE_INTERVAL:?}"),
            )
            .into());
        }
        if self.backoff_cap == 0 {
            return Err(ConfigurationError::invalid_value("backoff_cap", "must be at least 1").into());
        }
        if self.keep_alive_threshold == 0 {
            return Err(
                ConfigurationError::invalid_value("keep_alive_threshold", "must be at least 1").into(),
            );
        }
        if self.page_size == 0 {
            return Err(ConfigurationError::invalid_value("page_size", "must be at least 1").into());
        }
        Ok(())
    }

    /// Returns the wait before the next pass after `failures` failed connects.
    pub fn retry_wait(&self, failures: u32) -> Duration {
        let multiplier = failures.saturating_add(1).min(self.backoff_cap.max(1));
        self.reconcile_interval.saturating_mul(multiplier)
    }
}

/// Status codes suppressed by default.
pub fn default_suppressed_status_codes() -> HashSet<StatusCode> {
    [
        StatusCode::BAD_NO_COMMUNICATION,
        StatusCode::BAD_WAITING_FOR_INITIAL_DATA,
    ]
    .into_iter()
    .collect()
}

// =============================================================================
// ConfigVersion
// =============================================================================

/// Process-wide configuration-version counter.
///
/// Bumped whenever the set of monitored points changes. Also remembers the
/// last version handed to persistence.
#[derive(Debug, Default)]
pub struct ConfigVersion {
    current: AtomicU64,
    persisted: AtomicU64,
}

impl ConfigVersion {
    /// Returns the current version.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Increments the version and returns the new value.
    pub fn bump(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Marks the current version as persisted.
    pub fn mark_persisted(&self) {
        self.persisted.store(self.current(), Ordering::Release);
    }

    /// Returns the current version if it has not been persisted yet, and
    /// marks it persisted.
    pub fn take_unpersisted(&self) -> Option<u64> {
        let current = self.current();
        let previous = self.persisted.swap(current, Ordering::AcqRel);
        (previous != current).then_some(current)
    }
}

// =============================================================================
// PersistenceHook
// =============================================================================

/// Receives write-back requests when the published configuration changed.
pub trait PersistenceHook: Send + Sync {
    /// Requests that the current configuration be written back.
    fn request_write_back(&self, version: u64);
}

/// Persistence hook that ignores requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

impl PersistenceHook for NoPersistence {
    fn request_write_back(&self, _version: u64) {}
}

// =============================================================================
// PublisherContext
// =============================================================================

/// Shared services for sessions, points and heartbeats.
pub struct PublisherContext {
    /// Session and point defaults.
    pub settings: SessionSettings,
    /// Telemetry layout.
    pub telemetry: Arc<TelemetryConfigSet>,
    /// Destination of outbound records.
    pub sink: Arc<dyn RecordSink>,
    /// Status codes whose notifications are dropped.
    pub suppressed_status_codes: Arc<HashSet<StatusCode>>,
    /// Configuration-version counter.
    pub version: ConfigVersion,
    /// Write-back hook.
    pub persistence: Arc<dyn PersistenceHook>,
    /// Opens sessions.
    pub connector: Arc<dyn UaConnector>,
    /// Runtime used to spawn work from protocol callbacks.
    pub runtime: Handle,
    /// Process shutdown token.
    pub shutdown: CancellationToken,
}

impl PublisherContext {
    /// Creates a builder.
    pub fn builder(
        connector: Arc<dyn UaConnector>,
        sink: Arc<dyn RecordSink>,
    ) -> PublisherContextBuilder {
        PublisherContextBuilder {
            connector,
            sink,
            settings: SessionSettings::default(),
            telemetry: Arc::new(TelemetryConfigSet::default()),
            suppressed_status_codes: default_suppressed_status_codes(),
            persistence: Arc::new(NoPersistence),
            shutdown: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for PublisherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherContext")
            .field("settings", &self.settings)
            .field("version", &self.version.current())
            .finish_non_exhaustive()
    }
}

/// Builder for [`PublisherContext`].
pub struct PublisherContextBuilder {
    connector: Arc<dyn UaConnector>,
    sink: Arc<dyn RecordSink>,
    settings: SessionSettings,
    telemetry: Arc<TelemetryConfigSet>,
    suppressed_status_codes: HashSet<StatusCode>,
    persistence: Arc<dyn PersistenceHook>,
    shutdown: CancellationToken,
}

impl PublisherContextBuilder {
    /// Sets the session defaults.
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the telemetry layout.
    pub fn telemetry(mut self, telemetry: Arc<TelemetryConfigSet>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Sets the suppressed status codes.
    pub fn suppressed_status_codes(mut self, codes: impl IntoIterator<Item = StatusCode>) -> Self {
        self.suppressed_status_codes = codes.into_iter().collect();
        self
    }

    /// Sets the persistence hook.
    pub fn persistence(mut self, persistence: Arc<dyn PersistenceHook>) -> Self {
        self.persistence = persistence;
        self
    }

    /// Sets the shutdown token.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Builds the context.
    ///
    /// # Errors
    ///
    /// Fails if the settings are invalid or if called outside a tokio runtime.
    pub fn build(self) -> OpcUaResult<Arc<PublisherContext>> {
        self.settings.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            ConfigurationError::invalid_value("runtime", format!("no tokio runtime: {e}"))
        })?;

        Ok(Arc::new(PublisherContext {
            settings: self.settings,
            telemetry: self.telemetry,
            sink: self.sink,
            suppressed_status_codes: Arc::new(self.suppressed_status_codes),
            version: ConfigVersion::default(),
            persistence: self.persistence,
            connector: self.connector,
            runtime,
            shutdown: self.shutdown,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_wait_is_capped() {
        let settings = SessionSettings {
            reconcile_interval: Duration::from_secs(10),
            backoff_cap: 3,
            ..SessionSettings::default()
        };
        assert_eq!(settings.retry_wait(0), Duration::from_secs(10));
        assert_eq!(settings.retry_wait(1), Duration::from_secs(20));
        assert_eq!(settings.retry_wait(2), Duration::from_secs(30));
        assert_eq!(settings.retry_wait(50), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_minimum_interval() {
        let settings = SessionSettings {
            reconcile_interval: Duration::from_millis(200),
            ..SessionSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(SessionSettings::default().validate().is_ok());
    }

    #[test]
    fn test_config_version_persistence_tracking() {
        let version = ConfigVersion::default();
        assert_eq!(version.take_unpersisted(), None);

        assert_eq!(version.bump(), 1);
        assert_eq!(version.bump(), 2);
        assert_eq!(version.take_unpersisted(), Some(2));
        assert_eq!(version.take_unpersisted(), None);

        version.bump();
        version.mark_persisted();
        assert_eq!(version.take_unpersisted(), None);
    }

    #[test]
    fn test_default_suppressed_codes() {
        let codes = default_suppressed_status_codes();
        assert!(codes.contains(&StatusCode::BAD_NO_COMMUNICATION));
        assert!(!codes.contains(&StatusCode::GOOD));
    }
}
