// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Types returned by administrative operations.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;

use crate::client::AuthMode;
use crate::error::{AdminError, OpcUaResult};
use crate::point::{PointSettings, PointState};
use crate::session::SessionState;

// =============================================================================
// Pagination
// =============================================================================

/// Opaque position in a paginated listing.
///
/// Encodes the configuration version the listing was taken at, so a page
/// request after a structural change is rejected instead of skipping or
/// repeating entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationToken {
    /// Configuration version at issue time.
    pub version: u64,
    /// Offset of the next item.
    pub offset: usize,
}

impl ContinuationToken {
    /// Encodes the token.
    pub fn encode(&self) -> String {
        BASE64.encode(format!("{}:{}", self.version, self.offset))
    }

    /// Decodes a token.
    pub fn decode(token: &str) -> OpcUaResult<Self> {
        let invalid = || AdminError::InvalidContinuationToken {
            token: token.to_string(),
        };
        let bytes = BASE64.decode(token.trim()).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (version, offset) = text.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            version: version.parse().map_err(|_| invalid())?,
            offset: offset.parse().map_err(|_| invalid())?,
        })
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Items of this page.
    pub items: Vec<T>,
    /// Token for the next page, absent on the last one.
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    /// Slices a snapshot taken at `version`.
    pub(crate) fn slice(
        mut all: Vec<T>,
        version: u64,
        token: Option<&str>,
        page_size: usize,
    ) -> OpcUaResult<Self> {
        let offset = match token {
            Some(token) => {
                let token = ContinuationToken::decode(token)?;
                if token.version != version {
                    return Err(AdminError::ConcurrentModification {
                        token_version: token.version,
                        current_version: version,
                    }
                    .into());
                }
                token.offset
            }
            None => 0,
        };

        let offset = offset.min(all.len());
        let end = offset.saturating_add(page_size.max(1)).min(all.len());
        let continuation = (end < all.len()).then(|| {
            ContinuationToken {
                version,
                offset: end,
            }
            .encode()
        });
        all.truncate(end);
        let items = all.split_off(offset);
        Ok(Self {
            items,
            continuation,
        })
    }
}

// =============================================================================
// Listings
// =============================================================================

/// A configured endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    /// Endpoint URL.
    pub endpoint_url: String,
    /// Prefer a secured endpoint.
    pub use_security: bool,
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// Session state.
    pub state: SessionState,
    /// Points currently configured (removal-tagged points excluded).
    pub point_count: usize,
}

/// A configured point.
///
/// Settings are reported only where configuration set them explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointInfo {
    /// Identifier as configured.
    pub id: String,
    /// Lifecycle state.
    pub state: PointState,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Sampling interval.
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub sampling_interval: Option<Duration>,
    /// Publishing interval.
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub publishing_interval: Option<Duration>,
    /// Heartbeat interval.
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub heartbeat_interval: Option<Duration>,
    /// Skip-first flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_first: Option<bool>,
}

impl PointInfo {
    /// Creates the listing entry of a point.
    pub fn new(id: impl Into<String>, state: PointState, settings: &PointSettings) -> Self {
        Self {
            id: id.into(),
            state,
            display_name: settings.display_name.clone(),
            sampling_interval: settings.sampling_interval,
            publishing_interval: settings.publishing_interval,
            heartbeat_interval: settings.heartbeat_interval,
            skip_first: settings.skip_first,
        }
    }

    /// Returns the configured settings.
    pub fn settings(&self) -> PointSettings {
        PointSettings {
            display_name: self.display_name.clone(),
            sampling_interval: self.sampling_interval,
            publishing_interval: self.publishing_interval,
            heartbeat_interval: self.heartbeat_interval,
            skip_first: self.skip_first,
        }
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Point counts per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PointCounts {
    /// Awaiting registration.
    pub unmonitored: usize,
    /// Awaiting namespace resolution.
    pub namespace_pending: usize,
    /// Reporting.
    pub monitored: usize,
    /// Tagged for removal.
    pub removal_requested: usize,
}

impl PointCounts {
    /// Counts one point.
    pub fn record(&mut self, state: PointState) {
        match state {
            PointState::Unmonitored => self.unmonitored += 1,
            PointState::UnmonitoredNamespaceUpdateRequested => self.namespace_pending += 1,
            PointState::Monitored => self.monitored += 1,
            PointState::RemovalRequested => self.removal_requested += 1,
        }
    }

    /// Adds another set of counts.
    pub fn merge(&mut self, other: PointCounts) {
        self.unmonitored += other.unmonitored;
        self.namespace_pending += other.namespace_pending;
        self.monitored += other.monitored;
        self.removal_requested += other.removal_requested;
    }

    /// Total number of points.
    pub fn total(&self) -> usize {
        self.unmonitored + self.namespace_pending + self.monitored + self.removal_requested
    }
}

/// Diagnostics of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDiagnostics {
    /// Endpoint URL.
    pub endpoint_url: String,
    /// Session state.
    pub state: SessionState,
    /// Failed connects since the last success.
    pub unsuccessful_connects: u32,
    /// Consecutive bad keep-alives.
    pub missed_keep_alives: u32,
    /// Subscriptions held.
    pub subscriptions: usize,
    /// Subscriptions existing on the server.
    pub attached_subscriptions: usize,
    /// Points per state.
    pub points: PointCounts,
}

/// Diagnostics of the whole registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryDiagnostics {
    /// Number of sessions.
    pub sessions: usize,
    /// Sessions in state `Connected`.
    pub connected_sessions: usize,
    /// Subscriptions across sessions.
    pub subscriptions: usize,
    /// Points per state across sessions.
    pub points: PointCounts,
    /// Configuration version.
    pub config_version: u64,
    /// Per-session detail.
    pub per_session: Vec<SessionDiagnostics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpcUaError;

    #[test]
    fn test_token_roundtrip_and_garbage() {
        let token = ContinuationToken {
            version: 12,
            offset: 40,
        };
        assert_eq!(ContinuationToken::decode(&token.encode()).unwrap(), token);
        assert!(ContinuationToken::decode("not base64!").is_err());
        assert!(ContinuationToken::decode(&BASE64.encode("12")).is_err());
    }

    #[test]
    fn test_page_walk() {
        let items: Vec<u32> = (0..5).collect();
        let first = Page::slice(items.clone(), 3, None, 2).unwrap();
        assert_eq!(first.items, vec![0, 1]);

        let second = Page::slice(items.clone(), 3, first.continuation.as_deref(), 2).unwrap();
        assert_eq!(second.items, vec![2, 3]);

        let last = Page::slice(items, 3, second.continuation.as_deref(), 2).unwrap();
        assert_eq!(last.items, vec![4]);
        assert!(last.continuation.is_none());
    }

    #[test]
    fn test_page_rejects_stale_token() {
        let items: Vec<u32> = (0..5).collect();
        let first = Page::slice(items.clone(), 3, None, 2).unwrap();
        let err = Page::slice(items, 4, first.continuation.as_deref(), 2).unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Admin(AdminError::ConcurrentModification {
                token_version: 3,
                current_version: 4
            })
        ));
    }

    #[test]
    fn test_point_info_reports_explicit_settings_only() {
        let settings = PointSettings {
            sampling_interval: Some(Duration::from_millis(250)),
            ..PointSettings::default()
        };
        let info = PointInfo::new("ns=2;s=A", PointState::Monitored, &settings);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["sampling_interval"], 250);
        assert!(json.get("heartbeat_interval").is_none());
        assert!(json.get("skip_first").is_none());
    }
}
