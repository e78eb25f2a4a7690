// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node configuration file.
//!
//! The file lists the endpoints to connect to and the points to publish on
//! each of them. It is read at startup and rewritten whenever the set of
//! published points changes.
//!
//! ```json
//! [
//!   {
//!     "EndpointUrl": "opc.tcp://plc-01:4840",
//!     "UseSecurity": false,
//!     "OpcNodes": [
//!       { "Id": "ns=2;s=Line1.Temperature", "OpcSamplingInterval": 500 },
//!       { "Id": "nsu=urn:plc;s=Line1.Pressure", "HeartbeatInterval": 30, "SkipFirst": true }
//!     ]
//!   },
//!   { "EndpointUrl": "opc.tcp://plc-02:4840", "NodeId": { "Identifier": "ns=2;i=1001" } }
//! ]
//! ```
//!
//! The second entry uses the legacy single-identifier form; it is read as one
//! point with default settings and written back in the current form.
//! Sampling and publishing intervals are milliseconds, heartbeat intervals
//! are seconds.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use uapub_opcua::{
    AuthMode, EndpointRequest, PointInfo, PointRequest, PointSettings, PublishedEndpoint,
    UserIdentity,
};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Entries
// =============================================================================

fn default_use_security() -> bool {
    true
}

/// One endpoint and its points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointEntry {
    /// Endpoint URL.
    pub endpoint_url: String,

    /// Prefer a secured endpoint.
    #[serde(default = "default_use_security")]
    pub use_security: bool,

    /// Authentication mode.
    #[serde(default)]
    pub opc_authentication_mode: AuthMode,

    /// User name for `UsernamePassword`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_authentication_username: Option<String>,

    /// Password for `UsernamePassword`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_authentication_password: Option<String>,

    /// Points.
    #[serde(default)]
    pub opc_nodes: Vec<NodeEntry>,

    /// Legacy single identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<LegacyNodeId>,
}

/// One point.
///
/// Only explicitly configured settings are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeEntry {
    /// Identifier in `ns=` or `nsu=` form.
    #[serde(alias = "ExpandedNodeId")]
    pub id: String,

    /// Sampling interval, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_sampling_interval: Option<u64>,

    /// Publishing interval, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_publishing_interval: Option<u64>,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Heartbeat interval, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u64>,

    /// Suppress the first notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_first: Option<bool>,
}

/// Legacy `NodeId` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LegacyNodeId {
    /// Identifier text.
    pub identifier: String,
}

impl NodeEntry {
    /// Creates an entry with no explicit settings.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            opc_sampling_interval: None,
            opc_publishing_interval: None,
            display_name: None,
            heartbeat_interval: None,
            skip_first: None,
        }
    }

    /// Configured settings.
    pub fn settings(&self) -> PointSettings {
        PointSettings {
            display_name: self.display_name.clone(),
            sampling_interval: self.opc_sampling_interval.map(Duration::from_millis),
            publishing_interval: self.opc_publishing_interval.map(Duration::from_millis),
            heartbeat_interval: self.heartbeat_interval.map(Duration::from_secs),
            skip_first: self.skip_first,
        }
    }

    fn from_info(info: &PointInfo) -> Self {
        Self {
            id: info.id.clone(),
            opc_sampling_interval: info.sampling_interval.map(|d| d.as_millis() as u64),
            opc_publishing_interval: info.publishing_interval.map(|d| d.as_millis() as u64),
            display_name: info.display_name.clone(),
            heartbeat_interval: info.heartbeat_interval.map(|d| d.as_secs()),
            skip_first: info.skip_first,
        }
    }
}

impl EndpointEntry {
    /// Creates an anonymous, unsecured entry.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            use_security: false,
            opc_authentication_mode: AuthMode::Anonymous,
            opc_authentication_username: None,
            opc_authentication_password: None,
            opc_nodes: Vec::new(),
            node_id: None,
        }
    }

    /// Adds a point.
    pub fn with_node(mut self, node: NodeEntry) -> Self {
        self.opc_nodes.push(node);
        self
    }

    /// Every point, including the legacy identifier.
    pub fn nodes(&self) -> impl Iterator<Item = NodeEntry> + '_ {
        self.opc_nodes
            .iter()
            .cloned()
            .chain(self.node_id.iter().map(|legacy| NodeEntry::new(&legacy.identifier)))
    }

    /// Connection parameters.
    pub fn endpoint_request(&self) -> ConfigResult<EndpointRequest> {
        let identity = match self.opc_authentication_mode {
            AuthMode::Anonymous => UserIdentity::Anonymous,
            AuthMode::UsernamePassword => {
                match (&self.opc_authentication_username, &self.opc_authentication_password) {
                    (Some(username), Some(password)) => UserIdentity::UserName {
                        username: username.clone(),
                        password: password.clone(),
                    },
                    _ => {
                        return Err(ConfigError::validation(
                            format!("{}.OpcAuthenticationUsername", self.endpoint_url),
                            "UsernamePassword requires a user name and a password",
                        ))
                    }
                }
            }
        };
        Ok(EndpointRequest::new(&self.endpoint_url)
            .with_security(self.use_security)
            .with_identity(identity))
    }

    fn from_published(published: &PublishedEndpoint) -> Self {
        let (username, password) = match &published.endpoint.identity {
            UserIdentity::Anonymous => (None, None),
            UserIdentity::UserName { username, password } => {
                (Some(username.clone()), Some(password.clone()))
            }
        };
        Self {
            endpoint_url: published.endpoint.endpoint_url.clone(),
            use_security: published.endpoint.use_security,
            opc_authentication_mode: published.endpoint.identity.mode(),
            opc_authentication_username: username,
            opc_authentication_password: password,
            opc_nodes: published.points.iter().map(NodeEntry::from_info).collect(),
            node_id: None,
        }
    }
}

// =============================================================================
// NodeConfigFile
// =============================================================================

/// A node configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfigFile {
    /// Endpoint entries.
    pub endpoints: Vec<EndpointEntry>,
}

/// Publish requests of one endpoint.
pub type EndpointPoints = (EndpointRequest, Vec<PointRequest>);

impl NodeConfigFile {
    /// Loads a file. A missing or blank file is an empty configuration.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Node configuration file not found, starting empty");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let file = Self::parse(&content).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })?;
        debug!(
            path = %path.display(),
            endpoints = file.endpoints.len(),
            points = file.point_count(),
            "Node configuration loaded"
        );
        Ok(file)
    }

    /// Parses file content.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
    }

    /// Writes the file atomically: a sibling temp file is written, then renamed.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| ConfigError::serialization(e.to_string()))?;

        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = Path::new(&temp);

        let mut file = fs::File::create(temp).map_err(|e| ConfigError::io(temp, e))?;
        file.write_all(&json).map_err(|e| ConfigError::io(temp, e))?;
        file.sync_all().map_err(|e| ConfigError::io(temp, e))?;
        drop(file);
        fs::rename(temp, path).map_err(|e| ConfigError::io(path, e))?;

        debug!(path = %path.display(), bytes = json.len(), "Node configuration saved");
        Ok(())
    }

    /// Renders the registry's desired state.
    pub fn from_published(published: &[PublishedEndpoint]) -> Self {
        Self {
            endpoints: published.iter().map(EndpointEntry::from_published).collect(),
        }
    }

    /// Total number of points.
    pub fn point_count(&self) -> usize {
        self.endpoints.iter().map(|e| e.nodes().count()).sum()
    }

    /// Converts the file into publish requests.
    ///
    /// Entries for the same endpoint URL are merged; the first entry's
    /// connection parameters win.
    pub fn to_requests(&self) -> ConfigResult<Vec<EndpointPoints>> {
        let mut requests: Vec<EndpointPoints> = Vec::new();
        for entry in &self.endpoints {
            let endpoint = entry.endpoint_request()?;
            let mut points = Vec::new();
            for node in entry.nodes() {
                let request = PointRequest::parse(&node.id)
                    .map_err(|e| ConfigError::invalid_node(&entry.endpoint_url, &node.id, e.to_string()))?
                    .with_settings(node.settings());
                points.push(request);
            }

            match requests
                .iter_mut()
                .find(|(existing, _)| existing.endpoint_url == endpoint.endpoint_url)
            {
                Some((_, existing)) => existing.extend(points),
                None => requests.push((endpoint, points)),
            }
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uapub_opcua::PointState;

    const FILE: &str = r#"[
        {
            "EndpointUrl": "opc.tcp://plc-01:4840",
            "UseSecurity": false,
            "OpcNodes": [
                { "Id": "ns=2;s=Line1.Temperature", "OpcSamplingInterval": 500, "OpcPublishingInterval": 1000 },
                { "ExpandedNodeId": "nsu=urn:plc;s=Line1.Pressure", "HeartbeatInterval": 30, "SkipFirst": true }
            ]
        },
        { "EndpointUrl": "opc.tcp://plc-02:4840", "NodeId": { "Identifier": "ns=2;i=1001" } },
        { "EndpointUrl": "opc.tcp://plc-01:4840", "OpcNodes": [ { "Id": "ns=2;i=7" } ] }
    ]"#;

    #[test]
    fn test_parse_current_and_legacy() {
        let file = NodeConfigFile::parse(FILE).unwrap();
        assert_eq!(file.endpoints.len(), 3);
        assert_eq!(file.point_count(), 4);
        assert!(file.endpoints[1].use_security);
        assert_eq!(
            file.endpoints[1].nodes().next().unwrap(),
            NodeEntry::new("ns=2;i=1001")
        );
    }

    #[test]
    fn test_to_requests_merges_endpoints() {
        let requests = NodeConfigFile::parse(FILE).unwrap().to_requests().unwrap();
        assert_eq!(requests.len(), 2);

        let (endpoint, points) = &requests[0];
        assert_eq!(endpoint.endpoint_url, "opc.tcp://plc-01:4840");
        assert!(!endpoint.use_security);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].settings.sampling_interval, Some(Duration::from_millis(500)));
        assert_eq!(points[1].settings.heartbeat_interval, Some(Duration::from_secs(30)));
        assert_eq!(points[1].settings.skip_first, Some(true));
        assert_eq!(points[2].settings, PointSettings::default());
    }

    #[test]
    fn test_invalid_identifier() {
        let file = NodeConfigFile {
            endpoints: vec![EndpointEntry::new("opc.tcp://plc:4840").with_node(NodeEntry::new("garbage"))],
        };
        assert!(matches!(file.to_requests(), Err(ConfigError::InvalidNode { .. })));
    }

    #[test]
    fn test_username_requires_password() {
        let mut entry = EndpointEntry::new("opc.tcp://plc:4840");
        entry.opc_authentication_mode = AuthMode::UsernamePassword;
        entry.opc_authentication_username = Some("operator".into());
        assert!(entry.endpoint_request().is_err());

        entry.opc_authentication_password = Some("secret".into());
        let request = entry.endpoint_request().unwrap();
        assert_eq!(request.identity.mode(), AuthMode::UsernamePassword);
    }

    #[test]
    fn test_blank_and_missing_files_are_empty() {
        assert_eq!(NodeConfigFile::parse("  \n").unwrap(), NodeConfigFile::default());

        let dir = tempfile::tempdir().unwrap();
        let loaded = NodeConfigFile::load(dir.path().join("absent.json")).unwrap();
        assert!(loaded.endpoints.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("publishednodes.json");
        let file = NodeConfigFile::parse(FILE).unwrap();

        file.save(&path).unwrap();
        assert!(!dir.path().join("publishednodes.json.tmp").exists());
        assert_eq!(NodeConfigFile::load(&path).unwrap(), file);
    }

    #[test]
    fn test_from_published_writes_only_explicit_settings() {
        let settings = PointSettings {
            sampling_interval: Some(Duration::from_millis(250)),
            ..PointSettings::default()
        };
        let published = vec![PublishedEndpoint {
            endpoint: EndpointRequest::new("opc.tcp://plc:4840"),
            points: vec![
                PointInfo::new("ns=2;s=A", PointState::Monitored, &settings),
                PointInfo::new("ns=2;s=B", PointState::Unmonitored, &PointSettings::default()),
            ],
        }];

        let file = NodeConfigFile::from_published(&published);
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json[0]["OpcNodes"][0]["OpcSamplingInterval"], 250);
        assert!(json[0]["OpcNodes"][1].get("OpcSamplingInterval").is_none());
        assert!(json[0].get("NodeId").is_none());
        assert_eq!(json[0]["OpcAuthenticationMode"], "Anonymous");
    }
}
