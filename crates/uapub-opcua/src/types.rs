// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Point identifiers, namespace resolution and status codes.
//!
//! A point can be configured in two textual forms:
//!
//! - **Indexed**: `ns=2;s=Line1.Temperature`, bound to a namespace index that
//!   is only meaningful for one server.
//! - **Qualified**: `nsu=http://acme.com/UA/;s=Line1.Temperature`, bound to a
//!   namespace URI that survives namespace table reordering.
//!
//! [`PointId`] models both as one sum type. Resolution against a
//! [`NamespaceTable`] is a pure function, and [`PointId::equivalent`] is total:
//! without a namespace table, identifiers of different forms never compare
//! equal.
//!
//! # Examples
//!
//! ```
//! use uapub_opcua::types::{NamespaceTable, PointId};
//!
//! let table = NamespaceTable::new(vec![
//!     "http://opcfoundation.org/UA/".into(),
//!     "urn:acme:plc".into(),
//! ]);
//!
//! let indexed: PointId = "ns=1;i=1001".parse().unwrap();
//! let qualified: PointId = "nsu=urn:acme:plc;i=1001".parse().unwrap();
//!
//! assert!(indexed.equivalent(&qualified, Some(&table)));
//! assert!(!indexed.equivalent(&qualified, None));
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NamespaceError, OpcUaError, OpcUaResult};

/// URI of the OPC UA standard namespace (index 0).
pub const STANDARD_NAMESPACE_URI: &str = "http://opcfoundation.org/UA/";

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier bound to a namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a node id.
    pub fn new(namespace_index: u16, identifier: NodeIdentifier) -> Self {
        Self {
            namespace_index,
            identifier,
        }
    }

    /// Creates a numeric node id.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self::new(namespace_index, NodeIdentifier::Numeric(value))
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self::new(namespace_index, NodeIdentifier::String(value.into()))
    }

    /// Returns the OPC UA string form, omitting `ns=0;`.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    /// Parses `ns=<index>;<id>` or a bare `<id>` in namespace 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (index, id) = rest.split_once(';').ok_or_else(|| {
                    OpcUaError::invalid_node_id(s, "Missing identifier after namespace")
                })?;
                let index: u16 = index
                    .parse()
                    .map_err(|_| OpcUaError::invalid_node_id(s, "Invalid namespace index"))?;
                (index, id)
            }
            None => (0, s),
        };

        Ok(Self {
            namespace_index,
            identifier: NodeIdentifier::parse(identifier_part, s)?,
        })
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// The four OPC UA identifier types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),

    /// GUID identifier.
    Guid(Uuid),

    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl NodeIdentifier {
    const PREFIXES: [&'static str; 4] = ["i=", "s=", "g=", "b="];

    /// Parses the `i=`/`s=`/`g=`/`b=` part of an identifier.
    ///
    /// `full` is the complete text, used in error messages.
    pub fn parse(text: &str, full: &str) -> OpcUaResult<Self> {
        if let Some(id) = text.strip_prefix("i=") {
            let value = id
                .parse()
                .map_err(|_| OpcUaError::invalid_node_id(full, "Invalid numeric identifier"))?;
            Ok(Self::Numeric(value))
        } else if let Some(id) = text.strip_prefix("s=") {
            Ok(Self::String(id.to_string()))
        } else if let Some(id) = text.strip_prefix("g=") {
            let uuid = Uuid::parse_str(id)
                .map_err(|e| OpcUaError::invalid_node_id(full, format!("Invalid GUID: {e}")))?;
            Ok(Self::Guid(uuid))
        } else if let Some(id) = text.strip_prefix("b=") {
            let bytes = BASE64
                .decode(id)
                .map_err(|e| OpcUaError::invalid_node_id(full, format!("Invalid base64: {e}")))?;
            Ok(Self::Opaque(bytes))
        } else {
            Err(OpcUaError::invalid_node_id(
                full,
                "Unknown identifier type. Expected i=, s=, g=, or b=",
            ))
        }
    }

    fn starts_identifier(text: &str) -> bool {
        Self::PREFIXES.iter().any(|p| text.starts_with(p))
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={v}"),
            Self::String(v) => write!(f, "s={v}"),
            Self::Guid(v) => write!(f, "g={v}"),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// NamespaceTable
// =============================================================================

/// Snapshot of a server's namespace array.
///
/// Index `i` maps to the namespace URI at position `i`. A new snapshot is
/// taken on every successful connect because servers may reorder the table
/// across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceTable {
    uris: Vec<String>,
}

impl NamespaceTable {
    /// Creates a table from the server's namespace array.
    pub fn new(uris: Vec<String>) -> Self {
        Self { uris }
    }

    /// Returns the index of a namespace URI.
    pub fn index_of(&self, uri: &str) -> Option<u16> {
        self.uris
            .iter()
            .position(|candidate| candidate == uri)
            .and_then(|index| u16::try_from(index).ok())
    }

    /// Returns the URI at a namespace index.
    pub fn uri(&self, index: u16) -> Option<&str> {
        self.uris.get(usize::from(index)).map(String::as_str)
    }

    /// Returns the number of namespaces.
    pub fn len(&self) -> usize {
        self.uris.len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}

// =============================================================================
// PointId
// =============================================================================

/// Identifier of a monitored point in either textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PointId {
    /// `ns=<index>;<id>` form.
    Indexed(NodeId),

    /// `nsu=<uri>;<id>` form.
    Qualified {
        /// Namespace URI.
        namespace_uri: String,
        /// Identifier within the namespace.
        identifier: NodeIdentifier,
    },
}

impl PointId {
    /// Creates a qualified identifier.
    pub fn qualified(namespace_uri: impl Into<String>, identifier: NodeIdentifier) -> Self {
        Self::Qualified {
            namespace_uri: namespace_uri.into(),
            identifier,
        }
    }

    /// Returns `true` if registration requires a namespace table lookup.
    pub fn needs_namespace(&self) -> bool {
        matches!(self, Self::Qualified { .. })
    }

    /// Returns the identifier part.
    pub fn identifier(&self) -> &NodeIdentifier {
        match self {
            Self::Indexed(node_id) => &node_id.identifier,
            Self::Qualified { identifier, .. } => identifier,
        }
    }

    /// Resolves to an index-bound node id.
    ///
    /// # Errors
    ///
    /// Returns [`NamespaceError::UnknownUri`] if a qualified identifier names a
    /// namespace the server does not have.
    pub fn resolve(&self, table: &NamespaceTable) -> Result<NodeId, NamespaceError> {
        match self {
            Self::Indexed(node_id) => Ok(node_id.clone()),
            Self::Qualified {
                namespace_uri,
                identifier,
            } => {
                let index = table
                    .index_of(namespace_uri)
                    .ok_or_else(|| NamespaceError::UnknownUri {
                        uri: namespace_uri.clone(),
                    })?;
                Ok(NodeId::new(index, identifier.clone()))
            }
        }
    }

    /// Converts to the qualified form.
    ///
    /// # Errors
    ///
    /// Returns [`NamespaceError::UnknownIndex`] if an indexed identifier uses a
    /// namespace index outside the table.
    pub fn qualify(&self, table: &NamespaceTable) -> Result<PointId, NamespaceError> {
        match self {
            Self::Qualified { .. } => Ok(self.clone()),
            Self::Indexed(node_id) => {
                let uri = table
                    .uri(node_id.namespace_index)
                    .ok_or(NamespaceError::UnknownIndex {
                        index: node_id.namespace_index,
                    })?;
                Ok(Self::qualified(uri, node_id.identifier.clone()))
            }
        }
    }

    /// Namespace-aware equivalence.
    ///
    /// Identifiers of the same form compare structurally. Identifiers of
    /// different forms compare equal only if both resolve to the same node id
    /// under `table`.
    pub fn equivalent(&self, other: &PointId, table: Option<&NamespaceTable>) -> bool {
        match (self, other) {
            (Self::Indexed(a), Self::Indexed(b)) => a == b,
            (
                Self::Qualified {
                    namespace_uri: ua,
                    identifier: ia,
                },
                Self::Qualified {
                    namespace_uri: ub,
                    identifier: ib,
                },
            ) => ua == ub && ia == ib,
            _ => match table {
                Some(table) => match (self.resolve(table), other.resolve(table)) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                },
                None => false,
            },
        }
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed(node_id) => write!(f, "{node_id}"),
            Self::Qualified {
                namespace_uri,
                identifier,
            } => write!(f, "nsu={namespace_uri};{identifier}"),
        }
    }
}

impl FromStr for PointId {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(rest) = s.strip_prefix("nsu=") else {
            return s.parse().map(Self::Indexed);
        };

        // The URI itself may contain ';', so split at the first ';' that
        // starts an identifier.
        let split = rest
            .match_indices(';')
            .map(|(pos, _)| pos)
            .find(|&pos| NodeIdentifier::starts_identifier(&rest[pos + 1..]))
            .ok_or_else(|| OpcUaError::invalid_node_id(s, "Missing identifier after namespace URI"))?;

        let namespace_uri = &rest[..split];
        if namespace_uri.is_empty() {
            return Err(OpcUaError::invalid_node_id(s, "Empty namespace URI"));
        }

        Ok(Self::Qualified {
            namespace_uri: namespace_uri.to_string(),
            identifier: NodeIdentifier::parse(&rest[split + 1..], s)?,
        })
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status code.
///
/// The top two bits carry the severity: `00` good, `01` uncertain, `10` bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

macro_rules! status_codes {
    ($($name:ident = $value:expr, $text:literal;)*) => {
        impl StatusCode {
            $(
                #[doc = concat!("`", $text, "`")]
                pub const $name: StatusCode = StatusCode($value);
            )*

            const NAMED: &'static [(u32, &'static str)] = &[$(($value, $text)),*];
        }
    };
}

status_codes! {
    GOOD = 0x0000_0000, "Good";
    UNCERTAIN = 0x4000_0000, "Uncertain";
    UNCERTAIN_NO_COMMUNICATION_LAST_USABLE_VALUE = 0x408F_0000, "UncertainNoCommunicationLastUsableValue";
    UNCERTAIN_LAST_USABLE_VALUE = 0x4090_0000, "UncertainLastUsableValue";
    BAD = 0x8000_0000, "Bad";
    BAD_UNEXPECTED_ERROR = 0x8001_0000, "BadUnexpectedError";
    BAD_INTERNAL_ERROR = 0x8002_0000, "BadInternalError";
    BAD_COMMUNICATION_ERROR = 0x8005_0000, "BadCommunicationError";
    BAD_TIMEOUT = 0x800A_0000, "BadTimeout";
    BAD_SERVICE_UNSUPPORTED = 0x800B_0000, "BadServiceUnsupported";
    BAD_SHUTDOWN = 0x800C_0000, "BadShutdown";
    BAD_SERVER_NOT_CONNECTED = 0x800D_0000, "BadServerNotConnected";
    BAD_SERVER_HALTED = 0x800E_0000, "BadServerHalted";
    BAD_TOO_MANY_OPERATIONS = 0x8010_0000, "BadTooManyOperations";
    BAD_SESSION_ID_INVALID = 0x8025_0000, "BadSessionIdInvalid";
    BAD_SESSION_CLOSED = 0x8026_0000, "BadSessionClosed";
    BAD_SESSION_NOT_ACTIVATED = 0x8027_0000, "BadSessionNotActivated";
    BAD_SUBSCRIPTION_ID_INVALID = 0x8028_0000, "BadSubscriptionIdInvalid";
    BAD_NO_COMMUNICATION = 0x8031_0000, "BadNoCommunication";
    BAD_WAITING_FOR_INITIAL_DATA = 0x8032_0000, "BadWaitingForInitialData";
    BAD_NODE_ID_INVALID = 0x8033_0000, "BadNodeIdInvalid";
    BAD_NODE_ID_UNKNOWN = 0x8034_0000, "BadNodeIdUnknown";
    BAD_ATTRIBUTE_ID_INVALID = 0x8035_0000, "BadAttributeIdInvalid";
    BAD_MONITORED_ITEM_ID_INVALID = 0x8042_0000, "BadMonitoredItemIdInvalid";
    BAD_NOT_CONNECTED = 0x808A_0000, "BadNotConnected";
    BAD_DEVICE_FAILURE = 0x808B_0000, "BadDeviceFailure";
    BAD_SENSOR_FAILURE = 0x808C_0000, "BadSensorFailure";
    BAD_OUT_OF_SERVICE = 0x808D_0000, "BadOutOfService";
    BAD_CONNECTION_CLOSED = 0x80AE_0000, "BadConnectionClosed";
}

impl StatusCode {
    const SEVERITY_MASK: u32 = 0xC000_0000;

    /// Returns `true` for good status codes.
    #[inline]
    pub fn is_good(self) -> bool {
        self.0 & Self::SEVERITY_MASK == 0
    }

    /// Returns `true` for uncertain status codes.
    #[inline]
    pub fn is_uncertain(self) -> bool {
        self.0 & Self::SEVERITY_MASK == 0x4000_0000
    }

    /// Returns `true` for bad status codes.
    #[inline]
    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns `true` if the fault means the session is no longer usable.
    pub fn is_session_invalid(self) -> bool {
        // Info bits in the low word do not change the meaning.
        matches!(
            StatusCode(self.0 & 0xFFFF_0000),
            Self::BAD_SESSION_ID_INVALID
                | Self::BAD_SESSION_CLOSED
                | Self::BAD_SESSION_NOT_ACTIVATED
                | Self::BAD_SUBSCRIPTION_ID_INVALID
                | Self::BAD_NOT_CONNECTED
                | Self::BAD_SERVER_NOT_CONNECTED
                | Self::BAD_CONNECTION_CLOSED
        )
    }

    /// Returns `true` if the server rejected an identifier.
    pub fn is_bad_node_id(self) -> bool {
        matches!(
            StatusCode(self.0 & 0xFFFF_0000),
            Self::BAD_NODE_ID_INVALID | Self::BAD_NODE_ID_UNKNOWN
        )
    }

    /// Returns the symbolic name, ignoring info bits.
    pub fn name(self) -> Option<&'static str> {
        let code = self.0 & 0xFFFF_0000;
        Self::NAMED
            .iter()
            .find(|(value, _)| *value == code)
            .map(|(_, name)| *name)
    }

    /// Returns the symbolic name, or the hex code for unknown statuses.
    pub fn symbolic(self) -> String {
        self.name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("0x{:08X}", self.0))
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::GOOD
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08X})", self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl FromStr for StatusCode {
    type Err = OpcUaError;

    /// Parses a symbolic name (`BadNoCommunication`), a hex code
    /// (`0x80310000`) or a decimal code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u32::from_str_radix(hex, 16)
                .map(StatusCode)
                .map_err(|_| invalid_status(s));
        }
        if let Ok(value) = s.parse::<u32>() {
            return Ok(StatusCode(value));
        }
        Self::NAMED
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(value, _)| StatusCode(*value))
            .ok_or_else(|| invalid_status(s))
    }
}

fn invalid_status(text: &str) -> OpcUaError {
    crate::error::ConfigurationError::invalid_value("status_code", format!("unknown status '{text}'"))
        .into()
}
