//! Spanning-Tree instance and per-port state types.

use crate::ParseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default bridge priority used when deriving bridge IDs.
pub const DEFAULT_BRIDGE_PRIORITY: u16 = 32768;

/// Spanning-Tree port state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StpPortState {
    Disabled,
    Blocking,
    Listening,
    Learning,
    Forwarding,
}

impl StpPortState {
    /// Converts to string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Blocking => "blocking",
            Self::Listening => "listening",
            Self::Learning => "learning",
            Self::Forwarding => "forwarding",
        }
    }

    /// Returns the next state on the forwarding progression, if any.
    ///
    /// `Disabled` does not progress; a link-up event moves it to
    /// `Blocking` explicitly. `Forwarding` is terminal.
    pub const fn next(&self) -> Option<StpPortState> {
        match self {
            Self::Blocking => Some(Self::Listening),
            Self::Listening => Some(Self::Learning),
            Self::Learning => Some(Self::Forwarding),
            Self::Disabled | Self::Forwarding => None,
        }
    }
}

impl fmt::Display for StpPortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StpPortState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(Self::Disabled),
            "blocking" => Ok(Self::Blocking),
            "listening" => Ok(Self::Listening),
            "learning" => Ok(Self::Learning),
            "forwarding" => Ok(Self::Forwarding),
            _ => Err(ParseError::InvalidStpState(s.to_string())),
        }
    }
}

/// Spanning-Tree port role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StpPortRole {
    Root,
    Designated,
    Alternate,
    Backup,
    Disabled,
}

impl StpPortRole {
    /// Converts to string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Designated => "designated",
            Self::Alternate => "alternate",
            Self::Backup => "backup",
            Self::Disabled => "disabled",
        }
    }
}

/// Per-port Spanning-Tree view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StpPortEntry {
    /// Port role
    pub role: StpPortRole,
    /// Port state
    pub state: StpPortState,
    /// Path cost derived from the port speed
    pub path_cost: u32,
}

impl StpPortEntry {
    /// Creates an entry for a new port: forwarding/designated when the link
    /// is up, disabled otherwise.
    pub fn for_link(up: bool, path_cost: u32) -> Self {
        if up {
            Self {
                role: StpPortRole::Designated,
                state: StpPortState::Forwarding,
                path_cost,
            }
        } else {
            Self {
                role: StpPortRole::Disabled,
                state: StpPortState::Disabled,
                path_cost,
            }
        }
    }
}

/// Per-switch Spanning-Tree instance.
///
/// Created with the switch and destroyed with it; mutated only by the
/// Spanning-Tree simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanningTreeInstance {
    /// Own bridge ID, `<priority>.<pseudo-mac>`
    pub bridge_id: String,
    /// Bridge ID of the elected root, if known
    pub root_bridge_id: Option<String>,
    /// Path cost towards the root
    pub root_path_cost: u32,
    /// Port towards the root (none on the root bridge)
    pub root_port: Option<u8>,
    /// Topology-change flag, auto-cleared after a fixed window
    pub topology_change: bool,
    /// Timestamp of the last topology change
    pub last_topology_change: Option<DateTime<Utc>>,
    /// Per-port state
    pub ports: BTreeMap<u8, StpPortEntry>,
}

impl SpanningTreeInstance {
    /// Creates a fresh instance with no port entries.
    pub fn new(bridge_id: impl Into<String>) -> Self {
        Self {
            bridge_id: bridge_id.into(),
            root_bridge_id: None,
            root_path_cost: 0,
            root_port: None,
            topology_change: false,
            last_topology_change: None,
            ports: BTreeMap::new(),
        }
    }

    /// Returns true if this bridge considers itself root.
    pub fn is_root(&self) -> bool {
        self.root_bridge_id.as_deref() == Some(self.bridge_id.as_str())
    }
}

/// Derives a stable bridge ID from a switch identity.
///
/// Real bridges use their MAC address; the simulator derives a pseudo-MAC
/// from a stable hash of the switch ID so that restarts produce the same
/// bridge ID.
pub fn bridge_id_for(switch_id: &str) -> String {
    let hash = switch_id.chars().fold(0i32, |h, c| {
        h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32)
    });
    let octets = hash.unsigned_abs() & 0x00ff_ffff;
    format!(
        "{}.00:00:00:{:02x}:{:02x}:{:02x}",
        DEFAULT_BRIDGE_PRIORITY,
        (octets >> 16) & 0xff,
        (octets >> 8) & 0xff,
        octets & 0xff,
    )
}
