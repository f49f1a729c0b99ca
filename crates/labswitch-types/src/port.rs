//! Port type definitions for simulated switch ports.

use crate::{ParseError, VlanId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Number of front-panel ports on the default switch model.
pub const DEFAULT_PORT_COUNT: u8 = 48;

/// Physical port media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortType {
    /// Copper RJ45 port.
    Rj45,
    /// SFP+ fiber uplink port.
    SfpPlus,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortType::Rj45 => "rj45",
            PortType::SfpPlus => "sfp-plus",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PortType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rj45" => Ok(PortType::Rj45),
            "sfp-plus" => Ok(PortType::SfpPlus),
            _ => Err(ParseError::InvalidPortType(s.to_string())),
        }
    }
}

/// Operational link status of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Link is up and operational.
    Up,
    /// Link is down.
    Down,
}

impl LinkStatus {
    /// Converts to string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Up => "up",
            LinkStatus::Down => "down",
        }
    }

    /// Returns true if the link is up.
    pub const fn is_up(&self) -> bool {
        matches!(self, LinkStatus::Up)
    }
}

impl FromStr for LinkStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(LinkStatus::Up),
            "down" => Ok(LinkStatus::Down),
            _ => Err(ParseError::InvalidLinkStatus(s.to_string())),
        }
    }
}

/// Configured port speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortSpeed {
    /// Auto-negotiated speed.
    #[serde(rename = "auto")]
    Auto,
    /// 10 Mbit/s.
    #[serde(rename = "10M")]
    M10,
    /// 100 Mbit/s.
    #[serde(rename = "100M")]
    M100,
    /// 1 Gbit/s.
    #[serde(rename = "1G")]
    G1,
    /// 10 Gbit/s.
    #[serde(rename = "10G")]
    G10,
}

impl PortSpeed {
    /// Converts to string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PortSpeed::Auto => "auto",
            PortSpeed::M10 => "10M",
            PortSpeed::M100 => "100M",
            PortSpeed::G1 => "1G",
            PortSpeed::G10 => "10G",
        }
    }

    /// Returns the Spanning-Tree path cost for this speed.
    ///
    /// Standard short path costs; auto-negotiated links are costed as 1G.
    pub const fn path_cost(&self) -> u32 {
        match self {
            PortSpeed::G10 => 2,
            PortSpeed::G1 => 4,
            PortSpeed::M100 => 19,
            PortSpeed::M10 => 100,
            PortSpeed::Auto => 4,
        }
    }
}

impl fmt::Display for PortSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PortSpeed {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(PortSpeed::Auto),
            "10M" => Ok(PortSpeed::M10),
            "100M" => Ok(PortSpeed::M100),
            "1G" => Ok(PortSpeed::G1),
            "10G" => Ok(PortSpeed::G10),
            _ => Err(ParseError::InvalidPortSpeed(s.to_string())),
        }
    }
}

/// Duplex mode of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplex {
    /// Auto-negotiated duplex.
    Auto,
    /// Half duplex.
    Half,
    /// Full duplex.
    Full,
}

impl Duplex {
    /// Converts to string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Duplex::Auto => "auto",
            Duplex::Half => "half",
            Duplex::Full => "full",
        }
    }
}

impl FromStr for Duplex {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Duplex::Auto),
            "half" => Ok(Duplex::Half),
            "full" => Ok(Duplex::Full),
            _ => Err(ParseError::InvalidDuplex(s.to_string())),
        }
    }
}

/// A front-panel switch port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Port number (1-based)
    pub id: u8,
    /// Port name, e.g. "port7"
    pub name: String,
    /// Physical media type
    pub port_type: PortType,
    /// Operational link status
    pub status: LinkStatus,
    /// Configured speed
    pub speed: PortSpeed,
    /// Duplex mode
    pub duplex: Duplex,
    /// Untagged (native) VLAN
    pub untagged_vlan: VlanId,
    /// Tagged VLAN membership
    #[serde(default)]
    pub tagged_vlans: BTreeSet<VlanId>,
    /// Power-over-Ethernet enabled
    pub poe: bool,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Port {
    /// Creates a new port in link-down state on the default VLAN.
    pub fn new(id: u8, port_type: PortType, speed: PortSpeed, poe: bool, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: format!("port{}", id),
            port_type,
            status: LinkStatus::Down,
            speed,
            duplex: Duplex::Auto,
            untagged_vlan: VlanId::DEFAULT,
            tagged_vlans: BTreeSet::new(),
            poe,
            updated_at: now,
        }
    }

    /// Returns true if the link is up.
    pub fn is_up(&self) -> bool {
        self.status.is_up()
    }

    /// Returns true if the port is a member of the given VLAN,
    /// either untagged or tagged.
    pub fn is_member_of(&self, vlan: VlanId) -> bool {
        self.untagged_vlan == vlan || self.tagged_vlans.contains(&vlan)
    }

    /// Applies a patch to this port.
    ///
    /// A port whose link goes (or stays) down has PoE forced off.
    /// Applying the same patch twice yields the same port state.
    pub fn apply(&mut self, patch: &PortPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(speed) = patch.speed {
            self.speed = speed;
        }
        if let Some(duplex) = patch.duplex {
            self.duplex = duplex;
        }
        if let Some(untagged) = patch.untagged_vlan {
            self.untagged_vlan = untagged;
        }
        if let Some(ref tagged) = patch.tagged_vlans {
            self.tagged_vlans = tagged.clone();
        }
        if let Some(poe) = patch.poe {
            self.poe = poe;
        }
        // A down port cannot deliver power.
        if self.status == LinkStatus::Down {
            self.poe = false;
        }
        self.updated_at = now;
    }
}

/// Partial update for a port. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortPatch {
    pub status: Option<LinkStatus>,
    pub speed: Option<PortSpeed>,
    pub duplex: Option<Duplex>,
    pub untagged_vlan: Option<VlanId>,
    pub tagged_vlans: Option<BTreeSet<VlanId>>,
    pub poe: Option<bool>,
}

impl PortPatch {
    /// Patch that only changes the link status.
    pub fn link(status: LinkStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch that only changes the speed.
    pub fn speed(speed: PortSpeed) -> Self {
        Self {
            speed: Some(speed),
            ..Self::default()
        }
    }
}

/// Returns the factory-default port bank: 44 copper gigabit ports followed
/// by 4 SFP+ uplinks, PoE on the first 24.
pub fn default_ports(now: DateTime<Utc>) -> Vec<Port> {
    (1..=DEFAULT_PORT_COUNT)
        .map(|id| {
            if id <= 44 {
                Port::new(id, PortType::Rj45, PortSpeed::G1, id <= 24, now)
            } else {
                Port::new(id, PortType::SfpPlus, PortSpeed::G10, false, now)
            }
        })
        .collect()
}
