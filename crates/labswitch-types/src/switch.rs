//! Switch entity and provisioning defaults.

use crate::{default_ports, default_vlans, ParseError, Port, Vlan, VlanId};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// Default hardware model for provisioned switches.
pub const DEFAULT_MODEL: &str = "LabSwitch-448D-POE";

/// Default firmware version for provisioned switches.
pub const DEFAULT_FIRMWARE: &str = "7.2.3";

/// Administrative status of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchStatus {
    /// Switch is online and reachable.
    Online,
    /// Switch is offline.
    Offline,
    /// Switch is in maintenance mode.
    Maintenance,
}

impl SwitchStatus {
    /// Converts to string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SwitchStatus::Online => "online",
            SwitchStatus::Offline => "offline",
            SwitchStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for SwitchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SwitchStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(SwitchStatus::Online),
            "offline" => Ok(SwitchStatus::Offline),
            "maintenance" => Ok(SwitchStatus::Maintenance),
            _ => Err(ParseError::InvalidSwitchStatus(s.to_string())),
        }
    }
}

/// A managed switch in the simulated lab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    /// Stable identity, e.g. "SW001"
    pub id: String,
    /// Display name
    pub name: String,
    /// Hardware model
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Firmware version
    pub firmware: String,
    /// Management IP address
    pub management_ip: IpAddr,
    /// Administrative status
    pub status: SwitchStatus,
    /// Front-panel ports, ordered by id
    pub ports: Vec<Port>,
    /// VLANs configured on this switch
    pub vlans: BTreeMap<VlanId, Vlan>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Switch {
    /// Provisions a new online switch with factory defaults for anything
    /// not supplied: default port bank, default VLANs, generated serial,
    /// and a management address from the `10.0.0.x` pool by ordinal.
    pub fn provision(
        id: impl Into<String>,
        name: Option<String>,
        model: Option<String>,
        ports: Option<Vec<Port>>,
        vlans: Option<BTreeMap<VlanId, Vlan>>,
        ordinal: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        let name = name.unwrap_or_else(|| format!("Switch-{}", id));
        Self {
            id,
            name,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            serial: generate_serial(&mut rand::thread_rng()),
            firmware: DEFAULT_FIRMWARE.to_string(),
            management_ip: management_ip_for(ordinal),
            status: SwitchStatus::Online,
            ports: ports.unwrap_or_else(|| default_ports(now)),
            vlans: vlans.unwrap_or_else(|| default_vlans(now)),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the port with the given id, if present.
    pub fn port(&self, id: u8) -> Option<&Port> {
        self.ports.iter().find(|p| p.id == id)
    }

    /// Returns a mutable reference to the port with the given id.
    pub fn port_mut(&mut self, id: u8) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.id == id)
    }

    /// Returns true if the VLAN exists on this switch.
    pub fn has_vlan(&self, id: VlanId) -> bool {
        self.vlans.contains_key(&id)
    }

    /// Iterates over ports whose link is up.
    pub fn up_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.is_up())
    }
}

/// Generates an `FSW`-prefixed 8-character serial number.
pub fn generate_serial<R: Rng>(rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let suffix: String = (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("FSW{}", suffix)
}

/// Allocates a management address from the simulator's `10.0.0.x` pool.
fn management_ip_for(ordinal: usize) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, (100 + ordinal % 150) as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_defaults() {
        let now = Utc::now();
        let sw = Switch::provision("SW001", None, None, None, None, 0, now);

        assert_eq!(sw.id, "SW001");
        assert_eq!(sw.name, "Switch-SW001");
        assert_eq!(sw.model, DEFAULT_MODEL);
        assert_eq!(sw.status, SwitchStatus::Online);
        assert_eq!(sw.ports.len(), 48);
        assert_eq!(sw.vlans.len(), 5);
        assert!(sw.serial.starts_with("FSW"));
        assert_eq!(sw.serial.len(), 11);
        assert_eq!(sw.management_ip.to_string(), "10.0.0.100");
    }

    #[test]
    fn test_provision_ordinal_allocates_distinct_addresses() {
        let now = Utc::now();
        let a = Switch::provision("SW001", None, None, None, None, 0, now);
        let b = Switch::provision("SW002", None, None, None, None, 1, now);
        assert_ne!(a.management_ip, b.management_ip);
    }

    #[test]
    fn test_port_lookup() {
        let now = Utc::now();
        let mut sw = Switch::provision("SW001", None, None, None, None, 0, now);

        assert!(sw.port(1).is_some());
        assert!(sw.port(48).is_some());
        assert!(sw.port(49).is_none());

        sw.port_mut(1).unwrap().poe = false;
        assert!(!sw.port(1).unwrap().poe);
    }

    #[test]
    fn test_up_ports_filter() {
        let now = Utc::now();
        let mut sw = Switch::provision("SW001", None, None, None, None, 0, now);
        assert_eq!(sw.up_ports().count(), 0);

        sw.port_mut(3).unwrap().status = crate::LinkStatus::Up;
        sw.port_mut(7).unwrap().status = crate::LinkStatus::Up;
        assert_eq!(sw.up_ports().count(), 2);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SwitchStatus::Online,
            SwitchStatus::Offline,
            SwitchStatus::Maintenance,
        ] {
            assert_eq!(status.as_str().parse::<SwitchStatus>().unwrap(), status);
        }
        assert!("rebooting".parse::<SwitchStatus>().is_err());
    }
}
