//! VLAN identifier and entity types.

use crate::ParseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4095).
///
/// # Examples
///
/// ```
/// use labswitch_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
///
/// assert!(VlanId::new(0).is_err());
/// assert!(VlanId::new(4096).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Minimum valid VLAN ID.
    pub const MIN: u16 = 1;

    /// Maximum valid VLAN ID.
    pub const MAX: u16 = 4095;

    /// Default VLAN (VLAN 1). Always present, never deletable.
    pub const DEFAULT: VlanId = VlanId(1);

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the VLAN ID is not in the valid range (1-4095).
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    /// Returns the raw numeric ID.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns true if this is the default VLAN.
    pub const fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT.0
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(id: VlanId) -> u16 {
        id.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Administrative status of a VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlanStatus {
    /// VLAN is active and forwarding.
    Active,
    /// VLAN is suspended.
    Suspend,
    /// VLAN is administratively shut down.
    Shutdown,
}

impl VlanStatus {
    /// Converts to string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            VlanStatus::Active => "active",
            VlanStatus::Suspend => "suspend",
            VlanStatus::Shutdown => "shutdown",
        }
    }
}

impl FromStr for VlanStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(VlanStatus::Active),
            "suspend" => Ok(VlanStatus::Suspend),
            "shutdown" => Ok(VlanStatus::Shutdown),
            _ => Err(ParseError::InvalidVlanStatus(s.to_string())),
        }
    }
}

/// A VLAN configured on a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    /// VLAN ID
    pub id: VlanId,
    /// Human-readable name
    pub name: String,
    /// Administrative status
    pub status: VlanStatus,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Vlan {
    /// Creates a new active VLAN.
    pub fn new(id: VlanId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            status: VlanStatus::Active,
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Returns the factory-default VLAN set for a freshly provisioned switch.
pub fn default_vlans(now: DateTime<Utc>) -> BTreeMap<VlanId, Vlan> {
    [(1, "default"), (10, "mgmt"), (20, "voice"), (30, "data"), (40, "guest")]
        .into_iter()
        .filter_map(|(id, name)| {
            let id = VlanId::new(id).ok()?;
            Some((id, Vlan::new(id, name, now)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlan_id_range() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4095).is_ok());
        assert_eq!(VlanId::new(0), Err(ParseError::InvalidVlanId(0)));
        assert_eq!(VlanId::new(4096), Err(ParseError::InvalidVlanId(4096)));
    }

    #[test]
    fn test_vlan_id_default() {
        assert!(VlanId::DEFAULT.is_default());
        assert!(!VlanId::new(2).unwrap().is_default());
        assert_eq!(VlanId::DEFAULT.as_u16(), 1);
    }

    #[test]
    fn test_vlan_status_round_trip() {
        for status in [VlanStatus::Active, VlanStatus::Suspend, VlanStatus::Shutdown] {
            assert_eq!(status.as_str().parse::<VlanStatus>().unwrap(), status);
        }
        assert!("invalid".parse::<VlanStatus>().is_err());
    }

    #[test]
    fn test_default_vlans() {
        let vlans = default_vlans(Utc::now());
        assert_eq!(vlans.len(), 5);
        assert!(vlans.contains_key(&VlanId::DEFAULT));
        assert_eq!(vlans[&VlanId::DEFAULT].name, "default");
        assert_eq!(vlans[&VlanId::new(20).unwrap()].name, "voice");
    }

    #[test]
    fn test_vlan_id_serde_as_u16() {
        let id = VlanId::new(100).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "100");
        assert_eq!(serde_json::from_str::<VlanId>("100").unwrap(), id);
        assert!(serde_json::from_str::<VlanId>("0").is_err());
    }
}
