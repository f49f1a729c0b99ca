//! Core entity types for the labswitch simulator.
//!
//! This crate provides the data model shared by the simulator daemon and any
//! front-end adapters:
//!
//! - [`Switch`]: a managed switch with its ports, VLANs and metadata
//! - [`Port`]: a front-panel port with link state, speed and VLAN membership
//! - [`Vlan`] / [`VlanId`]: IEEE 802.1Q VLANs scoped to one switch
//! - [`SpanningTreeInstance`]: the per-switch Spanning-Tree view
//! - [`SwitchTrafficStats`] / [`PortTrafficStats`]: rolling traffic counters

mod port;
mod stats;
mod stp;
mod switch;
mod vlan;

pub use port::{default_ports, Duplex, LinkStatus, Port, PortPatch, PortSpeed, PortType};
pub use stats::{PortTrafficStats, RateSample, SwitchTrafficStats, RATE_HISTORY_LIMIT, RATE_SMOOTHING};
pub use stp::{bridge_id_for, SpanningTreeInstance, StpPortEntry, StpPortRole, StpPortState};
pub use switch::{Switch, SwitchStatus, DEFAULT_FIRMWARE, DEFAULT_MODEL};
pub use vlan::{default_vlans, Vlan, VlanId, VlanStatus};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid VLAN ID: {0} (must be 1-4095)")]
    InvalidVlanId(u16),

    #[error("invalid link status: {0}")]
    InvalidLinkStatus(String),

    #[error("invalid port speed: {0}")]
    InvalidPortSpeed(String),

    #[error("invalid duplex mode: {0}")]
    InvalidDuplex(String),

    #[error("invalid port type: {0}")]
    InvalidPortType(String),

    #[error("invalid VLAN status: {0}")]
    InvalidVlanStatus(String),

    #[error("invalid switch status: {0}")]
    InvalidSwitchStatus(String),

    #[error("invalid STP port state: {0}")]
    InvalidStpState(String),
}
