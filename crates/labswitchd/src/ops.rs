//! Domain operations exposed to request handlers and protocol boundaries.
//!
//! Every operation commits through the store's serialized update path and
//! returns synchronously. Validation failures never mutate state.

use crate::error::{Result, SimError};
use crate::store::{ChangeKind, StateStore};
use labswitch_types::{
    bridge_id_for, Port, PortPatch, PortTrafficStats, SpanningTreeInstance, StpPortEntry, Switch,
    SwitchStatus, SwitchTrafficStats, Vlan, VlanId, VlanStatus,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::info;

/// Highest front-panel port number accepted by port operations.
pub const MAX_PORT_ID: u8 = 48;

/// Provisioning request for a new switch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchSpec {
    pub id: String,
    pub name: Option<String>,
    pub model: Option<String>,
    pub ports: Option<Vec<Port>>,
    pub vlans: Option<BTreeMap<VlanId, Vlan>>,
}

/// Partial update for switch metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchPatch {
    pub name: Option<String>,
    pub status: Option<SwitchStatus>,
    pub management_ip: Option<IpAddr>,
    pub firmware: Option<String>,
}

/// Partial update for a VLAN.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VlanPatch {
    pub name: Option<String>,
    pub status: Option<VlanStatus>,
    pub description: Option<String>,
}

/// Combined view of a switch with its derived state.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchView {
    pub switch: Switch,
    pub stp: Option<SpanningTreeInstance>,
    pub traffic: Option<SwitchTrafficStats>,
}

impl StateStore {
    /// Provisions a new switch, cascading creation of its Spanning-Tree
    /// instance and traffic-stats entry.
    pub fn create_switch(&self, spec: SwitchSpec) -> Result<Switch> {
        if spec.id.is_empty() {
            return Err(SimError::Validation("switch id must not be empty".to_string()));
        }
        let created = self.update(
            ChangeKind::SwitchCreated {
                switch_id: spec.id.clone(),
            },
            |state| {
                if state.switches.contains_key(&spec.id) {
                    return Err(SimError::Conflict(format!("switch {} already exists", spec.id)));
                }
                let now = Utc::now();
                let switch = Switch::provision(
                    spec.id.clone(),
                    spec.name.clone(),
                    spec.model.clone(),
                    spec.ports.clone(),
                    spec.vlans.clone(),
                    state.switches.len(),
                    now,
                );

                let mut instance = SpanningTreeInstance::new(bridge_id_for(&switch.id));
                for port in &switch.ports {
                    instance.ports.insert(
                        port.id,
                        StpPortEntry::for_link(port.is_up(), port.speed.path_cost()),
                    );
                }

                state.stp.insert(switch.id.clone(), instance);
                state
                    .traffic
                    .insert(switch.id.clone(), SwitchTrafficStats::default());
                state.switches.insert(switch.id.clone(), switch.clone());
                Ok(switch)
            },
        )?;
        info!(switch = %created.id, model = %created.model, "provisioned switch");
        Ok(created)
    }

    /// Updates switch metadata.
    pub fn update_switch(&self, switch_id: &str, patch: &SwitchPatch) -> Result<Switch> {
        self.update(
            ChangeKind::SwitchUpdated {
                switch_id: switch_id.to_string(),
            },
            |state| {
                let switch = state
                    .switches
                    .get_mut(switch_id)
                    .ok_or_else(|| SimError::NotFound(format!("switch {}", switch_id)))?;
                if let Some(ref name) = patch.name {
                    switch.name = name.clone();
                }
                if let Some(status) = patch.status {
                    switch.status = status;
                }
                if let Some(ip) = patch.management_ip {
                    switch.management_ip = ip;
                }
                if let Some(ref firmware) = patch.firmware {
                    switch.firmware = firmware.clone();
                }
                switch.updated_at = Utc::now();
                Ok(switch.clone())
            },
        )
    }

    /// Deletes a switch, cascading to its ports, VLANs, Spanning-Tree
    /// instance, and traffic statistics.
    pub fn delete_switch(&self, switch_id: &str) -> Result<()> {
        self.update(
            ChangeKind::SwitchDeleted {
                switch_id: switch_id.to_string(),
            },
            |state| {
                if state.switches.remove(switch_id).is_none() {
                    return Err(SimError::NotFound(format!("switch {}", switch_id)));
                }
                state.stp.remove(switch_id);
                state.traffic.remove(switch_id);
                Ok(())
            },
        )?;
        info!(switch = switch_id, "deleted switch");
        Ok(())
    }

    /// Returns a switch together with its STP status and traffic stats.
    pub fn get_switch_view(&self, switch_id: &str) -> Result<SwitchView> {
        let snapshot = self.read();
        let switch = snapshot
            .state
            .switches
            .get(switch_id)
            .ok_or_else(|| SimError::NotFound(format!("switch {}", switch_id)))?;
        Ok(SwitchView {
            switch: switch.clone(),
            stp: snapshot.state.stp.get(switch_id).cloned(),
            traffic: snapshot.state.traffic.get(switch_id).cloned(),
        })
    }

    /// Applies a patch to a port.
    ///
    /// Untagged/tagged VLAN references must exist on the owning switch.
    /// Idempotent: applying the same patch twice yields the same port.
    pub fn update_port(&self, switch_id: &str, port_id: u8, patch: &PortPatch) -> Result<Port> {
        if port_id == 0 || port_id > MAX_PORT_ID {
            return Err(SimError::Validation(format!(
                "port id {} out of range 1-{}",
                port_id, MAX_PORT_ID
            )));
        }
        self.update(
            ChangeKind::PortUpdated {
                switch_id: switch_id.to_string(),
                port_id,
            },
            |state| {
                let switch = state
                    .switches
                    .get_mut(switch_id)
                    .ok_or_else(|| SimError::NotFound(format!("switch {}", switch_id)))?;

                let mut referenced = Vec::new();
                if let Some(untagged) = patch.untagged_vlan {
                    referenced.push(untagged);
                }
                if let Some(ref tagged) = patch.tagged_vlans {
                    referenced.extend(tagged.iter().copied());
                }
                for vlan in referenced {
                    if !switch.has_vlan(vlan) {
                        return Err(SimError::Validation(format!(
                            "VLAN {} does not exist on switch {}",
                            vlan, switch_id
                        )));
                    }
                }

                let now = Utc::now();
                let port = switch
                    .port_mut(port_id)
                    .ok_or_else(|| SimError::NotFound(format!("port {} on switch {}", port_id, switch_id)))?;
                port.apply(patch, now);
                let updated = port.clone();
                switch.updated_at = now;
                Ok(updated)
            },
        )
    }

    /// Creates a VLAN on a switch. Ids 2-4094 are accepted for creation.
    pub fn create_vlan(&self, switch_id: &str, vlan_id: u16, name: &str) -> Result<Vlan> {
        if !(2..=4094).contains(&vlan_id) {
            return Err(SimError::Validation(format!(
                "VLAN id {} out of creatable range 2-4094",
                vlan_id
            )));
        }
        let vlan_id = VlanId::new(vlan_id)
            .map_err(|e| SimError::Validation(e.to_string()))?;
        if name.is_empty() {
            return Err(SimError::Validation("VLAN name must not be empty".to_string()));
        }
        self.update(
            ChangeKind::VlanCreated {
                switch_id: switch_id.to_string(),
                vlan_id,
            },
            |state| {
                let switch = state
                    .switches
                    .get_mut(switch_id)
                    .ok_or_else(|| SimError::NotFound(format!("switch {}", switch_id)))?;
                if switch.has_vlan(vlan_id) {
                    return Err(SimError::Conflict(format!(
                        "VLAN {} already exists on switch {}",
                        vlan_id, switch_id
                    )));
                }
                let now = Utc::now();
                let vlan = Vlan::new(vlan_id, name, now);
                switch.vlans.insert(vlan_id, vlan.clone());
                switch.updated_at = now;
                Ok(vlan)
            },
        )
    }

    /// Updates a VLAN's name, status, or description.
    pub fn update_vlan(&self, switch_id: &str, vlan_id: VlanId, patch: &VlanPatch) -> Result<Vlan> {
        self.update(
            ChangeKind::VlanUpdated {
                switch_id: switch_id.to_string(),
                vlan_id,
            },
            |state| {
                let switch = state
                    .switches
                    .get_mut(switch_id)
                    .ok_or_else(|| SimError::NotFound(format!("switch {}", switch_id)))?;
                let now = Utc::now();
                let vlan = switch
                    .vlans
                    .get_mut(&vlan_id)
                    .ok_or_else(|| SimError::NotFound(format!("VLAN {} on switch {}", vlan_id, switch_id)))?;
                if let Some(ref name) = patch.name {
                    vlan.name = name.clone();
                }
                if let Some(status) = patch.status {
                    vlan.status = status;
                }
                if let Some(ref description) = patch.description {
                    vlan.description = description.clone();
                }
                vlan.updated_at = now;
                let updated = vlan.clone();
                switch.updated_at = now;
                Ok(updated)
            },
        )
    }

    /// Deletes a VLAN.
    ///
    /// VLAN 1 is permanent. Member ports whose untagged VLAN was the deleted
    /// one are reassigned to VLAN 1; the id is stripped from tagged sets.
    pub fn delete_vlan(&self, switch_id: &str, vlan_id: VlanId) -> Result<()> {
        if vlan_id.is_default() {
            return Err(SimError::Validation(
                "the default VLAN (1) cannot be deleted".to_string(),
            ));
        }
        self.update(
            ChangeKind::VlanDeleted {
                switch_id: switch_id.to_string(),
                vlan_id,
            },
            |state| {
                let switch = state
                    .switches
                    .get_mut(switch_id)
                    .ok_or_else(|| SimError::NotFound(format!("switch {}", switch_id)))?;
                if switch.vlans.remove(&vlan_id).is_none() {
                    return Err(SimError::NotFound(format!(
                        "VLAN {} on switch {}",
                        vlan_id, switch_id
                    )));
                }
                let now = Utc::now();
                for port in &mut switch.ports {
                    let mut touched = false;
                    if port.untagged_vlan == vlan_id {
                        port.untagged_vlan = VlanId::DEFAULT;
                        touched = true;
                    }
                    if port.tagged_vlans.remove(&vlan_id) {
                        touched = true;
                    }
                    if touched {
                        port.updated_at = now;
                    }
                }
                switch.updated_at = now;
                Ok(())
            },
        )?;
        info!(switch = switch_id, vlan = %vlan_id, "deleted VLAN");
        Ok(())
    }

    /// Resets a switch's traffic counters, rates, and history.
    pub fn reset_traffic_stats(&self, switch_id: &str) -> Result<()> {
        self.update(
            ChangeKind::TrafficUpdated {
                switch_id: switch_id.to_string(),
            },
            |state| {
                let stats = state
                    .traffic
                    .get_mut(switch_id)
                    .ok_or_else(|| SimError::NotFound(format!("switch {}", switch_id)))?;
                stats.reset();
                Ok(())
            },
        )
    }

    /// Total number of front-panel ports across all switches.
    ///
    /// Read-only query point for the SNMP boundary (ifNumber).
    pub fn interface_count(&self) -> usize {
        self.read()
            .state
            .switches
            .values()
            .map(|s| s.ports.len())
            .sum()
    }

    /// Per-port traffic counters for the SNMP boundary.
    pub fn port_counters(&self, switch_id: &str, port_id: u8) -> Result<PortTrafficStats> {
        let snapshot = self.read();
        let stats = snapshot
            .state
            .traffic
            .get(switch_id)
            .ok_or_else(|| SimError::NotFound(format!("switch {}", switch_id)))?;
        Ok(stats.ports.get(&port_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NetworkState;
    use labswitch_types::LinkStatus;
    use pretty_assertions::assert_eq;

    fn store_with_switch() -> StateStore {
        let store = StateStore::new(NetworkState::default());
        store
            .create_switch(SwitchSpec {
                id: "SW001".to_string(),
                ..SwitchSpec::default()
            })
            .unwrap();
        store
    }

    #[test]
    fn test_create_switch_cascades() {
        let store = store_with_switch();
        let snapshot = store.read();
        assert!(snapshot.state.switches.contains_key("SW001"));
        assert!(snapshot.state.stp.contains_key("SW001"));
        assert!(snapshot.state.traffic.contains_key("SW001"));
        assert_eq!(snapshot.state.stp["SW001"].ports.len(), 48);
    }

    #[test]
    fn test_create_duplicate_switch_conflicts() {
        let store = store_with_switch();
        let err = store
            .create_switch(SwitchSpec {
                id: "SW001".to_string(),
                ..SwitchSpec::default()
            })
            .unwrap_err();
        assert!(matches!(err, SimError::Conflict(_)));
    }

    #[test]
    fn test_delete_switch_cascades() {
        let store = store_with_switch();
        store.delete_switch("SW001").unwrap();
        let snapshot = store.read();
        assert!(snapshot.state.switches.is_empty());
        assert!(snapshot.state.stp.is_empty());
        assert!(snapshot.state.traffic.is_empty());

        assert!(matches!(
            store.delete_switch("SW001"),
            Err(SimError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_port_validates_range() {
        let store = store_with_switch();
        let err = store
            .update_port("SW001", 0, &PortPatch::default())
            .unwrap_err();
        assert!(matches!(err, SimError::Validation(_)));

        let err = store
            .update_port("SW001", 49, &PortPatch::default())
            .unwrap_err();
        assert!(matches!(err, SimError::Validation(_)));
    }

    #[test]
    fn test_update_port_rejects_unknown_vlan() {
        let store = store_with_switch();
        let patch = PortPatch {
            untagged_vlan: Some(VlanId::new(999).unwrap()),
            ..PortPatch::default()
        };
        let err = store.update_port("SW001", 1, &patch).unwrap_err();
        assert!(matches!(err, SimError::Validation(_)));

        // Nothing was committed.
        let snapshot = store.read();
        assert_eq!(
            snapshot.state.switches["SW001"].port(1).unwrap().untagged_vlan,
            VlanId::DEFAULT
        );
    }

    #[test]
    fn test_update_port_link_down_disables_poe() {
        let store = store_with_switch();
        store
            .update_port("SW001", 1, &PortPatch::link(LinkStatus::Up))
            .unwrap();
        let port = store
            .update_port("SW001", 1, &PortPatch::link(LinkStatus::Down))
            .unwrap();
        assert!(!port.poe);
    }

    #[test]
    fn test_update_port_idempotent() {
        let store = store_with_switch();
        let patch = PortPatch {
            status: Some(LinkStatus::Up),
            poe: Some(true),
            ..PortPatch::default()
        };
        let first = store.update_port("SW001", 2, &patch).unwrap();
        let second = store.update_port("SW001", 2, &patch).unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.poe, second.poe);
        assert_eq!(first.untagged_vlan, second.untagged_vlan);
    }

    #[test]
    fn test_vlan_create_range_and_conflict() {
        let store = store_with_switch();
        assert!(matches!(
            store.create_vlan("SW001", 1, "dup"),
            Err(SimError::Validation(_))
        ));
        assert!(matches!(
            store.create_vlan("SW001", 4095, "high"),
            Err(SimError::Validation(_))
        ));

        store.create_vlan("SW001", 100, "servers").unwrap();
        assert!(matches!(
            store.create_vlan("SW001", 100, "again"),
            Err(SimError::Conflict(_))
        ));
    }

    #[test]
    fn test_delete_default_vlan_rejected() {
        let store = store_with_switch();
        let err = store.delete_vlan("SW001", VlanId::DEFAULT).unwrap_err();
        assert!(matches!(err, SimError::Validation(_)));
    }

    #[test]
    fn test_delete_vlan_reassigns_members() {
        let store = store_with_switch();
        store.create_vlan("SW001", 100, "servers").unwrap();
        let v100 = VlanId::new(100).unwrap();

        let patch = PortPatch {
            untagged_vlan: Some(v100),
            tagged_vlans: Some([v100].into_iter().collect()),
            ..PortPatch::default()
        };
        store.update_port("SW001", 5, &patch).unwrap();

        store.delete_vlan("SW001", v100).unwrap();

        let snapshot = store.read();
        let port = snapshot.state.switches["SW001"].port(5).unwrap();
        assert_eq!(port.untagged_vlan, VlanId::DEFAULT);
        assert!(port.tagged_vlans.is_empty());
        assert!(!snapshot.state.switches["SW001"].has_vlan(v100));
    }

    #[test]
    fn test_switch_view() {
        let store = store_with_switch();
        let view = store.get_switch_view("SW001").unwrap();
        assert_eq!(view.switch.id, "SW001");
        assert!(view.stp.is_some());
        assert!(view.traffic.is_some());

        assert!(matches!(
            store.get_switch_view("SW009"),
            Err(SimError::NotFound(_))
        ));
    }

    #[test]
    fn test_interface_count() {
        let store = store_with_switch();
        assert_eq!(store.interface_count(), 48);
        store
            .create_switch(SwitchSpec {
                id: "SW002".to_string(),
                ..SwitchSpec::default()
            })
            .unwrap();
        assert_eq!(store.interface_count(), 96);
    }
}
