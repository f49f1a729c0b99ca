//! Transport-agnostic event broadcasting.
//!
//! Subscribers are grouped by switch identity; a global group carries every
//! event plus the switch lifecycle notifications. Delivery is fire-and-forget
//! over bounded broadcast channels -- a slow or disconnected subscriber never
//! blocks state mutation (lagging receivers drop the oldest events).

use crate::store::{ChangeKind, StoreEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Default per-group channel capacity.
const CHANNEL_CAPACITY: usize = 256;

/// Kind of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    SwitchCreated,
    SwitchUpdated,
    SwitchDeleted,
    PortUpdated,
    VlanCreated,
    VlanUpdated,
    VlanDeleted,
    StpTopologyChange,
    StpBpduSent,
    TrafficPacket,
    TrafficStats,
}

/// A typed event delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Switch the event concerns; `None` only for future global events
    pub switch_id: Option<String>,
    /// Kind-specific payload
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event scoped to one switch.
    pub fn for_switch(kind: EventKind, switch_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            switch_id: Some(switch_id.into()),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Maps a store change notification to the equivalent event.
    ///
    /// Derived STP commits return `None`: the Spanning-Tree simulator
    /// publishes its own topology-change and BPDU notifications with
    /// meaningful payloads.
    pub fn from_change(event: &StoreEvent) -> Option<Self> {
        let switch_id = event.kind.switch_id().to_string();
        let (kind, payload) = match &event.kind {
            ChangeKind::SwitchCreated { .. } => (EventKind::SwitchCreated, json!({})),
            ChangeKind::SwitchUpdated { .. } => (EventKind::SwitchUpdated, json!({})),
            ChangeKind::SwitchDeleted { .. } => (EventKind::SwitchDeleted, json!({})),
            ChangeKind::PortUpdated { port_id, .. } => {
                (EventKind::PortUpdated, json!({ "portId": port_id }))
            }
            ChangeKind::VlanCreated { vlan_id, .. } => {
                (EventKind::VlanCreated, json!({ "vlanId": vlan_id.as_u16() }))
            }
            ChangeKind::VlanUpdated { vlan_id, .. } => {
                (EventKind::VlanUpdated, json!({ "vlanId": vlan_id.as_u16() }))
            }
            ChangeKind::VlanDeleted { vlan_id, .. } => {
                (EventKind::VlanDeleted, json!({ "vlanId": vlan_id.as_u16() }))
            }
            ChangeKind::StpUpdated { .. } => return None,
            ChangeKind::TrafficUpdated { .. } => (EventKind::TrafficStats, json!({})),
        };
        let mut ev = Self::for_switch(kind, switch_id, payload);
        ev.payload["revision"] = json!(event.revision);
        Some(ev)
    }
}

/// Fan-out hub for simulator events.
pub struct EventBroadcaster {
    global: broadcast::Sender<Event>,
    groups: Mutex<HashMap<String, broadcast::Sender<Event>>>,
}

impl EventBroadcaster {
    /// Creates a broadcaster with default channel capacity.
    pub fn new() -> Self {
        let (global, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            global,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to events for one switch.
    pub fn subscribe(&self, switch_id: &str) -> broadcast::Receiver<Event> {
        self.group_sender(switch_id).subscribe()
    }

    /// Subscribes to all events, including switch creation/deletion.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.global.subscribe()
    }

    /// Publishes an event to its switch group and the global group.
    ///
    /// Sends never block; the result is intentionally ignored when no
    /// subscriber is listening.
    pub fn publish(&self, event: Event) {
        if let Some(switch_id) = event.switch_id.as_deref() {
            let sender = {
                let groups = self.groups.lock().expect("group lock poisoned");
                groups.get(switch_id).cloned()
            };
            if let Some(sender) = sender {
                let _ = sender.send(event.clone());
            }
        }
        let _ = self.global.send(event);
    }

    /// Drops the subscription group of a deleted switch.
    pub fn remove_group(&self, switch_id: &str) {
        self.groups
            .lock()
            .expect("group lock poisoned")
            .remove(switch_id);
    }

    fn group_sender(&self, switch_id: &str) -> broadcast::Sender<Event> {
        let mut groups = self.groups.lock().expect("group lock poisoned");
        groups
            .entry(switch_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
