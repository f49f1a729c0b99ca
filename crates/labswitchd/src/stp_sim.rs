//! Simplified per-switch Spanning-Tree simulation.
//!
//! Each port advances `Disabled -> Blocking -> Listening -> Learning ->
//! Forwarding`; a link-down forces `Disabled` immediately from any state,
//! a link-up re-enters the progression at `Blocking`. Transitions are
//! explicit `{next_state, due}` values advanced by [`StpSimulator::tick`],
//! so tests drive the machine with synthetic instants instead of wall-clock
//! waits.
//!
//! Root election is intentionally simplified for the lab: the first switch
//! registered with the simulator is always treated as root and every other
//! switch marks its forwarding ports designated. No BPDU is ever exchanged
//! between switches; the hello timer only emits observational notifications.

use crate::error::Result;
use crate::events::{Event, EventBroadcaster, EventKind};
use crate::store::{ChangeKind, StateStore, StoreEvent};
use chrono::{DateTime, Utc};
use labswitch_types::{
    bridge_id_for, SpanningTreeInstance, StpPortEntry, StpPortRole, StpPortState,
};
use serde_json::json;
use std::collections::btree_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A scheduled port state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTransition {
    next_state: StpPortState,
    due: Instant,
}

#[derive(Default)]
struct SimInner {
    /// First-registered switch, always treated as root.
    designated_root: Option<String>,
    /// Scheduled transitions keyed by (switch, port).
    pending: HashMap<(String, u8), PendingTransition>,
}

/// Per-switch Spanning-Tree simulator.
pub struct StpSimulator {
    store: Arc<StateStore>,
    broadcaster: Arc<EventBroadcaster>,
    forward_delay: Duration,
    topology_window: chrono::Duration,
    inner: Mutex<SimInner>,
}

impl StpSimulator {
    pub fn new(
        store: Arc<StateStore>,
        broadcaster: Arc<EventBroadcaster>,
        forward_delay: Duration,
        topology_window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            broadcaster,
            forward_delay,
            topology_window,
            inner: Mutex::new(SimInner::default()),
        }
    }

    /// Registers existing switches and brings every instance in line with
    /// its current port set. The first switch (lowest id) becomes root.
    pub fn initialize(&self, now: Instant) {
        let snapshot = self.store.read();
        let ids: Vec<String> = snapshot.state.switches.keys().cloned().collect();
        {
            let mut inner = self.inner.lock().expect("stp lock poisoned");
            if inner.designated_root.is_none() {
                inner.designated_root = ids.first().cloned();
            }
        }
        for id in &ids {
            if let Err(e) = self.resync(id, now) {
                warn!(switch = %id, error = %e, "STP initialization failed");
            }
        }
        if let Some(root) = self.designated_root() {
            info!(switch = %root, "designated root bridge");
        }
    }

    /// Reacts to a store change notification.
    ///
    /// Only mutations of the switch entity trigger a recompute; derived
    /// STP/traffic commits are ignored to keep the feedback loop closed.
    pub fn handle_change(&self, event: &StoreEvent, now: Instant) {
        if !event.kind.is_entity_mutation() {
            return;
        }
        let switch_id = event.kind.switch_id().to_string();

        match &event.kind {
            ChangeKind::SwitchCreated { .. } => {
                let mut inner = self.inner.lock().expect("stp lock poisoned");
                if inner.designated_root.is_none() {
                    inner.designated_root = Some(switch_id.clone());
                    info!(switch = %switch_id, "designated root bridge");
                }
            }
            ChangeKind::SwitchDeleted { .. } => {
                let root_changed = {
                    let mut inner = self.inner.lock().expect("stp lock poisoned");
                    inner.pending.retain(|(sw, _), _| sw != &switch_id);
                    if inner.designated_root.as_deref() == Some(switch_id.as_str()) {
                        let next = self
                            .store
                            .read()
                            .state
                            .switches
                            .keys()
                            .next()
                            .cloned();
                        inner.designated_root = next;
                        true
                    } else {
                        false
                    }
                };
                self.broadcaster.remove_group(&switch_id);
                if root_changed {
                    // Every remaining switch's root view changed.
                    let ids: Vec<String> =
                        self.store.read().state.switches.keys().cloned().collect();
                    for id in &ids {
                        if let Err(e) = self.resync(id, now) {
                            warn!(switch = %id, error = %e, "STP resync failed");
                        }
                    }
                }
                return;
            }
            _ => {}
        }

        if let Err(e) = self.resync(&switch_id, now) {
            warn!(switch = %switch_id, error = %e, "STP resync failed");
        }
    }

    /// Recomputes one switch's instance from its current port set,
    /// preserving in-flight progression on unaffected ports.
    fn resync(&self, switch_id: &str, now: Instant) -> Result<()> {
        let mut inner = self.inner.lock().expect("stp lock poisoned");
        let designated_root = inner.designated_root.clone();
        let forward_delay = self.forward_delay;
        let pending = &mut inner.pending;

        let structural = self.store.update(
            ChangeKind::StpUpdated {
                switch_id: switch_id.to_string(),
            },
            |state| {
                let Some(switch) = state.switches.get(switch_id).cloned() else {
                    // Deleted between notification and recompute.
                    return Ok(false);
                };

                let is_root = designated_root.as_deref() == Some(switch_id);
                let root_bridge_id = designated_root
                    .as_deref()
                    .map(|root| {
                        state
                            .stp
                            .get(root)
                            .map(|i| i.bridge_id.clone())
                            .unwrap_or_else(|| bridge_id_for(root))
                    });

                let inst = state
                    .stp
                    .entry(switch_id.to_string())
                    .or_insert_with(|| SpanningTreeInstance::new(bridge_id_for(switch_id)));

                let mut structural = false;

                // Drop state for ports that no longer exist.
                let live: BTreeSet<u8> = switch.ports.iter().map(|p| p.id).collect();
                inst.ports.retain(|port_id, _| live.contains(port_id));
                pending.retain(|(sw, port_id), _| sw != switch_id || live.contains(port_id));

                for port in &switch.ports {
                    let cost = port.speed.path_cost();
                    let key = (switch_id.to_string(), port.id);
                    match inst.ports.entry(port.id) {
                        Entry::Vacant(slot) => {
                            slot.insert(StpPortEntry::for_link(port.is_up(), cost));
                            structural = true;
                        }
                        Entry::Occupied(mut slot) => {
                            let entry = slot.get_mut();
                            entry.path_cost = cost;
                            if !port.is_up() {
                                if entry.state != StpPortState::Disabled {
                                    entry.state = StpPortState::Disabled;
                                    entry.role = StpPortRole::Disabled;
                                }
                                pending.remove(&key);
                            } else if entry.state == StpPortState::Disabled {
                                entry.state = StpPortState::Blocking;
                                entry.role = StpPortRole::Designated;
                                pending.insert(
                                    key,
                                    PendingTransition {
                                        next_state: StpPortState::Listening,
                                        due: now,
                                    },
                                );
                                structural = true;
                            } else if entry.state != StpPortState::Forwarding
                                && !pending.contains_key(&key)
                            {
                                // Resume an interrupted progression, e.g.
                                // after a restart restored a mid-flight state.
                                if let Some(next_state) = entry.state.next() {
                                    let due = if entry.state == StpPortState::Blocking {
                                        now
                                    } else {
                                        now + forward_delay / 2
                                    };
                                    pending.insert(key, PendingTransition { next_state, due });
                                }
                            }
                        }
                    }
                }

                apply_root_view(inst, is_root, root_bridge_id);

                if structural {
                    inst.topology_change = true;
                    inst.last_topology_change = Some(Utc::now());
                }
                Ok(structural)
            },
        )?;
        drop(inner);

        if structural {
            self.publish_topology_change(switch_id);
        }
        Ok(())
    }

    /// Advances due transitions and clears expired topology-change flags.
    ///
    /// A failure on one switch is logged and never halts the others.
    pub fn tick(&self, now: Instant, wall: DateTime<Utc>) {
        let due: HashMap<String, Vec<(u8, StpPortState)>> = {
            let mut inner = self.inner.lock().expect("stp lock poisoned");
            let mut due: HashMap<String, Vec<(u8, StpPortState)>> = HashMap::new();
            inner.pending.retain(|(switch_id, port_id), transition| {
                if transition.due <= now {
                    due.entry(switch_id.clone())
                        .or_default()
                        .push((*port_id, transition.next_state));
                    false
                } else {
                    true
                }
            });
            due
        };

        for (switch_id, transitions) in due {
            match self.apply_transitions(&switch_id, &transitions, now) {
                Ok(reached_forwarding) => {
                    if reached_forwarding {
                        self.publish_topology_change(&switch_id);
                    }
                }
                Err(e) => warn!(switch = %switch_id, error = %e, "STP transition failed"),
            }
        }

        self.clear_expired_topology_flags(wall);
    }

    fn apply_transitions(
        &self,
        switch_id: &str,
        transitions: &[(u8, StpPortState)],
        now: Instant,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().expect("stp lock poisoned");
        let designated_root = inner.designated_root.clone();
        let forward_delay = self.forward_delay;
        let pending = &mut inner.pending;

        self.store.update(
            ChangeKind::StpUpdated {
                switch_id: switch_id.to_string(),
            },
            |state| {
                let is_root = designated_root.as_deref() == Some(switch_id);
                let root_bridge_id = designated_root.as_deref().map(|root| {
                    state
                        .stp
                        .get(root)
                        .map(|i| i.bridge_id.clone())
                        .unwrap_or_else(|| bridge_id_for(root))
                });
                let Some(inst) = state.stp.get_mut(switch_id) else {
                    return Ok(false);
                };

                let mut reached_forwarding = false;
                for &(port_id, next_state) in transitions {
                    let Some(entry) = inst.ports.get_mut(&port_id) else {
                        continue;
                    };
                    // A resync may have reset the port since this was
                    // scheduled; only advance along the expected edge.
                    if entry.state.next() != Some(next_state) {
                        continue;
                    }
                    entry.state = next_state;
                    debug!(
                        switch = switch_id,
                        port = port_id,
                        state = next_state.as_str(),
                        "STP transition"
                    );
                    match next_state.next() {
                        Some(following) => {
                            pending.insert(
                                (switch_id.to_string(), port_id),
                                PendingTransition {
                                    next_state: following,
                                    due: now + forward_delay / 2,
                                },
                            );
                        }
                        None => reached_forwarding = true,
                    }
                }

                apply_root_view(inst, is_root, root_bridge_id);

                if reached_forwarding {
                    inst.topology_change = true;
                    inst.last_topology_change = Some(Utc::now());
                }
                Ok(reached_forwarding)
            },
        )
    }

    fn clear_expired_topology_flags(&self, wall: DateTime<Utc>) {
        let snapshot = self.store.read();
        let expired: Vec<String> = snapshot
            .state
            .stp
            .iter()
            .filter(|(_, inst)| {
                inst.topology_change
                    && inst
                        .last_topology_change
                        .is_some_and(|at| wall - at >= self.topology_window)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for switch_id in expired {
            let result = self.store.update(
                ChangeKind::StpUpdated {
                    switch_id: switch_id.clone(),
                },
                |state| {
                    if let Some(inst) = state.stp.get_mut(&switch_id) {
                        inst.topology_change = false;
                    }
                    Ok(())
                },
            );
            match result {
                Ok(()) => debug!(switch = %switch_id, "topology change cleared"),
                Err(e) => warn!(switch = %switch_id, error = %e, "topology clear failed"),
            }
        }
    }

    /// Emits one observational "BPDU sent" notification per switch with its
    /// current root view. Nothing is transmitted between switches.
    pub fn emit_hellos(&self) {
        let snapshot = self.store.read();
        for (switch_id, inst) in &snapshot.state.stp {
            debug!(switch = %switch_id, "sending BPDUs");
            self.broadcaster.publish(Event::for_switch(
                EventKind::StpBpduSent,
                switch_id.clone(),
                json!({
                    "rootBridgeId": inst.root_bridge_id,
                    "rootPathCost": inst.root_path_cost,
                }),
            ));
        }
    }

    fn publish_topology_change(&self, switch_id: &str) {
        info!(switch = switch_id, "topology change detected");
        self.broadcaster.publish(Event::for_switch(
            EventKind::StpTopologyChange,
            switch_id,
            json!({}),
        ));
    }

    /// The switch currently treated as root bridge.
    pub fn designated_root(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("stp lock poisoned")
            .designated_root
            .clone()
    }

    /// Spawns the scheduler: a short transition tick plus the hello timer.
    /// Cancellation stops both before any further commit.
    pub fn run(
        self: Arc<Self>,
        tick_period: Duration,
        hello_time: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let sim = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(tick_period);
            let mut hello = tokio::time::interval(hello_time);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            hello.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => sim.tick(Instant::now(), Utc::now()),
                    _ = hello.tick() => sim.emit_hellos(),
                }
            }
            debug!("STP scheduler stopped");
        })
    }
}

/// Applies the simplified root view to an instance: the root bridge reports
/// itself with zero cost, everyone else points at the designated root and
/// costs the cheapest forwarding port. Forwarding ports are designated.
fn apply_root_view(
    inst: &mut SpanningTreeInstance,
    is_root: bool,
    root_bridge_id: Option<String>,
) {
    for entry in inst.ports.values_mut() {
        if entry.state == StpPortState::Forwarding {
            entry.role = StpPortRole::Designated;
        }
    }
    if is_root {
        inst.root_bridge_id = Some(inst.bridge_id.clone());
        inst.root_path_cost = 0;
        inst.root_port = None;
    } else {
        inst.root_bridge_id = root_bridge_id;
        let cheapest = inst
            .ports
            .iter()
            .filter(|(_, e)| e.state == StpPortState::Forwarding)
            .min_by_key(|(port_id, e)| (e.path_cost, **port_id));
        match cheapest {
            Some((port_id, entry)) => {
                inst.root_path_cost = entry.path_cost;
                inst.root_port = Some(*port_id);
            }
            None => {
                inst.root_path_cost = 0;
                inst.root_port = None;
            }
        }
    }
}
